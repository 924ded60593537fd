//! Upstream data source: the seam the cache fetches through, plus the
//! concrete client for the public-holiday endpoint.

pub mod errors;
pub mod holiday;
pub mod json;

pub use errors::UpstreamError;
pub use holiday::{HolidayApi, HolidayApiConfig};

use async_trait::async_trait;
use serde_json::Value;

/// Performs one complete upstream fetch.
///
/// Implementations do not retry; a failure is reported once and the cache
/// keeps serving whatever it already has.
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Value, UpstreamError>;
}
