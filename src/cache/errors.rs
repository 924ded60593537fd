//! Error types for cache refreshes.

use crate::upstream::UpstreamError;
use crate::utils::fmt_duration;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a failed refresh, shared by every caller that joined it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    #[error("upstream fetch failed: {0}")]
    Upstream(#[source] Arc<UpstreamError>),
    #[error("upstream fetch timed out after {}", fmt_duration(*.0))]
    Timeout(Duration),
    /// The refresh task panicked or was torn down by the runtime.
    #[error("refresh task aborted: {0}")]
    Aborted(String),
}
