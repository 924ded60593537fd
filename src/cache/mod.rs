//! Refresh-policy and request-coalescing cache in front of the upstream API.
//!
//! [`CacheGateway`] is the per-request entry point. It consults the
//! [`RefreshSchedule`], asks the [`Coalescer`] for a refresh when one is due,
//! and answers from the [`CacheStore`].

pub mod clock;
pub mod coalescer;
pub mod errors;
pub mod gateway;
pub mod policy;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use coalescer::{Coalescer, FailureRecord};
pub use errors::RefreshError;
pub use gateway::{CacheDiagnostics, CacheGateway, CacheSnapshot, LatencyPolicy};
pub use policy::{
    ConfigError, NextEligible, RefreshDecision, RefreshReason, RefreshSchedule, RefreshStrategy,
};
pub use store::{CacheEntry, CacheStore};
