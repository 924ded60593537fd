//! Time source for the cache components.

use chrono::{DateTime, Utc};

/// Supplies wall-clock time. Injected so refresh decisions can be driven
/// deterministically in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
