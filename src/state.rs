//! Application state shared across request handlers.

use crate::cache::{CacheGateway, CacheStore, Clock, Coalescer, RefreshSchedule};
use crate::config::Config;
use crate::upstream::UpstreamFetcher;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<CacheGateway>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire the store, coalescer and gateway around one fetcher.
    pub fn new(
        config: &Config,
        schedule: RefreshSchedule,
        fetcher: Arc<dyn UpstreamFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(CacheStore::new(config.refresh_timezone));
        let coalescer = Coalescer::new(
            store.clone(),
            fetcher,
            clock.clone(),
            config.upstream_timeout,
        );
        let gateway = CacheGateway::new(
            store,
            coalescer,
            schedule,
            config.refresh_mode,
            config.refresh_failure_cooldown,
            clock.clone(),
        );

        Self::from_gateway(Arc::new(gateway), clock.now())
    }

    pub fn from_gateway(gateway: Arc<CacheGateway>, started_at: DateTime<Utc>) -> Self {
        Self {
            gateway,
            started_at,
        }
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or_default()
    }
}
