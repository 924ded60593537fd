//! Per-request entry point to the holiday cache.
//!
//! Every request evaluates the refresh schedule, kicks off (or waits for) a
//! coalesced refresh when one is due, then answers from the store. The
//! gateway never fails: with nothing cached yet it returns an empty snapshot.

use super::clock::Clock;
use super::coalescer::{Coalescer, FailureRecord};
use super::policy::{NextEligible, RefreshDecision, RefreshReason, RefreshSchedule};
use super::store::{CacheEntry, CacheStore};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// How a request that finds the cache due treats its own refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LatencyPolicy {
    /// Start the refresh in the background and answer from the current store.
    #[default]
    NonBlocking,
    /// Wait for the refresh before answering.
    Blocking,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDiagnostics {
    pub has_cache: bool,
    pub fetched_at: Option<DateTime<Utc>>,
    pub call_count: u64,
    pub cache_age_ms: Option<i64>,
    pub last_refresh_hour: Option<u8>,
    /// Whether the schedule considered a refresh due for this request.
    pub due: bool,
    pub reason: RefreshReason,
    pub next_eligible: NextEligible,
    /// A due refresh was skipped because the last attempt failed recently.
    pub cooling_down: bool,
    pub refreshing: bool,
    pub upstream_attempts: u64,
    pub upstream_failures: u64,
    pub last_error: Option<FailureRecord>,
}

/// What a request gets back: the payload, if any, plus provenance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub payload: Option<Arc<Value>>,
    pub diagnostics: CacheDiagnostics,
}

impl CacheSnapshot {
    /// Nothing has been fetched successfully yet.
    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }
}

pub struct CacheGateway {
    store: Arc<CacheStore>,
    coalescer: Coalescer,
    schedule: RefreshSchedule,
    latency: LatencyPolicy,
    failure_cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl CacheGateway {
    pub fn new(
        store: Arc<CacheStore>,
        coalescer: Coalescer,
        schedule: RefreshSchedule,
        latency: LatencyPolicy,
        failure_cooldown: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            coalescer,
            schedule,
            latency,
            failure_cooldown,
            clock,
        }
    }

    pub fn latency(&self) -> LatencyPolicy {
        self.latency
    }

    pub fn schedule(&self) -> &RefreshSchedule {
        &self.schedule
    }

    pub fn coalescer(&self) -> &Coalescer {
        &self.coalescer
    }

    /// Answer one request at the current time.
    pub async fn serve(&self) -> CacheSnapshot {
        self.serve_at(self.clock.now()).await
    }

    /// Answer one request as of `now`.
    pub async fn serve_at(&self, now: DateTime<Utc>) -> CacheSnapshot {
        let observed = self.coalescer.observe();
        let entry = self.store.snapshot();
        let decision = self.schedule.evaluate(now, &entry);
        let cooling_down = decision.due && self.cooling_down(now, &entry);

        // A running fetch is always joined; only new attempts wait out the cooldown.
        if decision.due && (!cooling_down || self.coalescer.in_flight()) {
            match self.latency {
                LatencyPolicy::NonBlocking => {
                    if self.coalescer.trigger_since(observed) {
                        debug!(reason = ?decision.reason, "Holiday cache refresh triggered");
                    }
                }
                LatencyPolicy::Blocking => {
                    if let Err(e) = self.coalescer.refresh_since(observed).await {
                        warn!(error = %e, has_cache = entry.has_payload(), "Serving holiday cache without a fresh refresh");
                    }
                }
            }
        } else if cooling_down {
            debug!(
                cooldown_secs = self.failure_cooldown.as_secs(),
                "Refresh due but last attempt failed recently, skipping"
            );
        } else {
            trace!("Serving cached holiday data");
        }

        self.assemble(now, self.store.snapshot(), decision, cooling_down)
    }

    /// Current state without evaluating or triggering a refresh.
    pub fn peek(&self) -> CacheSnapshot {
        let now = self.clock.now();
        let entry = self.store.snapshot();
        let decision = self.schedule.evaluate(now, &entry);
        let cooling_down = decision.due && self.cooling_down(now, &entry);
        self.assemble(now, entry, decision, cooling_down)
    }

    /// The last attempt failed after the last success, within the cooldown.
    fn cooling_down(&self, now: DateTime<Utc>, entry: &CacheEntry) -> bool {
        let Some(failure) = self.coalescer.last_failure() else {
            return false;
        };
        let cooldown = TimeDelta::from_std(self.failure_cooldown).unwrap_or(TimeDelta::zero());
        entry.fetched_at.is_none_or(|at| failure.at > at) && now - failure.at < cooldown
    }

    fn assemble(
        &self,
        now: DateTime<Utc>,
        entry: Arc<CacheEntry>,
        decision: RefreshDecision,
        cooling_down: bool,
    ) -> CacheSnapshot {
        let diagnostics = CacheDiagnostics {
            has_cache: entry.has_payload(),
            fetched_at: entry.fetched_at,
            call_count: entry.call_count,
            cache_age_ms: entry.age(now).map(|age| age.num_milliseconds()),
            last_refresh_hour: entry.last_refresh_hour,
            due: decision.due,
            reason: decision.reason,
            next_eligible: self.schedule.next_eligible(now, &entry),
            cooling_down,
            refreshing: self.coalescer.in_flight(),
            upstream_attempts: self.coalescer.attempts(),
            upstream_failures: self.coalescer.failures(),
            last_error: self.coalescer.last_failure(),
        };

        CacheSnapshot {
            payload: entry.payload.clone(),
            diagnostics,
        }
    }
}
