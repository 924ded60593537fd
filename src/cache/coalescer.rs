//! Single-flight refreshes.
//!
//! However many callers ask for a refresh at once, at most one upstream fetch
//! runs. The first caller installs an in-flight marker holding a shared handle
//! to a spawned fetch task; everyone who arrives while it is installed awaits
//! the same handle and observes the same result. The check and the install
//! happen under one lock acquisition.
//!
//! The fetch runs in its own task, so it finishes even if every caller stops
//! waiting. On completion the task updates the store (success only), records
//! any failure, and clears the marker, in that order, before the handle
//! resolves.
//!
//! Callers that decide to refresh from a snapshot they read earlier pass the
//! [`Observed`] token taken before that read. If any fetch settled in between,
//! the decision is out of date and no new fetch is started.

use super::clock::Clock;
use super::errors::RefreshError;
use super::store::{CacheEntry, CacheStore};
use crate::upstream::UpstreamFetcher;
use crate::utils::fmt_duration;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

type RefreshResult = Result<Arc<CacheEntry>, RefreshError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

/// Number of settled fetches at the moment a caller looked at the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observed(u64);

#[derive(Default)]
struct Slot {
    active: Option<InFlight>,
    /// Fetches whose marker has been cleared.
    settled: u64,
}

struct InFlight {
    attempt: u64,
    started_at: DateTime<Utc>,
    handle: SharedRefresh,
}

/// The most recent failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Shared refresh coordinator. Clone-cheap; all clones share one marker.
#[derive(Clone)]
pub struct Coalescer {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<CacheStore>,
    fetcher: Arc<dyn UpstreamFetcher>,
    clock: Arc<dyn Clock>,
    fetch_timeout: Duration,
    in_flight: Mutex<Slot>,
    attempts: AtomicU64,
    failures: AtomicU64,
    last_failure: Mutex<Option<FailureRecord>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Coalescer {
    pub fn new(
        store: Arc<CacheStore>,
        fetcher: Arc<dyn UpstreamFetcher>,
        clock: Arc<dyn Clock>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                fetcher,
                clock,
                fetch_timeout,
                in_flight: Mutex::new(Slot::default()),
                attempts: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                last_failure: Mutex::new(None),
            }),
        }
    }

    /// Refresh and wait for the result, joining an in-flight fetch if there
    /// is one. Must be called within a Tokio runtime.
    pub async fn refresh(&self) -> RefreshResult {
        let (handle, _) = self.join_or_start(None);
        handle.await
    }

    /// Start a refresh (or join the running one) without waiting for it.
    /// Returns `true` if this call started a new upstream fetch.
    pub fn trigger(&self) -> bool {
        let (_, started) = self.join_or_start(None);
        started
    }

    /// Mark the point a caller reads the store to decide whether to refresh.
    /// Take it before the read.
    pub fn observe(&self) -> Observed {
        Observed(lock(&self.inner.in_flight).settled)
    }

    /// Like [`refresh`](Self::refresh), but if a fetch settled after
    /// `observed` no new one starts and the current entry is returned.
    pub async fn refresh_since(&self, observed: Observed) -> RefreshResult {
        let (handle, _) = self.join_or_start(Some(observed));
        handle.await
    }

    /// Like [`trigger`](Self::trigger), with the same staleness check as
    /// [`refresh_since`](Self::refresh_since).
    pub fn trigger_since(&self, observed: Observed) -> bool {
        let (_, started) = self.join_or_start(Some(observed));
        started
    }

    /// Whether an upstream fetch is currently running.
    pub fn in_flight(&self) -> bool {
        lock(&self.inner.in_flight).active.is_some()
    }

    /// Start time of the running fetch, if any.
    pub fn in_flight_since(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.in_flight)
            .active
            .as_ref()
            .map(|f| f.started_at)
    }

    /// Upstream fetches started since process start.
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// Upstream fetches that failed or timed out.
    pub fn failures(&self) -> u64 {
        self.inner.failures.load(Ordering::Acquire)
    }

    pub fn last_failure(&self) -> Option<FailureRecord> {
        lock(&self.inner.last_failure).clone()
    }

    fn join_or_start(&self, observed: Option<Observed>) -> (SharedRefresh, bool) {
        let mut slot = lock(&self.inner.in_flight);
        if let Some(active) = slot.active.as_ref() {
            debug!(attempt = active.attempt, "Refresh already in flight, joining");
            return (active.handle.clone(), false);
        }

        // The store is updated before `settled` moves, both ahead of this lock.
        if observed.is_some_and(|Observed(seen)| seen != slot.settled) {
            debug!("A refresh settled since the caller looked, not starting another");
            let current = self.inner.store.snapshot();
            return (future::ready(Ok(current)).boxed().shared(), false);
        }

        let attempt = self.inner.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        let started_at = self.inner.clock.now();
        // The task's marker cleanup takes the same lock, so it can't run
        // before the marker below is installed.
        let task = tokio::spawn(Arc::clone(&self.inner).run(attempt));
        let handle = async move {
            task.await
                .unwrap_or_else(|e| Err(RefreshError::Aborted(e.to_string())))
        }
        .boxed()
        .shared();

        slot.active = Some(InFlight {
            attempt,
            started_at,
            handle: handle.clone(),
        });
        (handle, true)
    }
}

/// Clears the in-flight marker when the fetch task ends, including by panic.
struct MarkerGuard<'a> {
    inner: &'a Inner,
    attempt: u64,
}

impl Drop for MarkerGuard<'_> {
    fn drop(&mut self) {
        let mut slot = lock(&self.inner.in_flight);
        if slot.active.as_ref().is_some_and(|f| f.attempt == self.attempt) {
            slot.active = None;
            slot.settled += 1;
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>, attempt: u64) -> RefreshResult {
        let _marker = MarkerGuard {
            inner: &*self,
            attempt,
        };
        let start = Instant::now();
        debug!(attempt, "Upstream refresh started");

        let outcome = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch()).await {
            Ok(Ok(payload)) => Ok(self.store.update(payload, self.clock.now())),
            Ok(Err(e)) => Err(RefreshError::Upstream(Arc::new(e))),
            Err(_) => Err(RefreshError::Timeout(self.fetch_timeout)),
        };

        match &outcome {
            Ok(entry) => {
                info!(
                    attempt,
                    call_count = entry.call_count,
                    elapsed = fmt_duration(start.elapsed()),
                    "Holiday cache refreshed"
                );
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::AcqRel);
                *lock(&self.last_failure) = Some(FailureRecord {
                    at: self.clock.now(),
                    message: e.to_string(),
                });
                error!(
                    attempt,
                    error = %e,
                    elapsed = fmt_duration(start.elapsed()),
                    "Failed to refresh holiday cache"
                );
            }
        }

        outcome
    }
}
