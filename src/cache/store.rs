//! Process-wide holder for the last successfully fetched upstream payload.
//!
//! The entry is swapped as a whole through a `watch` channel, so readers get a
//! consistent `Arc<CacheEntry>` without ever waiting on a refresh. There is no
//! way to clear the store: a failed refresh simply never reaches it.

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Key added to object payloads recording when they were stored.
pub const CACHED_AT_KEY: &str = "cachedAt";

/// Immutable view of the cache state.
///
/// `payload`, `fetched_at` and a non-zero `call_count` are either all present
/// or all absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    pub payload: Option<Arc<Value>>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub call_count: u64,
    /// Hour of day, in the store's time zone, of the last successful refresh.
    pub last_refresh_hour: Option<u8>,
}

impl CacheEntry {
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Age of the payload at `now`, or `None` if nothing was ever fetched.
    /// Clamped at zero when the clock moved backwards.
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.fetched_at
            .map(|at| (now - at).max(chrono::Duration::zero()))
    }
}

pub struct CacheStore {
    rx: watch::Receiver<Arc<CacheEntry>>,
    tx: watch::Sender<Arc<CacheEntry>>,
    timezone: Tz,
}

impl CacheStore {
    /// Create an empty store. `timezone` decides what "hour of day" means for
    /// `last_refresh_hour`.
    pub fn new(timezone: Tz) -> Self {
        let (tx, rx) = watch::channel(Arc::new(CacheEntry::default()));
        Self { rx, tx, timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Current entry. Never blocks on a refresh.
    pub fn snapshot(&self) -> Arc<CacheEntry> {
        self.rx.borrow().clone()
    }

    /// Store a freshly fetched payload as of `now` and return the new entry.
    pub fn update(&self, payload: Value, now: DateTime<Utc>) -> Arc<CacheEntry> {
        let hour = now.with_timezone(&self.timezone).hour() as u8;
        let payload = Arc::new(stamp_cached_at(payload, now));

        let mut stored = None;
        self.tx.send_modify(|current| {
            let next = Arc::new(CacheEntry {
                payload: Some(payload),
                fetched_at: Some(now),
                call_count: current.call_count + 1,
                last_refresh_hour: Some(hour),
            });
            *current = Arc::clone(&next);
            stored = Some(next);
        });

        let stored = stored.unwrap_or_else(|| self.snapshot());
        debug!(
            call_count = stored.call_count,
            hour,
            "cache entry replaced"
        );
        stored
    }
}

/// Record the store time on object payloads; other JSON shapes pass through.
fn stamp_cached_at(payload: Value, now: DateTime<Utc>) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.insert(
                CACHED_AT_KEY.to_owned(),
                Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
            Value::Object(map)
        }
        other => other,
    }
}
