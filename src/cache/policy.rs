//! Refresh decisions: when the cached payload should be fetched again.
//!
//! Two strategies share one [`RefreshSchedule`]:
//!
//! - **TTL**: refresh whenever the payload is older than a fixed age.
//! - **Scheduled**: refresh at most once per allowed local hour, with an
//!   optional emergency threshold that forces a refresh at any hour once the
//!   payload gets too old.
//!
//! An empty cache is always due. Evaluation is pure: it reads a
//! [`CacheEntry`] and the current time, nothing else.

use super::store::CacheEntry;
use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "no refresh policy configured: set REFRESH_ALLOWED_HOURS, REFRESH_TTL or REFRESH_EMERGENCY_THRESHOLD"
    )]
    NoRefreshPolicy,
    #[error("refresh hour {0} is outside 0..=23")]
    HourOutOfRange(u8),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStrategy {
    Ttl {
        ttl: Duration,
    },
    Scheduled {
        allowed_hours: BTreeSet<u8>,
        emergency_threshold: Option<Duration>,
    },
}

/// Why a refresh is (or is not) due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RefreshReason {
    /// Regular refresh: TTL expiry or a new allowed hour.
    Scheduled,
    /// Empty cache, or a payload older than the emergency threshold.
    Emergency,
    NotDue,
}

/// Earliest moment the schedule would refresh again. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextEligible {
    pub at: DateTime<Utc>,
    /// Local hour of `at` in the schedule's time zone.
    pub hour: u8,
    /// `at` falls on a later local day than the evaluation time.
    pub next_day: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshDecision {
    pub due: bool,
    pub reason: RefreshReason,
    pub next_eligible: NextEligible,
}

#[derive(Debug, Clone)]
pub struct RefreshSchedule {
    strategy: RefreshStrategy,
    timezone: Tz,
}

impl RefreshSchedule {
    pub fn ttl(ttl: Duration, timezone: Tz) -> Result<Self, ConfigError> {
        if ttl.is_zero() {
            return Err(ConfigError::ZeroDuration("REFRESH_TTL"));
        }
        Ok(Self {
            strategy: RefreshStrategy::Ttl { ttl },
            timezone,
        })
    }

    pub fn scheduled(
        allowed_hours: impl IntoIterator<Item = u8>,
        emergency_threshold: Option<Duration>,
        timezone: Tz,
    ) -> Result<Self, ConfigError> {
        let allowed_hours: BTreeSet<u8> = allowed_hours.into_iter().collect();
        if let Some(&hour) = allowed_hours.iter().find(|&&h| h > 23) {
            return Err(ConfigError::HourOutOfRange(hour));
        }
        if allowed_hours.is_empty() {
            return Err(ConfigError::NoRefreshPolicy);
        }
        if emergency_threshold.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroDuration("REFRESH_EMERGENCY_THRESHOLD"));
        }
        Ok(Self {
            strategy: RefreshStrategy::Scheduled {
                allowed_hours,
                emergency_threshold,
            },
            timezone,
        })
    }

    /// Pick a strategy from raw configuration values.
    ///
    /// Non-empty `allowed_hours` selects the scheduled strategy (the TTL is
    /// then unused). Otherwise the TTL strategy is used, falling back to the
    /// emergency threshold as the TTL. With none of the three set the cache
    /// would refresh once and never again, which is rejected.
    pub fn from_parts(
        allowed_hours: &[u8],
        ttl: Option<Duration>,
        emergency_threshold: Option<Duration>,
        timezone: Tz,
    ) -> Result<Self, ConfigError> {
        if !allowed_hours.is_empty() {
            return Self::scheduled(allowed_hours.iter().copied(), emergency_threshold, timezone);
        }
        match ttl.or(emergency_threshold) {
            Some(ttl) => Self::ttl(ttl, timezone),
            None => Err(ConfigError::NoRefreshPolicy),
        }
    }

    pub fn strategy(&self) -> &RefreshStrategy {
        &self.strategy
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Decide whether `entry` should be refreshed at `now`.
    pub fn evaluate(&self, now: DateTime<Utc>, entry: &CacheEntry) -> RefreshDecision {
        let next_eligible = self.next_eligible(now, entry);
        let decide = |due, reason| RefreshDecision {
            due,
            reason,
            next_eligible,
        };

        let Some(fetched_at) = entry.fetched_at.filter(|_| entry.has_payload()) else {
            return decide(true, RefreshReason::Emergency);
        };
        let age = now - fetched_at;

        match &self.strategy {
            RefreshStrategy::Ttl { ttl } => {
                if age > to_delta(*ttl) {
                    decide(true, RefreshReason::Scheduled)
                } else {
                    decide(false, RefreshReason::NotDue)
                }
            }
            RefreshStrategy::Scheduled {
                allowed_hours,
                emergency_threshold,
            } => {
                if emergency_threshold.is_some_and(|limit| age > to_delta(limit)) {
                    return decide(true, RefreshReason::Emergency);
                }

                let local_now = now.with_timezone(&self.timezone);
                if !allowed_hours.contains(&(local_now.hour() as u8)) {
                    return decide(false, RefreshReason::NotDue);
                }

                // One scheduled refresh per (local date, hour) slot.
                let local_fetch = fetched_at.with_timezone(&self.timezone);
                let same_slot = local_fetch.date_naive() == local_now.date_naive()
                    && local_fetch.hour() == local_now.hour();
                if same_slot {
                    decide(false, RefreshReason::NotDue)
                } else {
                    decide(true, RefreshReason::Scheduled)
                }
            }
        }
    }

    /// Compute the advisory next refresh time for diagnostics.
    pub fn next_eligible(&self, now: DateTime<Utc>, entry: &CacheEntry) -> NextEligible {
        let local_now = now.with_timezone(&self.timezone);

        match &self.strategy {
            RefreshStrategy::Ttl { ttl } => {
                let at = entry
                    .fetched_at
                    .map(|fetched_at| fetched_at + to_delta(*ttl))
                    .unwrap_or(now);
                let local_at = at.with_timezone(&self.timezone);
                NextEligible {
                    at,
                    hour: local_at.hour() as u8,
                    next_day: local_at.date_naive() > local_now.date_naive(),
                }
            }
            RefreshStrategy::Scheduled { allowed_hours, .. } => {
                let current = local_now.hour() as u8;
                let (hour, next_day) = match allowed_hours.range(current + 1..).next() {
                    Some(&hour) => (hour, false),
                    None => match allowed_hours.first() {
                        Some(&hour) => (hour, true),
                        None => (current, false),
                    },
                };

                let today = local_now.date_naive();
                let date = if next_day {
                    today.succ_opt().unwrap_or(today)
                } else {
                    today
                };

                NextEligible {
                    at: local_hour_start(self.timezone, date, hour).unwrap_or(now),
                    hour,
                    next_day,
                }
            }
        }
    }
}

/// Start of `hour` on `date` in `tz`. Hours skipped by a DST transition
/// resolve to the following hour.
fn local_hour_start(tz: Tz, date: NaiveDate, hour: u8) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(hour.into(), 0, 0)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + TimeDelta::hours(1))).earliest())
        .map(|local| local.with_timezone(&Utc))
}

/// Configured durations are capped at a century so date arithmetic can't overflow.
fn to_delta(d: Duration) -> TimeDelta {
    let cap = TimeDelta::days(36_500);
    TimeDelta::from_std(d).map_or(cap, |delta| delta.min(cap))
}
