//! Configuration module for the holiday-cache application.
//!
//! Values come from an optional `holiday-cache.toml` in the working directory,
//! overridden by environment variables (read raw, e.g. `REFRESH_TTL`).

use crate::cache::{ConfigError, LatencyPolicy, RefreshSchedule};
use crate::upstream::HolidayApiConfig;
use chrono_tz::Tz;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Optional file merged beneath the environment.
pub const CONFIG_FILE: &str = "holiday-cache.toml";

const DEFAULT_UPSTREAM_BASE_URL: &str =
    "https://apis.data.go.kr/B090041/openapi/service/SpcdeInfoService";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Log level for this crate's targets; `RUST_LOG` overrides it entirely.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Grace period for in-flight requests on shutdown.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,
    pub upstream_service_key: String,
    #[serde(default = "default_rows_per_page")]
    pub upstream_rows_per_page: u32,
    #[serde(
        default = "default_upstream_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub upstream_timeout: Duration,
    #[serde(default = "default_requests_per_minute")]
    pub upstream_requests_per_minute: u32,
    #[serde(default)]
    pub upstream_year: Option<i32>,

    /// Local hours at which a scheduled refresh may run, e.g. `10,12,14`.
    #[serde(default, deserialize_with = "deserialize_hours")]
    pub refresh_allowed_hours: Vec<u8>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub refresh_ttl: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub refresh_emergency_threshold: Option<Duration>,
    #[serde(
        default = "default_timezone",
        deserialize_with = "deserialize_timezone"
    )]
    pub refresh_timezone: Tz,
    #[serde(default)]
    pub refresh_mode: LatencyPolicy,
    #[serde(
        default = "default_failure_cooldown",
        deserialize_with = "deserialize_duration"
    )]
    pub refresh_failure_cooldown: Duration,
    #[serde(default = "default_true")]
    pub refresh_warm_on_start: bool,
}

impl Config {
    /// The provider stack: TOML file first, environment on top.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::raw())
    }

    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Build the refresh schedule, rejecting configurations that would never
    /// refresh after the first fetch.
    pub fn refresh_schedule(&self) -> Result<RefreshSchedule, ConfigError> {
        RefreshSchedule::from_parts(
            &self.refresh_allowed_hours,
            self.refresh_ttl,
            self.refresh_emergency_threshold,
            self.refresh_timezone,
        )
    }

    /// A TTL that has no effect because allowed hours select scheduled mode.
    pub fn ignored_ttl(&self) -> Option<Duration> {
        self.refresh_ttl
            .filter(|_| !self.refresh_allowed_hours.is_empty())
    }

    pub fn holiday_api(&self) -> HolidayApiConfig {
        HolidayApiConfig {
            base_url: self.upstream_base_url.clone(),
            service_key: self.upstream_service_key.clone(),
            rows_per_page: self.upstream_rows_per_page,
            year: self.upstream_year,
            timezone: self.refresh_timezone,
            requests_per_minute: self.upstream_requests_per_minute,
            timeout: self.upstream_timeout,
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_upstream_base_url() -> String {
    DEFAULT_UPSTREAM_BASE_URL.to_owned()
}

fn default_rows_per_page() -> u32 {
    30
}

fn default_upstream_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_timezone() -> Tz {
    chrono_tz::Asia::Seoul
}

fn default_failure_cooldown() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

/// Parse a human duration such as `90s`, `15m`, `6h` or `2d`. A bare number
/// is read as seconds.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let parser = DurationParser::with_time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
    ]);
    let parsed = parser
        .parse(text.trim())
        .map_err(|e| format!("invalid duration '{text}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{text}': {e}"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationInput {
    Seconds(u64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match DurationInput::deserialize(deserializer)? {
        DurationInput::Seconds(secs) => Ok(Duration::from_secs(secs)),
        DurationInput::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<DurationInput>::deserialize(deserializer)? {
        None => Ok(None),
        Some(DurationInput::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(DurationInput::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(DurationInput::Text(text)) => parse_duration(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HoursInput {
    List(Vec<u8>),
    Single(u8),
    Text(String),
}

/// Accepts a list, a single hour, or a comma/space separated string.
fn deserialize_hours<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    match HoursInput::deserialize(deserializer)? {
        HoursInput::List(hours) => Ok(hours),
        HoursInput::Single(hour) => Ok(vec![hour]),
        HoursInput::Text(text) => parse_hours(&text).map_err(serde::de::Error::custom),
    }
}

/// Parse `"10,12, 14"` into hours. Range checking happens when the schedule
/// is built.
pub fn parse_hours(text: &str) -> Result<Vec<u8>, String> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u8>()
                .map_err(|_| format!("invalid refresh hour '{part}'"))
        })
        .collect()
}

fn deserialize_timezone<'de, D>(deserializer: D) -> Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    name.trim()
        .parse::<Tz>()
        .map_err(|e| serde::de::Error::custom(format!("unknown time zone '{name}': {e}")))
}
