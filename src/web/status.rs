//! Health and status handlers.

use axum::extract::State;
use axum::response::{Json, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::trace;

use crate::cache::{CacheDiagnostics, LatencyPolicy, RefreshStrategy};
use crate::state::AppState;
use crate::web::routes::{cache, with_cache_control};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Serving cached data.
    Active,
    /// No successful fetch yet.
    Starting,
    /// Holding data, but the last attempt failed.
    Degraded,
}

impl ServiceStatus {
    fn from_diagnostics(diagnostics: &CacheDiagnostics) -> Self {
        let last_failed = match (&diagnostics.last_error, diagnostics.fetched_at) {
            (Some(failure), Some(fetched_at)) => failure.at > fetched_at,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if !diagnostics.has_cache {
            ServiceStatus::Starting
        } else if last_failed {
            ServiceStatus::Degraded
        } else {
            ServiceStatus::Active
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    status: ServiceStatus,
    version: String,
    commit: String,
    started_at: DateTime<Utc>,
    uptime_secs: u64,
    policy: PolicyInfo,
    cache: CacheDiagnostics,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInfo {
    mode: LatencyPolicy,
    timezone: String,
    strategy: &'static str,
    allowed_hours: Vec<u8>,
    ttl_secs: Option<u64>,
    emergency_threshold_secs: Option<u64>,
}

/// Health check endpoint
pub(super) async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

/// Build info plus cache diagnostics. Never triggers a refresh.
pub(super) async fn status(State(state): State<AppState>) -> Response {
    let gateway = &state.gateway;
    let diagnostics = gateway.peek().diagnostics;
    let schedule = gateway.schedule();

    let policy = match schedule.strategy() {
        RefreshStrategy::Ttl { ttl } => PolicyInfo {
            mode: gateway.latency(),
            timezone: schedule.timezone().name().to_owned(),
            strategy: "ttl",
            allowed_hours: Vec::new(),
            ttl_secs: Some(ttl.as_secs()),
            emergency_threshold_secs: None,
        },
        RefreshStrategy::Scheduled {
            allowed_hours,
            emergency_threshold,
        } => PolicyInfo {
            mode: gateway.latency(),
            timezone: schedule.timezone().name().to_owned(),
            strategy: "scheduled",
            allowed_hours: allowed_hours.iter().copied().collect(),
            ttl_secs: None,
            emergency_threshold_secs: emergency_threshold.map(|t| t.as_secs()),
        },
    };

    let now = Utc::now();
    with_cache_control(
        StatusResponse {
            status: ServiceStatus::from_diagnostics(&diagnostics),
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: env!("GIT_COMMIT_HASH").to_string(),
            started_at: state.started_at,
            uptime_secs: state.uptime(now).as_secs(),
            policy,
            cache: diagnostics,
        },
        cache::NO_STORE,
    )
}
