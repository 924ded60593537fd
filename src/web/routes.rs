//! Web API router construction and shared response utilities.

use axum::{
    Router,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use std::time::Duration;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer};

use crate::state::AppState;
use crate::web::middleware::cache_headers::CacheHeadersLayer;
use crate::web::middleware::request_id::RequestIdLayer;
use crate::web::{holidays, status};

/// Cache-Control presets.
pub mod cache {
    /// Snapshots and diagnostics change per request; downstream caches must
    /// not pin them.
    pub const NO_STORE: &str = "no-store";
}

/// Wraps a JSON response with a `Cache-Control` header.
pub fn with_cache_control<T: serde::Serialize>(value: T, header: &'static str) -> Response {
    let mut response = Json(value).into_response();
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static(header),
    );
    response
}

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/holidays", get(holidays::get_holidays))
        .with_state(app_state.clone());

    // Only the holiday pages pay for a gateway consultation per request.
    let page_router = Router::new()
        .route("/holiday-test", get(holidays::holiday_page))
        .route("/holiday-test/{*rest}", get(holidays::holiday_page))
        .layer(CacheHeadersLayer::new(app_state.gateway.clone()));

    Router::new()
        .nest("/api", api_router)
        .merge(page_router)
        .layer((
            // Outermost: per-request ID span + severity-proportional response logging.
            RequestIdLayer,
            CompressionLayer::new()
                .br(true)
                .gzip(true)
                .quality(tower_http::CompressionLevel::Fastest),
            TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)),
        ))
}
