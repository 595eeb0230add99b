//! Health and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "proxyladder"
        })),
    )
}

/// Uptime, pool level, and configured tiers
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.pool.stats();
    let min = state.pool.config().min_pool_size;

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "pool": {
            "available": stats.currently_healthy,
            "min_pool_size": min,
            "below_minimum": stats.currently_healthy < min,
            "last_refresh": stats.last_refresh,
        },
        "tiers": {
            "backends": state.fetcher.backend_names(),
            "count": state.fetcher.tier_count(),
        }
    }))
}
