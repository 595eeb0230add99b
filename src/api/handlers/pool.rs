//! Pool inspection and operator recovery

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::info;

use crate::api::server::AppState;

/// Current pool counters
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pool.stats())
}

/// Start a forced refresh in the background. Sourcing and validation take
/// minutes, so the caller polls `/api/pool/stats` instead of waiting.
pub async fn refresh(State(state): State<AppState>) -> impl IntoResponse {
    info!("Operator requested pool refresh");

    let pool = state.pool.clone();
    tokio::spawn(async move {
        pool.force_refresh().await;
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "refresh_started" })),
    )
}
