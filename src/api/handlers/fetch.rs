//! Diagnostic fetch endpoint

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::server::AppState;
use crate::error::{LadderError, Result};
use crate::models::{FetchAttempt, Tier};

#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub url: String,
}

/// What happened, without the page itself
#[derive(Debug, Serialize)]
pub struct FetchReport {
    pub url: String,
    pub tier: Tier,
    pub content_bytes: usize,
    pub attempts: Vec<FetchAttempt>,
}

/// Run one orchestrated fetch and report the tier that delivered
pub async fn fetch_url(
    State(state): State<AppState>,
    Json(req): Json<FetchRequest>,
) -> Result<Json<FetchReport>> {
    let url = req.url.trim();
    if url.is_empty() {
        return Err(LadderError::InvalidRequest("url is required".to_string()));
    }

    let page = state.fetcher.fetch(url).await?;

    Ok(Json(FetchReport {
        content_bytes: page.content.len(),
        url: page.url,
        tier: page.tier,
        attempts: page.attempts,
    }))
}
