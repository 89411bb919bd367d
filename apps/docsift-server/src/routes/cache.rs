//! Cache administration
//!
//! - GET /cache/stats
//! - DELETE /cache/:fingerprint

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;

use crate::document::Fingerprint;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::store::StoreStats;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsResponse {
    #[serde(flatten)]
    pub stats: StoreStats,
    /// Entry lifetime; absent when entries never expire
    pub ttl_secs: Option<u64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cache/stats", get(cache_stats))
        .route("/cache/:fingerprint", delete(invalidate))
}

async fn cache_stats(State(state): State<AppState>) -> Result<Json<CacheStatsResponse>> {
    let stats = state.extraction().stats().await?;
    let ttl_secs = state.config().cache.ttl().map(|ttl| ttl.as_secs());

    Ok(Json(CacheStatsResponse { stats, ttl_secs }))
}

/// Idempotent: 204 whether or not an entry existed
async fn invalidate(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Result<StatusCode> {
    let fingerprint: Fingerprint = fingerprint
        .parse()
        .map_err(|e: crate::document::InvalidFingerprint| AppError::BadRequest(e.to_string()))?;

    state.extraction().invalidate(&fingerprint).await?;
    Ok(StatusCode::NO_CONTENT)
}
