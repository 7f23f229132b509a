//! Result cache handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::info;
use vhub_engine::CacheStats;

use crate::state::AppState;

#[derive(Serialize)]
pub struct ClearCacheResponse {
    pub cleared: usize,
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.context.cache().stats())
}

pub async fn clear_cache(State(state): State<AppState>) -> Json<ClearCacheResponse> {
    let cleared = state.context.cache().clear();
    info!(cleared, "Result cache cleared via API");
    Json(ClearCacheResponse { cleared })
}
