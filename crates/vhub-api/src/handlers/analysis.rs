//! Analysis API handlers.

use axum::extract::State;
use axum::Json;
use tracing::debug;
use vhub_engine::PipelineStats;
use vhub_models::{AnalysisRequest, AnalysisResult};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Analyze the latest camera frame.
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> ApiResult<Json<AnalysisResult>> {
    let result = state.context.process_request(&request).await?;
    debug!(
        frame_id = result.frame_id,
        cache_hit = result.cache_hit,
        detections = result.detection_count(),
        "Analysis served"
    );
    Ok(Json(result))
}

/// Most recent freshly computed result.
pub async fn latest_result(State(state): State<AppState>) -> ApiResult<Json<AnalysisResult>> {
    state
        .context
        .latest_result()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No analysis result available yet"))
}

pub async fn pipeline_stats(State(state): State<AppState>) -> Json<PipelineStats> {
    Json(state.context.pipeline().stats())
}
