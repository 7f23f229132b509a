//! Liveness and readiness checks.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use vhub_engine::RegistryStats;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Liveness: the process is serving requests.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub classifiers: RegistryStats,
    pub active_connections: usize,
    /// Frame id of the most recent analysis, if any has run.
    pub latest_frame_id: Option<u64>,
}

/// Readiness: at least one classifier holds a loaded model and the engine is
/// not shutting down. Otherwise 503 with the same body.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let context = &state.context;
    let classifiers = context.registry().stats().await;
    let is_ready = classifiers.initialized > 0 && !context.is_shutting_down();

    let response = ReadinessResponse {
        status: if is_ready { "ready" } else { "degraded" },
        classifiers,
        active_connections: context.broadcast().connection_count().await,
        latest_frame_id: context.latest_result().map(|r| r.frame_id),
    };

    if is_ready {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
