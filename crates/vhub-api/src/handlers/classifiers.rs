//! Classifier administration handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use vhub_engine::{ClassifierInfo, RegistryStats};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Classifier list response.
#[derive(Serialize)]
pub struct ClassifierListResponse {
    pub classifiers: Vec<ClassifierInfo>,
    pub total: usize,
}

/// Threshold update request.
#[derive(Debug, Deserialize)]
pub struct ThresholdRequest {
    pub confidence_threshold: f32,
}

pub async fn list_classifiers(State(state): State<AppState>) -> Json<ClassifierListResponse> {
    let classifiers = state.context.registry().list_classifiers().await;
    let total = classifiers.len();
    Json(ClassifierListResponse { classifiers, total })
}

pub async fn classifier_stats(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.context.registry().stats().await)
}

pub async fn get_classifier(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ClassifierInfo>> {
    Ok(Json(state.context.registry().classifier_info(&name).await?))
}

pub async fn enable_classifier(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ClassifierInfo>> {
    Ok(Json(state.context.registry().set_enabled(&name, true).await?))
}

pub async fn disable_classifier(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ClassifierInfo>> {
    Ok(Json(state.context.registry().set_enabled(&name, false).await?))
}

/// Load (or retry loading) the classifier's model.
pub async fn initialize_classifier(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ClassifierInfo>> {
    info!(classifier = %name, "Initialization requested via API");
    Ok(Json(state.context.registry().initialize_classifier(&name).await?))
}

pub async fn set_threshold(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ThresholdRequest>,
) -> ApiResult<Json<ClassifierInfo>> {
    if !request.confidence_threshold.is_finite() {
        return Err(ApiError::bad_request("confidence_threshold must be a finite number"));
    }
    Ok(Json(
        state
            .context
            .registry()
            .set_confidence_threshold(&name, request.confidence_threshold)
            .await?,
    ))
}
