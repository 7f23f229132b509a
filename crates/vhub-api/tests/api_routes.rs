//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use vhub_api::{create_router, ApiConfig, AppState};
use vhub_engine::backends::{StubModelLoader, SyntheticFrameSource};
use vhub_engine::{AnalysisContext, EngineConfig, FrameSource, LatestFrameSlot};

async fn app_with_frames(frames: Arc<dyn FrameSource>) -> (Router, Arc<AnalysisContext>) {
    let mut config = EngineConfig::default();
    config.cache.ttl = Duration::from_secs(5);
    let context = Arc::new(AnalysisContext::new(
        config,
        Arc::new(StubModelLoader::demo()),
        frames,
    ));
    context.initialize().await.unwrap();
    let state = AppState::new(ApiConfig::default(), Arc::clone(&context));
    (create_router(state, None), context)
}

async fn app() -> (Router, Arc<AnalysisContext>) {
    app_with_frames(Arc::new(SyntheticFrameSource::new(640, 480))).await
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_health_ready_and_request_ids() {
    let (app, _) = app().await;
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/cache/stats")
                .header("x-request-id", "cam-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "cam-42");

    let (status, body) = send(&app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["classifiers"]["initialized"], 3);
    assert_eq!(body["latest_frame_id"], Value::Null);

    send(&app, "POST", "/api/analyze", Some(json!({ "classifiers": ["person"] }))).await;
    let (_, body) = send(&app, "GET", "/ready", None).await;
    assert!(body["latest_frame_id"].is_u64());
}

#[tokio::test]
async fn test_not_ready_after_shutdown() {
    let (app, context) = app().await;
    context.shutdown().await;

    let (status, body) = send(&app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn test_cors_preflight_allows_dashboard_origin() {
    let (app, _) = app().await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/analyze")
                .header("origin", "http://dashboard.local")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_analyze_then_latest() {
    let (app, _) = app().await;

    let (status, _) = send(&app, "GET", "/api/results/latest", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        "POST",
        "/api/analyze",
        Some(json!({ "classifiers": ["person", "face"], "options": { "include_3d_position": true } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cache_hit"], false);
    assert_eq!(body["frame_resolution"], json!([640, 480]));
    assert_eq!(body["detections"]["person"].as_array().unwrap().len(), 1);
    assert_eq!(body["detections"]["face"].as_array().unwrap().len(), 1);
    assert_eq!(body["detections"]["person"][0]["depth_mm"], 2000.0);

    let frame_id = body["frame_id"].clone();
    let (status, latest) = send(&app, "GET", "/api/results/latest", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["frame_id"], frame_id);

    let (status, stats) = send(&app, "GET", "/api/pipeline/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_requests"], 1);
}

#[tokio::test]
async fn test_analyze_rejects_empty_classifier_list() {
    let (app, _) = app().await;
    let (status, body) = send(&app, "POST", "/api/analyze", Some(json!({ "classifiers": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_analyze_without_frame_is_unavailable() {
    let (app, _) = app_with_frames(Arc::new(LatestFrameSlot::new())).await;
    let (status, body) = send(&app, "POST", "/api/analyze", Some(json!({ "classifiers": ["person"] }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "no_frame");
}

#[tokio::test]
async fn test_classifier_administration() {
    let (app, context) = app().await;

    let (status, body) = send(&app, "GET", "/api/classifiers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);

    let (status, _) = send(&app, "GET", "/api/classifiers/doorbell", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "POST", "/api/classifiers/face/disable", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);
    assert_eq!(context.registry().stats().await.enabled, 2);

    let (status, body) = send(&app, "POST", "/api/classifiers/face/enable", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], true);

    let (status, body) = send(
        &app,
        "PUT",
        "/api/classifiers/person/threshold",
        Some(json!({ "confidence_threshold": 1.7 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["confidence_threshold"], 1.0);

    let (status, body) = send(&app, "POST", "/api/classifiers/object/initialize", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["initialized"], true);

    let (status, body) = send(&app, "GET", "/api/classifiers/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registered"], 3);
    assert_eq!(body["loaded_models"], 2);
}

#[tokio::test]
async fn test_cache_stats_and_clear() {
    let (app, _) = app().await;
    let request = json!({ "classifiers": ["object"] });

    send(&app, "POST", "/api/analyze", Some(request.clone())).await;
    let (_, second) = send(&app, "POST", "/api/analyze", Some(request)).await;
    assert_eq!(second["cache_hit"], true);

    let (status, stats) = send(&app, "GET", "/api/cache/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["size"], 1);
    assert_eq!(stats["hits"], 1);

    let (status, body) = send(&app, "DELETE", "/api/cache", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], 1);

    let (_, stats) = send(&app, "GET", "/api/cache/stats", None).await;
    assert_eq!(stats["size"], 0);
}
