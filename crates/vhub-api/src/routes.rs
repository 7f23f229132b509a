//! API routes.

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;

use crate::handlers::{
    analyze, cache_stats, classifier_stats, clear_cache, disable_classifier, enable_classifier,
    get_classifier, health, initialize_classifier, latest_result, list_classifiers,
    pipeline_stats, ready, set_threshold,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_logging};
use crate::state::AppState;
use crate::ws::ws_analysis;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let analysis_routes = Router::new()
        .route("/analyze", post(analyze))
        .route("/results/latest", get(latest_result))
        .route("/pipeline/stats", get(pipeline_stats));

    let classifier_routes = Router::new()
        .route("/classifiers", get(list_classifiers))
        .route("/classifiers/stats", get(classifier_stats))
        .route("/classifiers/:name", get(get_classifier))
        .route("/classifiers/:name/enable", post(enable_classifier))
        .route("/classifiers/:name/disable", post(disable_classifier))
        .route("/classifiers/:name/initialize", post(initialize_classifier))
        .route("/classifiers/:name/threshold", put(set_threshold));

    let cache_routes = Router::new()
        .route("/cache", delete(clear_cache))
        .route("/cache/stats", get(cache_stats));

    // Long-lived WebSocket connections must not be cut by the request timeout
    let api_routes = Router::new()
        .merge(analysis_routes)
        .merge(classifier_routes)
        .merge(cache_routes)
        .layer(TimeoutLayer::new(state.config.request_timeout));

    let ws_routes = Router::new().route("/ws", get(ws_analysis));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_logging))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
