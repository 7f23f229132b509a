//! Prometheus metrics for the API server.
//!
//! HTTP requests are labelled by route template (`/api/classifiers/:name`),
//! so per-classifier paths do not explode label cardinality. Engine metrics
//! are recorded by `vhub_engine::metrics` into the same recorder.

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return the handle `/metrics` renders.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "vhub_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vhub_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vhub_http_requests_in_flight";

    pub const WS_CONNECTIONS_TOTAL: &str = "vhub_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "vhub_ws_connections_active";
    pub const WS_MESSAGES_SENT: &str = "vhub_ws_messages_sent_total";
    pub const WS_MESSAGES_RECEIVED: &str = "vhub_ws_messages_received_total";
}

/// Label used for requests that matched no route.
const UNMATCHED_ROUTE: &str = "unmatched";

pub fn record_http_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status", status.to_string()),
    ];
    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_ws_connection() {
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
}

pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

/// Count an outbound WS message by its `type` (`analysis_result`, `pong`, ...).
pub fn record_ws_message_sent(message_type: &str) {
    counter!(names::WS_MESSAGES_SENT, "type" => message_type.to_string()).increment(1);
}

pub fn record_ws_message_received() {
    counter!(names::WS_MESSAGES_RECEIVED).increment(1);
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or(UNMATCHED_ROUTE, MatchedPath::as_str)
        .to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
