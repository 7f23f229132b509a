//! Engine metrics.
//!
//! Recorded through the `metrics` facade; the API binary installs the
//! Prometheus recorder.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    // Pipeline
    pub const ANALYSIS_REQUESTS_TOTAL: &str = "vhub_analysis_requests_total";
    pub const ANALYSIS_DURATION_SECONDS: &str = "vhub_analysis_duration_seconds";
    pub const DETECTIONS_TOTAL: &str = "vhub_detections_total";
    pub const CLASSIFIER_DURATION_SECONDS: &str = "vhub_classifier_duration_seconds";
    pub const CLASSIFIER_FAILURES_TOTAL: &str = "vhub_classifier_failures_total";

    // Cache
    pub const CACHE_LOOKUPS_TOTAL: &str = "vhub_cache_lookups_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "vhub_cache_evictions_total";
    pub const CACHE_SIZE: &str = "vhub_cache_size";

    // Broadcast
    pub const BROADCAST_CONNECTIONS_ACTIVE: &str = "vhub_broadcast_connections_active";
    pub const BROADCAST_RESULTS_DROPPED_TOTAL: &str = "vhub_broadcast_results_dropped_total";
    pub const BROADCAST_MESSAGES_DROPPED_TOTAL: &str = "vhub_broadcast_messages_dropped_total";
    pub const BROADCAST_MESSAGES_SENT_TOTAL: &str = "vhub_broadcast_messages_sent_total";
}

/// Record a completed analysis request.
pub fn record_analysis(cache_hit: bool, duration_secs: f64, detections: usize) {
    let labels = [("cache", if cache_hit { "hit" } else { "miss" }.to_string())];
    counter!(names::ANALYSIS_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::ANALYSIS_DURATION_SECONDS, &labels).record(duration_secs);
    counter!(names::DETECTIONS_TOTAL).increment(detections as u64);
}

/// Record one classifier run.
pub fn record_classifier_run(classifier: &str, duration_secs: f64) {
    let labels = [("classifier", classifier.to_string())];
    histogram!(names::CLASSIFIER_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a classifier that failed, panicked or timed out.
pub fn record_classifier_failure(classifier: &str, reason: &str) {
    let labels = [
        ("classifier", classifier.to_string()),
        ("reason", reason.to_string()),
    ];
    counter!(names::CLASSIFIER_FAILURES_TOTAL, &labels).increment(1);
}

/// Record a cache lookup.
pub fn record_cache_lookup(hit: bool) {
    let labels = [("result", if hit { "hit" } else { "miss" }.to_string())];
    counter!(names::CACHE_LOOKUPS_TOTAL, &labels).increment(1);
}

/// Record an LRU eviction.
pub fn record_cache_eviction() {
    counter!(names::CACHE_EVICTIONS_TOTAL).increment(1);
}

/// Update the cache size gauge.
pub fn set_cache_size(size: usize) {
    gauge!(names::CACHE_SIZE).set(size as f64);
}

/// Update the live broadcast connections gauge.
pub fn set_broadcast_connections(count: usize) {
    gauge!(names::BROADCAST_CONNECTIONS_ACTIVE).set(count as f64);
}

/// Record results dropped from the broadcast queue because the fan-out lagged.
pub fn record_broadcast_results_dropped(count: u64) {
    counter!(names::BROADCAST_RESULTS_DROPPED_TOTAL).increment(count);
}

/// Record a message dropped for one client whose buffer was full.
pub fn record_broadcast_message_dropped() {
    counter!(names::BROADCAST_MESSAGES_DROPPED_TOTAL).increment(1);
}

/// Record a message handed to a client's outbound buffer.
pub fn record_broadcast_message_sent(message_type: &str) {
    let labels = [("type", message_type.to_string())];
    counter!(names::BROADCAST_MESSAGES_SENT_TOTAL, &labels).increment(1);
}
