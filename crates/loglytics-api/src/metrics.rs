//! Prometheus metrics for the ingestion server.
//!
//! Gated behind the `metrics` feature, exactly as the teacher gates its own
//! metrics module. Covers the operational surfaces the spec's ambient stack
//! calls for: HTTP traffic, ingest throughput and rejections, fan-out
//! delivery/drops/evictions, and analytics cache hit/miss + compute latency.
//! The spec's Non-goals exclude a user-facing analytics UI, not operational
//! metrics, so this module is carried regardless of which report types a
//! deployment actually uses.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "loglytics_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "loglytics_http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    /// Ingested line counts, labeled `received` (framed units) vs `stored`
    /// (actually persisted) so the gap between the two is visible without a
    /// per-tenant dashboard.
    pub static ref INGEST_LINES_TOTAL: CounterVec = register_counter_vec!(
        "loglytics_ingest_lines_total",
        "Total log lines processed by the ingest pipeline",
        &["status"]
    )
    .unwrap();

    pub static ref INGEST_RATE_LIMIT_REJECTIONS_TOTAL: CounterVec = register_counter_vec!(
        "loglytics_ingest_rate_limit_rejections_total",
        "Total ingest calls rejected by per-tenant admission control",
        &["reason"]
    )
    .unwrap();

    /// Live WebSocket subscribers currently registered, per tenant. Low
    /// cardinality in practice (one series per tenant with an open socket).
    pub static ref FANOUT_SUBSCRIBERS: GaugeVec = register_gauge_vec!(
        "loglytics_fanout_subscribers",
        "Current live subscribers per tenant",
        &["tenant_id"]
    )
    .unwrap();

    pub static ref FANOUT_DELIVERIES_TOTAL: CounterVec = register_counter_vec!(
        "loglytics_fanout_deliveries_total",
        "Total fan-out delivery attempts, by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref FANOUT_EVICTIONS_TOTAL: CounterVec = register_counter_vec!(
        "loglytics_fanout_evictions_total",
        "Total subscribers evicted as slow consumers",
        &["reason"]
    )
    .unwrap();

    pub static ref ANALYTICS_CACHE_TOTAL: CounterVec = register_counter_vec!(
        "loglytics_analytics_cache_total",
        "Analytics report cache lookups, by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref ANALYTICS_COMPUTE_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "loglytics_analytics_compute_duration_seconds",
        "Time spent computing an analytics report on a cache miss",
        &["report_type"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap();
}

/// Axum middleware recording per-request count and latency. Uses the
/// matched route template (not the raw URI) as the `path` label so
/// `/ws/:tenant_id` doesn't create one series per tenant.
pub async fn track_metrics(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// `GET /metrics` -- render the process's Prometheus metric families.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (StatusCode::OK, [("content-type", encoder.format_type())], buffer).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        )
            .into_response(),
    }
}

pub fn record_ingest(status: &str, count: usize) {
    INGEST_LINES_TOTAL.with_label_values(&[status]).inc_by(count as f64);
}

pub fn record_rate_limit_rejection() {
    INGEST_RATE_LIMIT_REJECTIONS_TOTAL.with_label_values(&["admission_limit"]).inc();
}

pub fn update_fanout_subscribers(tenant_id: &str, count: i64) {
    FANOUT_SUBSCRIBERS.with_label_values(&[tenant_id]).set(count as f64);
}

pub fn record_fanout_delivered() {
    FANOUT_DELIVERIES_TOTAL.with_label_values(&["delivered"]).inc();
}

pub fn record_fanout_dropped() {
    FANOUT_DELIVERIES_TOTAL.with_label_values(&["dropped"]).inc();
}

pub fn record_fanout_eviction() {
    FANOUT_EVICTIONS_TOTAL.with_label_values(&["slow_consumer"]).inc();
}

pub fn record_cache_hit() {
    ANALYTICS_CACHE_TOTAL.with_label_values(&["hit"]).inc();
}

pub fn record_cache_miss() {
    ANALYTICS_CACHE_TOTAL.with_label_values(&["miss"]).inc();
}

pub fn record_analytics_compute(report_type: &str, duration_secs: f64) {
    ANALYTICS_COMPUTE_DURATION_SECONDS
        .with_label_values(&[report_type])
        .observe(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_helpers_do_not_panic() {
        record_ingest("stored", 3);
        record_rate_limit_rejection();
        update_fanout_subscribers("t1", 2);
        record_fanout_delivered();
        record_fanout_dropped();
        record_fanout_eviction();
        record_cache_hit();
        record_cache_miss();
        record_analytics_compute("overview", 0.01);
    }
}
