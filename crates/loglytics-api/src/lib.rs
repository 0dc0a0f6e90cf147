//! Loglytics API
//!
//! The axum server: tenant credentials, ingest pipeline, live fan-out, and
//! the analytics engine. `loglytics-server` (`main.rs`) wires these modules
//! into a running process; this library exists so integration tests and the
//! binary share one source of truth for routing and state construction.

pub mod analytics;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fanout;
pub mod format;
pub mod ingest;
pub mod normalizer;
pub mod rate_limit;
pub mod state;

#[cfg(feature = "metrics")]
pub mod metrics;

/// No-op stand-ins for the metrics recording calls sprinkled through the
/// ingest/fan-out/analytics hot paths, so those modules don't need a `cfg`
/// at every call site when the `metrics` feature (on by default) is off.
#[cfg(not(feature = "metrics"))]
pub mod metrics {
    pub async fn track_metrics(
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> axum::response::Response {
        next.run(req).await
    }

    pub async fn metrics_handler() -> &'static str {
        "metrics disabled (build without the `metrics` feature)"
    }

    pub fn record_ingest(_status: &str, _count: usize) {}
    pub fn record_rate_limit_rejection() {}
    pub fn update_fanout_subscribers(_tenant_id: &str, _count: i64) {}
    pub fn record_fanout_delivered() {}
    pub fn record_fanout_dropped() {}
    pub fn record_fanout_eviction() {}
    pub fn record_cache_hit() {}
    pub fn record_cache_miss() {}
    pub fn record_analytics_compute(_report_type: &str, _duration_secs: f64) {}
}

use std::sync::Arc;

use loglytics_storage::IngestBackend;

use crate::analytics::AnalyticsEngine;
use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::fanout::FanoutRegistry;
use crate::format::FormatDetector;
use crate::rate_limit::TenantRateLimiter;
use crate::state::{AppState, SharedState};

/// Build process-wide application state from a backend and config. The
/// fan-out registry, rate limiter, format detector, and analytics engine are
/// explicit-init singletons constructed here, once, per spec §9 -- never
/// lazily created on first access.
pub fn build_state(backend: Arc<dyn IngestBackend>, config: AppConfig) -> SharedState {
    Arc::new(AppState {
        rate_limiter: Arc::new(TenantRateLimiter::new(&config.ingest)),
        fanout: Arc::new(FanoutRegistry::new(&config.fanout)),
        detector: Arc::new(FormatDetector::new()),
        analytics: Arc::new(AnalyticsEngine::new(config.analytics.clone())),
        format_cache: dashmap::DashMap::new(),
        credentials: Arc::new(CredentialStore::new(config.credentials.clone())),
        backend,
        config,
    })
}

/// Build the axum router. Separate from `main` so integration tests can
/// stand up the full route table against an in-memory backend.
pub fn build_router(state: SharedState) -> axum::Router {
    use axum::routing::{get, post};
    use tower_http::cors::CorsLayer;
    use tower_http::trace::TraceLayer;

    let router = axum::Router::new()
        .route("/ingest", post(ingest::ingest_handler))
        .route("/ingest/test", get(ingest::ingest_test_handler))
        .route(
            "/connections",
            post(ingest::create_connection_handler).get(ingest::list_connections_handler),
        )
        .route("/ws/:tenant_id", get(fanout::subscribe_handler))
        .route("/analytics/:tenant_id/:type", get(analytics::report_handler))
        .route("/health", get(|| async { "ok" }));

    #[cfg(feature = "metrics")]
    let router = router
        .route("/metrics", get(crate::metrics::metrics_handler))
        .layer(axum::middleware::from_fn(crate::metrics::track_metrics));

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
