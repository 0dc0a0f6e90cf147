//! Process-wide application state.
//!
//! Constructed once in `main`, handed to every handler behind an `Arc`, per
//! spec §9: fan-out registry, rate limiter, format detector, and analytics
//! cache are explicit-init singletons, never lazily created on first access.

use std::sync::Arc;

use dashmap::DashMap;
use loglytics_storage::IngestBackend;

use crate::analytics::AnalyticsEngine;
use crate::config::AppConfig;
use crate::credentials::SharedCredentialStore;
use crate::fanout::FanoutRegistry;
use crate::format::FormatDetector;
use crate::rate_limit::TenantRateLimiter;

/// The format the ingest pipeline last settled on for a tenant, plus the
/// line count since it was last (re)detected — backs the "detect once per
/// day, re-sample hourly" rule in spec §4.2.
pub struct CachedFormat {
    pub format: crate::format::Format,
    pub confidence: f64,
    pub detected_at: chrono::DateTime<chrono::Utc>,
}

pub struct AppState {
    pub config: AppConfig,
    pub backend: Arc<dyn IngestBackend>,
    pub credentials: SharedCredentialStore,
    pub rate_limiter: Arc<TenantRateLimiter>,
    pub fanout: Arc<FanoutRegistry>,
    pub detector: Arc<FormatDetector>,
    pub analytics: Arc<AnalyticsEngine>,
    pub format_cache: DashMap<String, CachedFormat>,
}

pub type SharedState = Arc<AppState>;
