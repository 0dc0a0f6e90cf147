//! Analytics engine (C6): cached, single-flight report computation over a
//! tenant's canonical records.
//!
//! Six report types (overview, error-analysis, anomalies, performance,
//! patterns, insights), each a pure function of a `&[LogRecord]` slice,
//! ported from the five `analytics/*.py` modules in the original service.
//! The engine around them -- cache read-through, single-flight compute,
//! cache write-back -- follows the teacher's `UsageTracker` (`usage_analytics.rs`):
//! a `DashMap`-sharded concurrent structure, generalized here from an
//! in-process counter map to a per-`(tenant, type, scope)` compute lock.

mod anomalies;
mod error_analysis;
mod insights;
mod overview;
mod patterns;
mod performance;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use loglytics_core::AnalyticsCacheEntry;
use loglytics_storage::IngestBackend;

use crate::config::AnalyticsConfig;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::SharedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportType {
    Overview,
    ErrorAnalysis,
    Anomalies,
    Performance,
    Patterns,
    Insights,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Overview => "overview",
            ReportType::ErrorAnalysis => "error-analysis",
            ReportType::Anomalies => "anomalies",
            ReportType::Performance => "performance",
            ReportType::Patterns => "patterns",
            ReportType::Insights => "insights",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "overview" => Some(ReportType::Overview),
            "error-analysis" => Some(ReportType::ErrorAnalysis),
            "anomalies" => Some(ReportType::Anomalies),
            "performance" => Some(ReportType::Performance),
            "patterns" => Some(ReportType::Patterns),
            "insights" => Some(ReportType::Insights),
            _ => None,
        }
    }
}

type ComputeKey = (String, &'static str, String);

/// Owns the per-key compute locks that give `report` its single-flight
/// discipline: concurrent callers for the same `(tenant, type, scope)` key
/// serialize on the same `tokio::sync::Mutex`, so only one of them actually
/// queries storage and recomputes.
pub struct AnalyticsEngine {
    config: AnalyticsConfig,
    locks: DashMap<ComputeKey, Arc<AsyncMutex<()>>>,
}

impl AnalyticsEngine {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            locks: DashMap::new(),
        }
    }

    /// Compute (or serve from cache) the named report for a tenant.
    ///
    /// `scope_id` narrows to one ingest batch; `None` means "every record
    /// for the tenant". `force` bypasses the cache read but still writes the
    /// freshly computed result back.
    pub async fn report(
        &self,
        backend: &dyn IngestBackend,
        tenant_id: &str,
        report_type: ReportType,
        scope_id: Option<String>,
        force: bool,
    ) -> ApiResult<Value> {
        let scope_key = scope_id.clone().unwrap_or_default();
        let key: ComputeKey = (tenant_id.to_string(), report_type.as_str(), scope_key.clone());
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _single_flight = lock.lock().await;

        if !force {
            if let Some(cached) = self.cached(backend, tenant_id, report_type, &scope_key).await? {
                metrics::record_cache_hit();
                return Ok(cached);
            }
        }
        metrics::record_cache_miss();

        let records = backend
            .query_records(tenant_id, scope_id.clone())
            .await
            .map_err(ApiError::from)?;

        let started = Instant::now();
        let payload = self.compute(report_type, &records);
        metrics::record_analytics_compute(report_type.as_str(), started.elapsed().as_secs_f64());

        let entry = AnalyticsCacheEntry {
            tenant_id: tenant_id.to_string(),
            analytics_type: report_type.as_str().to_string(),
            scope_id: scope_id.clone(),
            payload: payload.clone(),
            computed_at: Utc::now(),
        };
        backend.put_cache_entry(entry).await.map_err(ApiError::from)?;

        Ok(payload)
    }

    async fn cached(
        &self,
        backend: &dyn IngestBackend,
        tenant_id: &str,
        report_type: ReportType,
        scope_key: &str,
    ) -> ApiResult<Option<Value>> {
        let entry = backend
            .get_cache_entry(tenant_id, report_type.as_str(), scope_key)
            .await
            .map_err(ApiError::from)?;
        let Some(entry) = entry else { return Ok(None) };

        let age = Utc::now() - entry.computed_at;
        let ttl = chrono::Duration::from_std(self.config.cache_ttl).unwrap_or(chrono::Duration::hours(1));
        if age < ttl {
            debug!(tenant_id, report = report_type.as_str(), "analytics cache hit");
            Ok(Some(entry.payload))
        } else {
            Ok(None)
        }
    }

    fn compute(&self, report_type: ReportType, records: &[loglytics_core::LogRecord]) -> Value {
        match report_type {
            ReportType::Overview => overview::compute(records),
            ReportType::ErrorAnalysis => error_analysis::compute(records),
            ReportType::Anomalies => {
                anomalies::compute(records, self.config.anomaly_z_threshold, self.config.min_samples_for_stats)
            }
            ReportType::Performance => performance::compute(records),
            ReportType::Patterns => patterns::compute(records),
            ReportType::Insights => {
                let overview = overview::compute(records);
                let errors = error_analysis::compute(records);
                let anomalies =
                    anomalies::compute(records, self.config.anomaly_z_threshold, self.config.min_samples_for_stats);
                let performance = performance::compute(records);
                let patterns = patterns::compute(records);
                insights::compute(&overview, &errors, &anomalies, &performance, &patterns)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub scope_id: Option<String>,
    #[serde(default)]
    pub force: bool,
}

/// `GET /analytics/:tenant_id/:type` -- dispatch a report by name for the
/// authenticated tenant. Same bearer + `X-Tenant-ID` auth as `POST /ingest`;
/// the path's `tenant_id` must match the authenticated tenant.
pub async fn report_handler(
    State(state): State<SharedState>,
    Path((tenant_id, report_type)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<Value>> {
    let tenant = crate::ingest::authenticate(&state, &headers).await?;
    if tenant.tenant_id != tenant_id {
        return Err(ApiError::Forbidden("credential does not match requested tenant".into()));
    }

    let report_type = ReportType::from_str(&report_type)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown analytics report type '{report_type}'")))?;

    let payload = state
        .analytics
        .report(state.backend.as_ref(), &tenant.tenant_id, report_type, query.scope_id, query.force)
        .await?;
    Ok(Json(payload))
}

/// Truncate `s` to at most `max_chars` characters, appending `...` if it was
/// longer. Shared by every report that echoes message text back verbatim.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_type_round_trips_through_its_wire_name() {
        for rt in [
            ReportType::Overview,
            ReportType::ErrorAnalysis,
            ReportType::Anomalies,
            ReportType::Performance,
            ReportType::Patterns,
            ReportType::Insights,
        ] {
            assert_eq!(ReportType::from_str(rt.as_str()), Some(rt));
        }
    }

    #[test]
    fn truncate_chars_is_a_no_op_under_the_limit() {
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn truncate_chars_appends_ellipsis_over_the_limit() {
        let long = "a".repeat(150);
        let truncated = truncate_chars(&long, 100);
        assert_eq!(truncated.chars().count(), 103);
        assert!(truncated.ends_with("..."));
    }
}
