//! Ingest pipeline (C4): the `POST /ingest` handler and tenant management
//! endpoints (`/connections`, `/ingest/test`).
//!
//! Wires C1 (credentials) -> admission control -> C2 (detect+parse) -> C3
//! (normalize) -> storage -> C5 (fan-out), the same request-scoped pipeline
//! shape as the teacher's `POST /datasets` handler in `main.rs`, generalized
//! from a single-record insert to a batch with per-line format detection.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use loglytics_core::{LogRecord, Tenant};

use crate::error::{ApiError, ApiResult};
use crate::format::{parse_line, Format, FormatDetector};
use crate::metrics;
use crate::normalizer;
use crate::state::{CachedFormat, SharedState};

/// Above this, a fresh detection pass always runs regardless of the cached
/// decision's age (spec §4.2: detect once per tenant per day).
const CACHE_MAX_AGE: chrono::Duration = chrono::Duration::hours(24);
/// Below `CACHE_MAX_AGE` but past this, the batch is re-sampled to check the
/// cached decision still holds; a confidence regression replaces it.
const RESAMPLE_INTERVAL: chrono::Duration = chrono::Duration::hours(1);
/// A re-sampled confidence this much lower than the cached one forces
/// redetection even inside the same day.
const CONFIDENCE_REGRESSION_MARGIN: f64 = 0.2;

fn extract_bearer(headers: &HeaderMap) -> ApiResult<String> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    raw.strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or(ApiError::Unauthorized)
}

fn extract_tenant_header(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get("X-Tenant-ID")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("missing X-Tenant-ID header".into()))
}

pub(crate) async fn authenticate(state: &SharedState, headers: &HeaderMap) -> ApiResult<Tenant> {
    let token = extract_bearer(headers)?;
    let tenant_id = extract_tenant_header(headers)?;
    state
        .credentials
        .verify(state.backend.as_ref(), &tenant_id, &token)
        .await
}

/// Split a decoded request body into individual log lines.
///
/// Tries newline-delimited framing first: more than one non-empty line means
/// ndjson (each line fed to C2 independently, valid JSON or not -- an
/// unparsable line becomes a synthetic parse-error record, not a batch
/// failure). A single non-empty line is tried as one JSON value: an array
/// frames one unit per element, an object frames as a one-element batch,
/// anything else is treated as a single raw line.
fn frame_body(body: &str) -> ApiResult<Vec<String>> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest("request body is empty".into()));
    }

    let lines: Vec<&str> = trimmed.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() > 1 {
        return Ok(lines.into_iter().map(str::to_string).collect());
    }

    let single = lines.first().copied().unwrap_or(trimmed);
    match serde_json::from_str::<Value>(single) {
        Ok(Value::Array(items)) => {
            if items.is_empty() {
                return Err(ApiError::BadRequest("request body array is empty".into()));
            }
            Ok(items.into_iter().map(|v| v.to_string()).collect())
        }
        Ok(Value::Object(_)) => Ok(vec![single.to_string()]),
        _ => Ok(vec![single.to_string()]),
    }
}

/// Resolve the format to parse `lines` with for `tenant_id`, consulting and
/// updating the per-tenant cache per the detect-once-per-day/re-sample-hourly
/// rule.
fn resolve_format(
    detector: &FormatDetector,
    format_cache: &dashmap::DashMap<String, CachedFormat>,
    tenant_id: &str,
    lines: &[String],
) -> Format {
    let now = Utc::now();

    if let Some(cached) = format_cache.get(tenant_id) {
        if now - cached.detected_at < RESAMPLE_INTERVAL {
            return cached.format;
        }
    }

    let sample: Vec<&str> = lines.iter().map(String::as_str).collect();
    let detection = detector.detect(&sample);

    let existing = format_cache.get(tenant_id).map(|c| (c.format, c.confidence, c.detected_at));
    let should_replace = match existing {
        None => true,
        Some((format, confidence, detected_at)) => {
            now - detected_at >= CACHE_MAX_AGE
                || format != detection.format
                || detection.confidence + CONFIDENCE_REGRESSION_MARGIN < confidence
        }
    };

    if should_replace {
        format_cache.insert(
            tenant_id.to_string(),
            CachedFormat {
                format: detection.format,
                confidence: detection.confidence,
                detected_at: now,
            },
        );
        detection.format
    } else {
        let confirmed = existing.unwrap().0;
        format_cache
            .entry(tenant_id.to_string())
            .and_modify(|cached| cached.detected_at = now);
        confirmed
    }
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub received: usize,
    pub stored: usize,
    pub tenant_id: String,
    pub format: &'static str,
    pub at: DateTime<Utc>,
}

/// `POST /ingest` -- authenticate, admit, detect+parse, normalize, persist,
/// and fan out a batch of log lines.
pub async fn ingest_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<Json<IngestResponse>> {
    if body.len() > state.config.ingest.max_body_bytes {
        return Err(ApiError::PayloadTooLarge);
    }

    let tenant = authenticate(&state, &headers).await?;

    let text = String::from_utf8_lossy(&body);
    let lines = frame_body(&text)?;
    if lines.len() > state.config.ingest.max_batch_lines {
        return Err(ApiError::BadRequest(format!(
            "batch of {} lines exceeds max_batch_lines ({})",
            lines.len(),
            state.config.ingest.max_batch_lines
        )));
    }

    if let Err(retry_after_secs) = state.rate_limiter.check(&tenant.tenant_id, lines.len() as u32) {
        metrics::record_rate_limit_rejection();
        return Err(ApiError::RateLimited { retry_after_secs });
    }

    let format = resolve_format(&state.detector, &state.format_cache, &tenant.tenant_id, &lines);

    let ingested_at = Utc::now();
    let mut records = Vec::with_capacity(lines.len());
    for (seq, line) in lines.iter().enumerate() {
        let parsed = parse_line(format, line);
        let normalized = normalizer::normalize(parsed, format, ingested_at);
        records.push(LogRecord {
            tenant_id: tenant.tenant_id.clone(),
            ingested_at,
            seq: seq as i64,
            event_time: normalized.event_time,
            level: normalized.level,
            message: normalized.message,
            source: normalized.source,
            service: normalized.service,
            metadata: normalized.metadata,
            raw: line.clone(),
        });
    }

    let received = records.len();
    let broadcastable = records.clone();
    let stored = state
        .backend
        .insert_batch(records)
        .await
        .map_err(ApiError::from)?;

    state
        .backend
        .touch_tenant(&tenant.tenant_id, stored as i64)
        .await
        .map_err(ApiError::from)?;

    state.backend.invalidate_cache(&tenant.tenant_id).await.ok();

    for record in &broadcastable {
        state.fanout.broadcast(&tenant.tenant_id, record);
    }

    metrics::record_ingest("stored", stored);
    metrics::record_ingest("received", received);

    Ok(Json(IngestResponse {
        received,
        stored,
        tenant_id: tenant.tenant_id,
        format: format.as_str(),
        at: ingested_at,
    }))
}

/// `GET /ingest/test` -- verify a credential is valid without ingesting
/// anything.
pub async fn ingest_test_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let tenant = authenticate(&state, &headers).await?;
    Ok(Json(json!({
        "ok": true,
        "tenant_id": tenant.tenant_id,
        "platform_tag": tenant.platform_tag,
        "status": tenant.status.to_string(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateConnectionRequest {
    pub owner_user_id: String,
    pub name: String,
    pub platform_tag: String,
}

#[derive(Debug, Serialize)]
pub struct CreateConnectionResponse {
    pub tenant_id: String,
    pub plaintext_key: String,
    pub api_key_prefix: String,
    pub platform_tag: String,
    pub created_at: DateTime<Utc>,
}

/// `POST /connections` -- issue a new tenant and its one-time API key.
pub async fn create_connection_handler(
    State(state): State<SharedState>,
    Json(req): Json<CreateConnectionRequest>,
) -> ApiResult<Json<CreateConnectionResponse>> {
    if req.owner_user_id.trim().is_empty() || req.name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "owner_user_id and name are required".into(),
        ));
    }
    let issued = state
        .credentials
        .issue(
            state.backend.as_ref(),
            &req.owner_user_id,
            &req.name,
            &req.platform_tag,
        )
        .await?;

    Ok(Json(CreateConnectionResponse {
        tenant_id: issued.tenant.tenant_id,
        plaintext_key: issued.plaintext_key,
        api_key_prefix: issued.tenant.api_key_prefix,
        platform_tag: issued.tenant.platform_tag,
        created_at: issued.tenant.created_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListConnectionsQuery {
    pub owner: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionSummary {
    pub tenant_id: String,
    pub name: String,
    pub platform_tag: String,
    pub api_key_prefix: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub total_received: i64,
}

impl From<Tenant> for ConnectionSummary {
    fn from(tenant: Tenant) -> Self {
        Self {
            tenant_id: tenant.tenant_id,
            name: tenant.name,
            platform_tag: tenant.platform_tag,
            api_key_prefix: tenant.api_key_prefix,
            status: tenant.status.to_string(),
            created_at: tenant.created_at,
            last_seen_at: tenant.last_seen_at,
            total_received: tenant.total_received,
        }
    }
}

/// `GET /connections` -- list tenants, optionally narrowed to one owner.
/// Never includes the plaintext key or hash.
pub async fn list_connections_handler(
    State(state): State<SharedState>,
    Query(query): Query<ListConnectionsQuery>,
) -> ApiResult<Json<Vec<ConnectionSummary>>> {
    let tenants = state
        .backend
        .list_tenants(query.owner)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(tenants.into_iter().map(ConnectionSummary::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_body_splits_ndjson_lines() {
        let body = "{\"a\":1}\n{\"a\":2}\nnot json at all\n";
        let lines = frame_body(body).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "not json at all");
    }

    #[test]
    fn frame_body_explodes_a_single_json_array() {
        let body = r#"[{"a":1},{"a":2},{"a":3}]"#;
        let lines = frame_body(body).unwrap();
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn frame_body_wraps_a_single_json_object() {
        let body = r#"{"message":"hello"}"#;
        let lines = frame_body(body).unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn frame_body_wraps_a_single_raw_line() {
        let body = "192.168.0.1 - - [10/Oct/2023:13:55:36 -0700] \"GET / HTTP/1.1\" 200 1024";
        let lines = frame_body(body).unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn frame_body_rejects_empty_body() {
        assert!(frame_body("   \n  ").is_err());
    }

    #[tokio::test]
    async fn ingest_pipeline_persists_and_fans_out() {
        use loglytics_storage::SqliteBackend;
        use std::sync::Arc;

        use crate::config::AppConfig;
        use crate::credentials::CredentialStore;
        use crate::fanout::FanoutRegistry;
        use crate::rate_limit::TenantRateLimiter;
        use crate::state::AppState;

        let mut config = AppConfig::default();
        config.credentials.kdf_cost = 4;
        let backend: Arc<dyn loglytics_storage::IngestBackend> =
            Arc::new(SqliteBackend::open_in_memory().unwrap());
        let credentials = Arc::new(CredentialStore::new(config.credentials.clone()));
        let issued = credentials
            .issue(backend.as_ref(), "owner-1", "conn-1", "k8s")
            .await
            .unwrap();

        let state: SharedState = Arc::new(AppState {
            rate_limiter: Arc::new(TenantRateLimiter::new(&config.ingest)),
            fanout: Arc::new(FanoutRegistry::new(&config.fanout)),
            detector: Arc::new(FormatDetector::new()),
            analytics: Arc::new(crate::analytics::AnalyticsEngine::new(config.analytics.clone())),
            format_cache: dashmap::DashMap::new(),
            credentials,
            backend,
            config,
        });

        let mut handle = state.fanout.subscribe(&issued.tenant.tenant_id);

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", issued.plaintext_key).parse().unwrap(),
        );
        headers.insert("X-Tenant-ID", issued.tenant.tenant_id.parse().unwrap());

        let body = axum::body::Bytes::from(
            "{\"timestamp\":\"2024-01-01T00:00:00Z\",\"level\":\"info\",\"message\":\"one\"}\n\
             {\"timestamp\":\"2024-01-01T00:00:01Z\",\"level\":\"error\",\"message\":\"two\"}",
        );

        let response = ingest_handler(State(state.clone()), headers, body)
            .await
            .unwrap();
        assert_eq!(response.0.received, 2);
        assert_eq!(response.0.stored, 2);

        let stored = state
            .backend
            .query_records(&issued.tenant.tenant_id, None)
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);

        let fanned_out = handle.recv().await;
        assert!(fanned_out.is_some());
        handle.unsubscribe();
    }

    #[tokio::test]
    async fn ingest_rejects_wrong_credential() {
        use loglytics_storage::SqliteBackend;
        use std::sync::Arc;

        use crate::config::AppConfig;
        use crate::credentials::CredentialStore;
        use crate::fanout::FanoutRegistry;
        use crate::rate_limit::TenantRateLimiter;
        use crate::state::AppState;

        let mut config = AppConfig::default();
        config.credentials.kdf_cost = 4;
        let backend: Arc<dyn loglytics_storage::IngestBackend> =
            Arc::new(SqliteBackend::open_in_memory().unwrap());
        let credentials = Arc::new(CredentialStore::new(config.credentials.clone()));
        let issued = credentials
            .issue(backend.as_ref(), "owner-1", "conn-1", "k8s")
            .await
            .unwrap();

        let state: SharedState = Arc::new(AppState {
            rate_limiter: Arc::new(TenantRateLimiter::new(&config.ingest)),
            fanout: Arc::new(FanoutRegistry::new(&config.fanout)),
            detector: Arc::new(FormatDetector::new()),
            analytics: Arc::new(crate::analytics::AnalyticsEngine::new(config.analytics.clone())),
            format_cache: dashmap::DashMap::new(),
            credentials,
            backend,
            config,
        });

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer lgai_lk_wrongvalue".parse().unwrap(),
        );
        headers.insert("X-Tenant-ID", issued.tenant.tenant_id.parse().unwrap());

        let err = ingest_handler(State(state), headers, axum::body::Bytes::from("{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }
}
