//! Loglytics Storage
//!
//! Persistence for tenants, canonical log records, and the analytics cache.
//! `rusqlite` is synchronous; every `IngestBackend` method offloads its
//! blocking work onto the tokio blocking pool via `spawn_blocking`, the same
//! pattern the API layer uses for `usage_flush_task` in the teacher.

pub mod pool_config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loglytics_core::{
    init_sqlite_schema, AnalyticsCacheEntry, CoreError, LogRecord, Result, Tenant, TenantStatus,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

pub use pool_config::{CircuitBreakerConfig, ConnectionPoolConfig};

/// Persistence abstraction the API layer programs against. One
/// implementation (`SqliteBackend`) ships today; the trait exists so a
/// future backend (a remote Postgres, say) can be substituted without
/// touching C1/C4/C5/C6 call sites.
#[async_trait]
pub trait IngestBackend: Send + Sync {
    async fn create_tenant(&self, tenant: &Tenant) -> Result<()>;
    async fn find_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>>;
    async fn find_tenant_by_owner_name(&self, owner: &str, name: &str) -> Result<Option<Tenant>>;
    async fn list_tenants(&self, owner: Option<String>) -> Result<Vec<Tenant>>;
    async fn revoke_tenant(&self, tenant_id: &str) -> Result<()>;
    /// Bump `total_received`/`last_seen_at`/`status` after a successful
    /// ingest batch.
    async fn touch_tenant(&self, tenant_id: &str, stored: i64) -> Result<()>;

    /// Persist a batch of records in a single transaction. Returns the
    /// number of rows written. All-or-nothing: a failure midway leaves no
    /// row from this batch visible.
    async fn insert_batch(&self, records: Vec<LogRecord>) -> Result<usize>;

    /// Fetch all records for a tenant (optionally narrowed to one
    /// ingest-batch scope), ordered by `(ingested_at, seq)`.
    async fn query_records(
        &self,
        tenant_id: &str,
        scope_id: Option<String>,
    ) -> Result<Vec<LogRecord>>;

    async fn get_cache_entry(
        &self,
        tenant_id: &str,
        analytics_type: &str,
        scope_id: &str,
    ) -> Result<Option<AnalyticsCacheEntry>>;
    async fn put_cache_entry(&self, entry: AnalyticsCacheEntry) -> Result<()>;
    async fn invalidate_cache(&self, tenant_id: &str) -> Result<()>;

    /// Delete records older than `retention_days` from `ingested_at`.
    /// Returns the number of rows removed.
    async fn purge_expired(&self, retention_days: i64) -> Result<usize>;
}

/// Single-connection SQLite backend. Guarded by a `parking_lot::Mutex` so it
/// can be shared behind an `Arc` across tasks; every operation hands the
/// blocking rusqlite call to `spawn_blocking` so it never occupies an async
/// worker thread.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    path: Option<PathBuf>,
}

impl SqliteBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        init_sqlite_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.as_ref().to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        init_sqlite_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Run a blocking closure against the connection on the tokio blocking
    /// pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| CoreError::Other(format!("blocking task join error: {e}")))?
    }
}

fn row_to_tenant(row: &rusqlite::Row) -> rusqlite::Result<Tenant> {
    let status_str: String = row.get("status")?;
    let status = match status_str.as_str() {
        "active" => TenantStatus::Active,
        "error" => TenantStatus::Error,
        _ => TenantStatus::Inactive,
    };
    Ok(Tenant {
        tenant_id: row.get("tenant_id")?,
        owner_user_id: row.get("owner_user_id")?,
        name: row.get("name")?,
        platform_tag: row.get("platform_tag")?,
        api_key_hash: row.get("api_key_hash")?,
        api_key_prefix: row.get("api_key_prefix")?,
        created_at: row.get("created_at")?,
        last_seen_at: row.get("last_seen_at")?,
        total_received: row.get("total_received")?,
        status,
    })
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<LogRecord> {
    let metadata_json: String = row.get("metadata")?;
    let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
    let level_str: String = row.get("level")?;
    let level = loglytics_core::LogLevel::from_name(&level_str).unwrap_or_default();
    Ok(LogRecord {
        tenant_id: row.get("tenant_id")?,
        ingested_at: row.get("ingested_at")?,
        seq: row.get("seq")?,
        event_time: row.get("event_time")?,
        level,
        message: row.get("message")?,
        source: row.get("source")?,
        service: row.get("service")?,
        metadata,
        raw: row.get("raw")?,
    })
}

#[async_trait]
impl IngestBackend for SqliteBackend {
    async fn create_tenant(&self, tenant: &Tenant) -> Result<()> {
        let tenant = tenant.clone();
        self.with_conn(move |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT tenant_id FROM tenants WHERE owner_user_id = ?1 AND name = ?2",
                    params![tenant.owner_user_id, tenant.name],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(CoreError::Conflict(format!(
                    "tenant '{}' already exists for owner '{}'",
                    tenant.name, tenant.owner_user_id
                )));
            }
            conn.execute(
                "INSERT INTO tenants
                 (tenant_id, owner_user_id, name, platform_tag, api_key_hash, api_key_prefix,
                  status, created_at, last_seen_at, total_received)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    tenant.tenant_id,
                    tenant.owner_user_id,
                    tenant.name,
                    tenant.platform_tag,
                    tenant.api_key_hash,
                    tenant.api_key_prefix,
                    tenant.status.to_string(),
                    tenant.created_at,
                    tenant.last_seen_at,
                    tenant.total_received,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let tenant_id = tenant_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM tenants WHERE tenant_id = ?1",
                params![tenant_id],
                row_to_tenant,
            )
            .optional()
            .map_err(CoreError::from)
        })
        .await
    }

    async fn find_tenant_by_owner_name(&self, owner: &str, name: &str) -> Result<Option<Tenant>> {
        let owner = owner.to_string();
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM tenants WHERE owner_user_id = ?1 AND name = ?2",
                params![owner, name],
                row_to_tenant,
            )
            .optional()
            .map_err(CoreError::from)
        })
        .await
    }

    async fn list_tenants(&self, owner: Option<String>) -> Result<Vec<Tenant>> {
        self.with_conn(move |conn| {
            let (sql, owner_param) = match &owner {
                Some(o) => ("SELECT * FROM tenants WHERE owner_user_id = ?1 ORDER BY created_at", Some(o.clone())),
                None => ("SELECT * FROM tenants ORDER BY created_at", None),
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = if let Some(o) = owner_param {
                stmt.query_map(params![o], row_to_tenant)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            } else {
                stmt.query_map([], row_to_tenant)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            Ok(rows)
        })
        .await
    }

    async fn revoke_tenant(&self, tenant_id: &str) -> Result<()> {
        let tenant_id = tenant_id.to_string();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE tenants SET status = 'inactive', api_key_hash = '' WHERE tenant_id = ?1",
                params![tenant_id],
            )?;
            if updated == 0 {
                return Err(CoreError::TenantNotFound(tenant_id));
            }
            Ok(())
        })
        .await
    }

    async fn touch_tenant(&self, tenant_id: &str, stored: i64) -> Result<()> {
        let tenant_id = tenant_id.to_string();
        let now: DateTime<Utc> = Utc::now();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE tenants
                 SET total_received = total_received + ?1, last_seen_at = ?2, status = 'active'
                 WHERE tenant_id = ?3",
                params![stored, now, tenant_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_batch(&self, records: Vec<LogRecord>) -> Result<usize> {
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let mut count = 0usize;
            for record in &records {
                let metadata_json = serde_json::to_string(&record.metadata)?;
                tx.execute(
                    "INSERT INTO log_records
                     (tenant_id, ingested_at, seq, event_time, level, message, source, service, metadata, raw)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        record.tenant_id,
                        record.ingested_at,
                        record.seq,
                        record.event_time,
                        record.level.as_str(),
                        record.message,
                        record.source,
                        record.service,
                        metadata_json,
                        record.raw,
                    ],
                )?;
                count += 1;
            }
            tx.commit()?;
            Ok(count)
        })
        .await
    }

    async fn query_records(
        &self,
        tenant_id: &str,
        scope_id: Option<String>,
    ) -> Result<Vec<LogRecord>> {
        let tenant_id = tenant_id.to_string();
        self.with_conn(move |conn| {
            // `scope_id` narrows to one ingest batch; in this schema a batch
            // is identified by its `ingested_at` second, since every record
            // in one ingest call shares that timestamp (spec §3 scope_id).
            let rows = if let Some(scope) = &scope_id {
                let mut stmt = conn.prepare(
                    "SELECT * FROM log_records
                     WHERE tenant_id = ?1 AND ingested_at = ?2
                     ORDER BY ingested_at, seq",
                )?;
                stmt.query_map(params![tenant_id, scope], row_to_record)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            } else {
                let mut stmt = conn.prepare(
                    "SELECT * FROM log_records WHERE tenant_id = ?1 ORDER BY ingested_at, seq",
                )?;
                stmt.query_map(params![tenant_id], row_to_record)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            Ok(rows)
        })
        .await
    }

    async fn get_cache_entry(
        &self,
        tenant_id: &str,
        analytics_type: &str,
        scope_id: &str,
    ) -> Result<Option<AnalyticsCacheEntry>> {
        let tenant_id = tenant_id.to_string();
        let analytics_type = analytics_type.to_string();
        let scope_id = scope_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT tenant_id, type, scope_id, payload, computed_at FROM analytics_cache
                 WHERE tenant_id = ?1 AND type = ?2 AND scope_id = ?3",
                params![tenant_id, analytics_type, scope_id],
                |row| {
                    let payload_json: String = row.get("payload")?;
                    let payload = serde_json::from_str(&payload_json)
                        .unwrap_or(serde_json::Value::Null);
                    let scope: String = row.get("scope_id")?;
                    Ok(AnalyticsCacheEntry {
                        tenant_id: row.get("tenant_id")?,
                        analytics_type: row.get("type")?,
                        scope_id: if scope.is_empty() { None } else { Some(scope) },
                        payload,
                        computed_at: row.get("computed_at")?,
                    })
                },
            )
            .optional()
            .map_err(CoreError::from)
        })
        .await
    }

    async fn put_cache_entry(&self, entry: AnalyticsCacheEntry) -> Result<()> {
        self.with_conn(move |conn| {
            let payload_json = serde_json::to_string(&entry.payload)?;
            conn.execute(
                "INSERT INTO analytics_cache (tenant_id, type, scope_id, payload, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(tenant_id, type, scope_id)
                 DO UPDATE SET payload = excluded.payload, computed_at = excluded.computed_at",
                params![
                    entry.tenant_id,
                    entry.analytics_type,
                    entry.scope_id.unwrap_or_default(),
                    payload_json,
                    entry.computed_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn invalidate_cache(&self, tenant_id: &str) -> Result<()> {
        let tenant_id = tenant_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM analytics_cache WHERE tenant_id = ?1",
                params![tenant_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn purge_expired(&self, retention_days: i64) -> Result<usize> {
        self.with_conn(move |conn| {
            let cutoff = Utc::now() - chrono::Duration::days(retention_days);
            let removed = conn.execute(
                "DELETE FROM log_records WHERE ingested_at < ?1",
                params![cutoff],
            )?;
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample_tenant(id: &str) -> Tenant {
        let now = Utc::now();
        Tenant {
            tenant_id: id.to_string(),
            owner_user_id: "u1".to_string(),
            name: "c1".to_string(),
            platform_tag: "k8s".to_string(),
            api_key_hash: "hash".to_string(),
            api_key_prefix: "lgai_lk_abcd".to_string(),
            created_at: now,
            last_seen_at: now,
            total_received: 0,
            status: TenantStatus::Inactive,
        }
    }

    #[tokio::test]
    async fn create_and_find_tenant_roundtrip() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.create_tenant(&sample_tenant("t1")).await.unwrap();
        let found = backend.find_tenant("t1").await.unwrap().unwrap();
        assert_eq!(found.owner_user_id, "u1");
        assert_eq!(found.status, TenantStatus::Inactive);
    }

    #[tokio::test]
    async fn create_tenant_conflict_on_owner_name_collision() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.create_tenant(&sample_tenant("t1")).await.unwrap();
        let err = backend.create_tenant(&sample_tenant("t2")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn insert_batch_is_atomic_and_ordered() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.create_tenant(&sample_tenant("t1")).await.unwrap();
        let now = Utc::now();
        let records = vec![
            LogRecord {
                tenant_id: "t1".into(),
                ingested_at: now,
                seq: 0,
                event_time: now,
                level: loglytics_core::LogLevel::Error,
                message: "first".into(),
                source: None,
                service: None,
                metadata: BTreeMap::new(),
                raw: "first".into(),
            },
            LogRecord {
                tenant_id: "t1".into(),
                ingested_at: now,
                seq: 1,
                event_time: now,
                level: loglytics_core::LogLevel::Info,
                message: "second".into(),
                source: None,
                service: None,
                metadata: BTreeMap::new(),
                raw: "second".into(),
            },
        ];
        let stored = backend.insert_batch(records).await.unwrap();
        assert_eq!(stored, 2);

        let fetched = backend.query_records("t1", None).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].message, "first");
        assert_eq!(fetched[1].message, "second");
    }

    #[tokio::test]
    async fn cache_put_get_invalidate() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.create_tenant(&sample_tenant("t1")).await.unwrap();
        let entry = AnalyticsCacheEntry {
            tenant_id: "t1".into(),
            analytics_type: "overview".into(),
            scope_id: None,
            payload: serde_json::json!({"total": 3}),
            computed_at: Utc::now(),
        };
        backend.put_cache_entry(entry).await.unwrap();
        let fetched = backend
            .get_cache_entry("t1", "overview", "")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.payload["total"], 3);

        backend.invalidate_cache("t1").await.unwrap();
        let after = backend.get_cache_entry("t1", "overview", "").await.unwrap();
        assert!(after.is_none());
    }

    #[tokio::test]
    async fn revoke_unknown_tenant_errors() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let err = backend.revoke_tenant("missing").await.unwrap_err();
        assert!(matches!(err, CoreError::TenantNotFound(_)));
    }
}
