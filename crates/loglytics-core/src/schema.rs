//! SQLite schema for the ingestion service.
//!
//! Three tables, matching spec's "Persisted state layout": `tenants`,
//! `log_records`, `analytics_cache`. A single `schema_meta` key/value table
//! tracks a version number for optimistic-concurrency callers, the same
//! shape as the teacher's `catalog_meta` table.

use crate::error::Result;

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('version', '1');

CREATE TABLE IF NOT EXISTS tenants (
  tenant_id TEXT PRIMARY KEY,
  owner_user_id TEXT NOT NULL,
  name TEXT NOT NULL,
  platform_tag TEXT NOT NULL,
  api_key_hash TEXT NOT NULL,
  api_key_prefix TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'inactive',
  created_at TEXT NOT NULL,
  last_seen_at TEXT NOT NULL,
  total_received INTEGER NOT NULL DEFAULT 0,
  UNIQUE(owner_user_id, name)
);

CREATE INDEX IF NOT EXISTS idx_tenants_owner ON tenants(owner_user_id);

CREATE TABLE IF NOT EXISTS log_records (
  tenant_id TEXT NOT NULL,
  ingested_at TEXT NOT NULL,
  seq INTEGER NOT NULL,
  event_time TEXT NOT NULL,
  level TEXT NOT NULL,
  message TEXT NOT NULL,
  source TEXT,
  service TEXT,
  metadata TEXT NOT NULL DEFAULT '{}',
  raw TEXT NOT NULL,
  PRIMARY KEY (tenant_id, ingested_at, seq),
  FOREIGN KEY (tenant_id) REFERENCES tenants(tenant_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_log_records_tenant_level_time
  ON log_records(tenant_id, level, event_time);
CREATE INDEX IF NOT EXISTS idx_log_records_tenant_time
  ON log_records(tenant_id, event_time);

CREATE TABLE IF NOT EXISTS analytics_cache (
  tenant_id TEXT NOT NULL,
  type TEXT NOT NULL,
  scope_id TEXT NOT NULL DEFAULT '',
  payload TEXT NOT NULL,
  computed_at TEXT NOT NULL,
  PRIMARY KEY (tenant_id, type, scope_id),
  FOREIGN KEY (tenant_id) REFERENCES tenants(tenant_id) ON DELETE CASCADE
);
"#;

/// Create all tables and indices if they do not already exist. Safe to call
/// on every backend startup.
pub fn init_sqlite_schema(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute_batch(DDL)?;
    Ok(())
}

/// Current schema version, for callers that want to gate behavior on it.
pub fn get_schema_version(conn: &rusqlite::Connection) -> Result<i64> {
    let version: String = conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'version'",
        [],
        |row| row.get(0),
    )?;
    version
        .parse()
        .map_err(|e| crate::error::CoreError::Other(format!("invalid schema version: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_all_tables() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        init_sqlite_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"tenants".to_string()));
        assert!(tables.contains(&"log_records".to_string()));
        assert!(tables.contains(&"analytics_cache".to_string()));
    }

    #[test]
    fn init_is_idempotent() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        init_sqlite_schema(&conn).unwrap();
        init_sqlite_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }
}
