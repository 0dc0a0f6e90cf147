//! Loglytics Core
//!
//! Canonical types, error kinds, and SQLite schema shared by the storage and
//! API crates of the log ingestion service.

pub mod error;
pub mod model;
pub mod schema;

pub use error::{CoreError, Result};
pub use model::{
    AnalyticsCacheEntry, LogLevel, LogRecord, Tenant, TenantStatus, MAX_MESSAGE_BYTES,
    MAX_METADATA_DEPTH, MAX_METADATA_KEYS, TRUNCATION_MARKER,
};
pub use schema::{get_schema_version, init_sqlite_schema};
