//! Loglytics ingestion server.
//!
//! Binds the HTTP/WebSocket listener, opens (or initializes) the SQLite
//! store, constructs the process-wide singletons (credential store, rate
//! limiter, fan-out registry, analytics engine) once, and starts the
//! retention sweep that ages out records past `retention.days`.

use std::sync::Arc;
use std::time::Duration;

use loglytics_api::config::AppConfig;
use loglytics_api::{build_router, build_state};
use loglytics_storage::{IngestBackend, SqliteBackend};
use tracing_subscriber::EnvFilter;

/// How often the retention sweep runs. The spec states retention in days,
/// not sweep frequency; once an hour keeps the lag between "past retention"
/// and "actually deleted" small without scanning the table on every request.
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();

    let backend: Arc<dyn IngestBackend> = match &config.database_path {
        Some(path) => {
            tracing::info!(path, "opening sqlite store");
            Arc::new(SqliteBackend::open(path).expect("failed to open sqlite store"))
        }
        None => {
            tracing::warn!("LOGLYTICS_DATABASE_PATH not set, using an in-memory store");
            Arc::new(SqliteBackend::open_in_memory().expect("failed to open in-memory sqlite store"))
        }
    };

    let retention_days = config.retention.retention_days;
    let bind_addr = config.bind_addr.clone();
    let state = build_state(backend.clone(), config);

    tokio::spawn(retention_sweep(backend, retention_days));

    let app = build_router(state);

    let addr: std::net::SocketAddr = bind_addr.parse().expect("LOGLYTICS_BIND_ADDR must be host:port");
    tracing::info!(%addr, "loglytics-server listening");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind listener");
    axum::serve(listener, app).await.expect("server error");
}

/// Background task: delete records older than `retention_days` once per
/// `RETENTION_SWEEP_INTERVAL`. Errors are logged and the loop continues --
/// a failed sweep is not fatal to the running server.
async fn retention_sweep(backend: Arc<dyn IngestBackend>, retention_days: i64) {
    let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        match backend.purge_expired(retention_days).await {
            Ok(removed) if removed > 0 => {
                tracing::info!(removed, retention_days, "retention sweep purged expired records");
            }
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "retention sweep failed"),
        }
    }
}
