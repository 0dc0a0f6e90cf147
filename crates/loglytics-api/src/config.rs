//! Runtime configuration for the ingestion server.
//!
//! Each sub-config follows the teacher's `ConnectionPoolConfig::from_env` shape:
//! a typed struct with a `Default` impl and a `from_env()` that falls back to
//! the default for any variable that is unset or unparsable.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Credential store (C1) configuration.
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    /// bcrypt cost factor used to hash API keys before persistence.
    pub kdf_cost: u32,
    /// Capacity of the in-process LRU cache of verified credentials.
    pub verify_cache_capacity: usize,
    /// Max verify failures per tenant per window before rate limiting kicks in.
    pub max_verify_failures: u32,
    /// Window over which verify failures are counted.
    pub verify_failure_window: Duration,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            kdf_cost: 12,
            verify_cache_capacity: 4096,
            max_verify_failures: 10,
            verify_failure_window: Duration::from_secs(60),
        }
    }
}

impl CredentialConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            kdf_cost: env_parse("LOGLYTICS_KDF_COST", default.kdf_cost),
            verify_cache_capacity: env_parse(
                "LOGLYTICS_VERIFY_CACHE_CAPACITY",
                default.verify_cache_capacity,
            ),
            max_verify_failures: env_parse(
                "LOGLYTICS_MAX_VERIFY_FAILURES",
                default.max_verify_failures,
            ),
            verify_failure_window: Duration::from_secs(env_parse(
                "LOGLYTICS_VERIFY_FAILURE_WINDOW_SECS",
                default.verify_failure_window.as_secs(),
            )),
        }
    }
}

/// Ingest admission control (C4) configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Sustained requests-per-window allowed per tenant.
    pub rate_limit_per_minute: u32,
    /// Burst allowance layered on top of the sustained rate.
    pub burst_allowance: u32,
    /// Rate limit window.
    pub rate_limit_window: Duration,
    /// Maximum accepted request body size, in bytes.
    pub max_body_bytes: usize,
    /// Maximum number of log lines accepted in a single ingest call.
    pub max_batch_lines: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 1000,
            burst_allowance: 200,
            rate_limit_window: Duration::from_secs(60),
            max_body_bytes: 10 * 1024 * 1024,
            max_batch_lines: 10_000,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            rate_limit_per_minute: env_parse(
                "LOGLYTICS_RATE_LIMIT_PER_MINUTE",
                default.rate_limit_per_minute,
            ),
            burst_allowance: env_parse("LOGLYTICS_BURST_ALLOWANCE", default.burst_allowance),
            rate_limit_window: Duration::from_secs(env_parse(
                "LOGLYTICS_RATE_LIMIT_WINDOW_SECS",
                default.rate_limit_window.as_secs(),
            )),
            max_body_bytes: env_parse("LOGLYTICS_MAX_BODY_BYTES", default.max_body_bytes),
            max_batch_lines: env_parse("LOGLYTICS_MAX_BATCH_LINES", default.max_batch_lines),
        }
    }
}

/// Live fan-out registry (C5) configuration.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Bounded channel capacity per subscriber.
    pub subscriber_buffer: usize,
    /// Dropped-frame count at which a subscriber is evicted.
    pub drop_eviction_threshold: u32,
    /// Heartbeat interval sent to idle subscribers.
    pub heartbeat_interval: Duration,
    /// Multiple of `heartbeat_interval` with no client activity before eviction.
    pub heartbeat_timeout_multiplier: u32,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            drop_eviction_threshold: 50,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout_multiplier: 2,
        }
    }
}

impl FanoutConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            subscriber_buffer: env_parse("LOGLYTICS_SUBSCRIBER_BUFFER", default.subscriber_buffer),
            drop_eviction_threshold: env_parse(
                "LOGLYTICS_DROP_EVICTION_THRESHOLD",
                default.drop_eviction_threshold,
            ),
            heartbeat_interval: Duration::from_secs(env_parse(
                "LOGLYTICS_HEARTBEAT_INTERVAL_SECS",
                default.heartbeat_interval.as_secs(),
            )),
            heartbeat_timeout_multiplier: env_parse(
                "LOGLYTICS_HEARTBEAT_TIMEOUT_MULTIPLIER",
                default.heartbeat_timeout_multiplier,
            ),
        }
    }
}

/// Analytics engine (C6) configuration.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// How long a computed report stays fresh before a cache miss recomputes it.
    pub cache_ttl: Duration,
    /// Z-score threshold above which a value is flagged anomalous.
    pub anomaly_z_threshold: f64,
    /// Minimum sample size before statistical anomaly checks are attempted.
    pub min_samples_for_stats: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            anomaly_z_threshold: 2.0,
            min_samples_for_stats: 10,
        }
    }
}

impl AnalyticsConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            cache_ttl: Duration::from_secs(env_parse(
                "LOGLYTICS_ANALYTICS_CACHE_TTL_SECS",
                default.cache_ttl.as_secs(),
            )),
            anomaly_z_threshold: env_parse(
                "LOGLYTICS_ANOMALY_Z_THRESHOLD",
                default.anomaly_z_threshold,
            ),
            min_samples_for_stats: env_parse(
                "LOGLYTICS_MIN_SAMPLES_FOR_STATS",
                default.min_samples_for_stats,
            ),
        }
    }
}

/// Retention sweep configuration: how long a record lives before it becomes
/// deletable, per spec §6 `retention.days`.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub retention_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { retention_days: 90 }
    }
}

impl RetentionConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            retention_days: env_parse("LOGLYTICS_RETENTION_DAYS", default.retention_days),
        }
    }
}

/// Top-level application configuration, aggregating every sub-config.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub credentials: CredentialConfig,
    pub ingest: IngestConfig,
    pub fanout: FanoutConfig,
    pub analytics: AnalyticsConfig,
    pub retention: RetentionConfig,
    /// Path to the SQLite database file. `None` opens an in-memory database.
    pub database_path: Option<String>,
    /// Address the HTTP server binds to.
    pub bind_addr: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            credentials: CredentialConfig::from_env(),
            ingest: IngestConfig::from_env(),
            fanout: FanoutConfig::from_env(),
            analytics: AnalyticsConfig::from_env(),
            retention: RetentionConfig::from_env(),
            database_path: std::env::var("LOGLYTICS_DATABASE_PATH").ok(),
            bind_addr: std::env::var("LOGLYTICS_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.credentials.kdf_cost, 12);
        assert_eq!(config.analytics.anomaly_z_threshold, 2.0);
        assert!(config.ingest.max_body_bytes > 0);
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        std::env::remove_var("LOGLYTICS_KDF_COST");
        let config = CredentialConfig::from_env();
        assert_eq!(config.kdf_cost, CredentialConfig::default().kdf_cost);
    }
}
