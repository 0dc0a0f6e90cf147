//! Canonical entities: `Tenant`, `LogRecord`, `LogLevel`, `AnalyticsCacheEntry`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum size of a canonical `message` field before truncation.
pub const MAX_MESSAGE_BYTES: usize = 65_536;
/// Maximum number of keys a record's `metadata` map may carry.
pub const MAX_METADATA_KEYS: usize = 1_000;
/// Maximum nesting depth of `metadata` values.
pub const MAX_METADATA_DEPTH: usize = 10;
/// Marker appended to a message truncated at `MAX_MESSAGE_BYTES`.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Canonical log severity, ordered from least to most severe.
///
/// The ordering backs the "ERROR|CRITICAL|FATAL" and "ERROR|CRITICAL|WARN"
/// class checks the analytics engine runs against stored records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Notice,
    Warn,
    Error,
    Critical,
    Alert,
    Emergency,
    Fatal,
}

impl LogLevel {
    /// Canonical name, matching spec wire format (upper-case).
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Notice => "NOTICE",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
            LogLevel::Alert => "ALERT",
            LogLevel::Emergency => "EMERGENCY",
            LogLevel::Fatal => "FATAL",
        }
    }

    /// Syslog numeric severity (RFC 5424, 0 = emergency .. 7 = debug).
    pub fn from_syslog_numeric(n: u8) -> Option<Self> {
        match n {
            0 => Some(LogLevel::Emergency),
            1 => Some(LogLevel::Alert),
            2 => Some(LogLevel::Critical),
            3 => Some(LogLevel::Error),
            4 => Some(LogLevel::Warn),
            5 => Some(LogLevel::Notice),
            6 => Some(LogLevel::Info),
            7 => Some(LogLevel::Debug),
            _ => None,
        }
    }

    /// Case-insensitive lookup covering named levels, syslog numerics (as
    /// strings), and vendor synonyms. Ported from the original Python
    /// normalizer's `_initialize_log_level_mapping`.
    pub fn from_name(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if let Ok(n) = trimmed.parse::<u8>() {
            if let Some(level) = Self::from_syslog_numeric(n) {
                return Some(level);
            }
        }
        let lower = trimmed.to_ascii_lowercase();
        let level = match lower.as_str() {
            "trace" => LogLevel::Trace,
            "debug" | "verbose" => LogLevel::Debug,
            "info" | "information" | "informational" => LogLevel::Info,
            "notice" => LogLevel::Notice,
            "warn" | "warning" => LogLevel::Warn,
            "error" | "err" => LogLevel::Error,
            "critical" | "crit" | "severe" => LogLevel::Critical,
            "alert" => LogLevel::Alert,
            "emergency" | "emerg" | "panic" => LogLevel::Emergency,
            "fatal" => LogLevel::Fatal,
            _ => return None,
        };
        Some(level)
    }

    /// True for the "ERROR|CRITICAL|FATAL" class the error-analysis report
    /// scans for (spec §4.6 error-analysis).
    pub fn is_error_class(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical | LogLevel::Fatal)
    }

    /// True for the "ERROR|CRITICAL|WARN" class the anomaly and pattern
    /// reports scan for (spec §4.6 anomalies/patterns).
    pub fn is_anomaly_class(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical | LogLevel::Warn)
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a `Tenant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Inactive,
    Active,
    Error,
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TenantStatus::Inactive => "inactive",
            TenantStatus::Active => "active",
            TenantStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// The unit of isolation and authentication on the ingest path.
///
/// `api_key_hash` is a salted one-way digest; the plaintext key exists only
/// in the response of the creation call and is never recoverable from this
/// struct or its persisted form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: String,
    pub owner_user_id: String,
    pub name: String,
    pub platform_tag: String,
    pub api_key_hash: String,
    pub api_key_prefix: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub total_received: i64,
    pub status: TenantStatus,
}

/// A canonical log record, produced by the normalizer (C3) and persisted by
/// the ingest pipeline (C4). Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub tenant_id: String,
    /// Set by C4 at persistence time; monotonic per tenant at second
    /// granularity.
    pub ingested_at: DateTime<Utc>,
    /// Position within the ingest batch that produced this record; together
    /// with `(tenant_id, ingested_at)` this uniquely identifies a record.
    pub seq: i64,
    pub event_time: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: Option<String>,
    pub service: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    /// The original wire payload for this record, retained for audit.
    pub raw: String,
}

impl LogRecord {
    /// Truncate `message` to `MAX_MESSAGE_BYTES`, appending a marker, if it
    /// exceeds the limit. Truncation happens on UTF-8 char boundaries.
    pub fn truncate_message(message: &str) -> String {
        if message.len() <= MAX_MESSAGE_BYTES {
            return message.to_string();
        }
        let budget = MAX_MESSAGE_BYTES.saturating_sub(TRUNCATION_MARKER.len());
        let mut end = budget.min(message.len());
        while end > 0 && !message.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}{}", &message[..end], TRUNCATION_MARKER)
    }
}

/// A cached analytics report for a tenant. Lifetime = TTL from
/// `computed_at`; replaced atomically on recompute, evicted lazily.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsCacheEntry {
    pub tenant_id: String,
    pub analytics_type: String,
    pub scope_id: Option<String>,
    pub payload: Value,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_matches_severity() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Critical < LogLevel::Fatal);
    }

    #[test]
    fn level_from_name_covers_syslog_numerics() {
        assert_eq!(LogLevel::from_name("3"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_name("0"), Some(LogLevel::Emergency));
        assert_eq!(LogLevel::from_name("7"), Some(LogLevel::Debug));
    }

    #[test]
    fn level_from_name_covers_vendor_synonyms() {
        assert_eq!(LogLevel::from_name("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_name("verbose"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_name("information"), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_name("severe"), Some(LogLevel::Critical));
        assert_eq!(LogLevel::from_name("unknown-level"), None);
    }

    #[test]
    fn error_and_anomaly_classes() {
        assert!(LogLevel::Fatal.is_error_class());
        assert!(!LogLevel::Warn.is_error_class());
        assert!(LogLevel::Warn.is_anomaly_class());
        assert!(!LogLevel::Info.is_anomaly_class());
    }

    #[test]
    fn truncate_message_respects_char_boundaries() {
        let long = "a".repeat(MAX_MESSAGE_BYTES + 100);
        let truncated = LogRecord::truncate_message(&long);
        assert!(truncated.len() <= MAX_MESSAGE_BYTES);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
    }
}
