//! Normalizer (C3): maps a [`ParsedLine`] into the canonical fields of a
//! [`LogRecord`] — timestamp, level, message, source, service, metadata.
//!
//! Ported from `original_source/.../log_parser/normalizer.py`'s
//! `_initialize_log_level_mapping`, `_initialize_timestamp_patterns`, and
//! `_initialize_source_patterns`, re-expressed as compiled-once regex tables
//! instead of per-call compilation. Each field is derived by a fixed,
//! deterministic policy so that `normalize(normalize(x)) == normalize(x)`:
//! metadata is built purely from the parser's own output, never mutated in a
//! way that would change on a second pass.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;

use loglytics_core::LogLevel;

use crate::format::{Format, ParsedLine};

/// Event times further than this into the future are clamped to
/// `ingested_at`, per spec: "> 24h future -> clamp, mark in metadata".
const FUTURE_SKEW_LIMIT_HOURS: i64 = 24;

/// Keywords scanned, in order, when no structured level is available.
const LEVEL_KEYWORDS: &[(&str, LogLevel)] = &[
    ("critical", LogLevel::Critical),
    ("fatal", LogLevel::Fatal),
    ("exception", LogLevel::Error),
    ("error", LogLevel::Error),
    ("failure", LogLevel::Error),
    ("failed", LogLevel::Error),
    ("warning", LogLevel::Warn),
    ("warn", LogLevel::Warn),
    ("info", LogLevel::Info),
    ("debug", LogLevel::Debug),
];

/// The canonical fields this module is responsible for producing. C4 fills
/// in `tenant_id`, `ingested_at`, and `seq` before persistence.
#[derive(Debug, Clone)]
pub struct NormalizedFields {
    pub event_time: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: Option<String>,
    pub service: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

struct TimestampPatterns {
    apache_like: Regex,
    iso_no_tz: Regex,
    generic_scan: Regex,
    source_file_line: Regex,
    source_class_method: Regex,
    source_bracket: Regex,
    service_suffix: Regex,
    service_namespace: Regex,
}

impl TimestampPatterns {
    fn new() -> Self {
        Self {
            apache_like: Regex::new(r"^\d{1,2}/[A-Za-z]{3}/\d{4}:\d{2}:\d{2}:\d{2}\s+[+-]\d{4}$")
                .expect("apache_like"),
            iso_no_tz: Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}$").expect("iso_no_tz"),
            generic_scan: Regex::new(
                r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?",
            )
            .expect("generic_scan"),
            source_file_line: Regex::new(r"\b([\w./-]+\.\w+):(\d+)\b").expect("source_file_line"),
            source_class_method: Regex::new(r"\b([A-Z][\w]*\.[a-zA-Z_][\w]*)\(").expect("class_method"),
            source_bracket: Regex::new(r"\[([^\[\]]{1,64})\]").expect("source_bracket"),
            service_suffix: Regex::new(r"(?i)^([\w-]+)[-_](?:service|app)$").expect("service_suffix"),
            service_namespace: Regex::new(r"(?i)^([\w-]+)\.svc$").expect("service_namespace"),
        }
    }
}

fn patterns() -> &'static TimestampPatterns {
    static PATTERNS: OnceLock<TimestampPatterns> = OnceLock::new();
    PATTERNS.get_or_init(TimestampPatterns::new)
}

/// Try `raw`, a caller-supplied candidate timestamp, against RFC3339 first
/// and then the fixed strptime-equivalent list ported from the original
/// normalizer, in order. `reference_year` backs the syslog 3164 format,
/// which carries no year of its own.
fn parse_raw_timestamp(raw: &str, reference_year: i32) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    let p = patterns();

    if p.apache_like.is_match(raw) {
        if let Ok(parsed) = DateTime::parse_from_str(raw, "%d/%b/%Y:%H:%M:%S %z") {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y/%m/%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }

    if p.iso_no_tz.is_match(raw) {
        for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%a %b %d %H:%M:%S %Y") {
        return Some(Utc.from_utc_datetime(&naive));
    }

    // Syslog RFC 3164: "Dec 25 10:30:45", no year. Assume the reference year.
    let with_year = format!("{raw} {reference_year}");
    if let Ok(naive) = NaiveDateTime::parse_from_str(&with_year, "%b %d %H:%M:%S %Y") {
        return Some(Utc.from_utc_datetime(&naive));
    }

    None
}

/// Scan free text for the first ISO-8601-ish substring.
fn scan_message_for_timestamp(message: &str, reference_year: i32) -> Option<DateTime<Utc>> {
    let candidate = patterns().generic_scan.find(message)?.as_str();
    parse_raw_timestamp(candidate, reference_year)
}

fn normalize_timestamp(
    parsed: &ParsedLine,
    ingested_at: DateTime<Utc>,
) -> (DateTime<Utc>, bool) {
    let reference_year = ingested_at.year();
    let candidate = parsed
        .raw_timestamp
        .as_deref()
        .and_then(|raw| parse_raw_timestamp(raw, reference_year))
        .or_else(|| scan_message_for_timestamp(&parsed.message, reference_year));

    let event_time = candidate.unwrap_or(ingested_at);
    let skew = event_time - ingested_at;
    if skew.num_hours() > FUTURE_SKEW_LIMIT_HOURS {
        (ingested_at, true)
    } else {
        (event_time, false)
    }
}

fn normalize_level(parsed: &ParsedLine) -> LogLevel {
    if let Some(raw) = parsed.raw_level.as_deref() {
        if let Some(level) = LogLevel::from_name(raw) {
            return level;
        }
    }
    let lower = parsed.message.to_ascii_lowercase();
    for (keyword, level) in LEVEL_KEYWORDS {
        if lower.contains(keyword) {
            return *level;
        }
    }
    LogLevel::Info
}

fn normalize_message(parsed: &ParsedLine) -> String {
    if !parsed.message.is_empty() {
        return loglytics_core::LogRecord::truncate_message(&parsed.message);
    }
    // No message candidate survived parsing; serialize the residual fields
    // with a stable key order so the fallback is itself idempotent.
    let stable: std::collections::BTreeMap<&String, &Value> = parsed.fields.iter().collect();
    serde_json::to_string(&stable).unwrap_or_default()
}

fn normalize_source(parsed: &ParsedLine) -> Option<String> {
    if parsed.source.is_some() {
        return parsed.source.clone();
    }
    let p = patterns();
    if let Some(caps) = p.source_file_line.captures(&parsed.message) {
        return Some(format!("{}:{}", &caps[1], &caps[2]));
    }
    if let Some(caps) = p.source_class_method.captures(&parsed.message) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = p.source_bracket.captures(&parsed.message) {
        return Some(caps[1].to_string());
    }
    None
}

fn normalize_service(parsed: &ParsedLine, source: Option<&str>) -> Option<String> {
    if parsed.service.is_some() {
        return parsed.service.clone();
    }
    let source = source?;
    let p = patterns();
    if let Some(caps) = p.service_suffix.captures(source) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = p.service_namespace.captures(source) {
        return Some(caps[1].to_string());
    }
    None
}

/// Produce the canonical fields for one parsed line. `ingested_at` anchors
/// both the future-skew clamp and the syslog 3164 year inference.
pub fn normalize(parsed: ParsedLine, format: Format, ingested_at: DateTime<Utc>) -> NormalizedFields {
    let (event_time, clamped) = normalize_timestamp(&parsed, ingested_at);
    let level = normalize_level(&parsed);
    let source = normalize_source(&parsed);
    let service = normalize_service(&parsed, source.as_deref());
    let message = normalize_message(&parsed);

    let mut metadata = parsed.fields;
    metadata.insert(
        "original_format".to_string(),
        Value::String(format.as_str().to_string()),
    );
    if clamped {
        metadata.insert("timestamp_clamped".to_string(), Value::Bool(true));
    }

    NormalizedFields {
        event_time,
        level,
        message,
        source,
        service,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ingested_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn rfc3339_timestamp_passes_through() {
        let parsed = ParsedLine {
            raw_timestamp: Some("2024-01-15T10:30:45Z".to_string()),
            message: "db timeout".to_string(),
            ..Default::default()
        };
        let fields = normalize(parsed, Format::JsonLines, ingested_at());
        assert_eq!(fields.event_time, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap());
    }

    #[test]
    fn far_future_timestamp_is_clamped() {
        let parsed = ParsedLine {
            raw_timestamp: Some("2030-01-15T10:30:45Z".to_string()),
            message: "future event".to_string(),
            ..Default::default()
        };
        let fields = normalize(parsed, Format::JsonLines, ingested_at());
        assert_eq!(fields.event_time, ingested_at());
        assert_eq!(fields.metadata.get("timestamp_clamped"), Some(&Value::Bool(true)));
    }

    #[test]
    fn level_falls_back_to_message_keyword_scan() {
        let parsed = ParsedLine {
            message: "connection failed: timeout exceeded".to_string(),
            ..Default::default()
        };
        let fields = normalize(parsed, Format::GenericTimestamped, ingested_at());
        assert_eq!(fields.level, LogLevel::Error);
    }

    #[test]
    fn level_defaults_to_info_without_any_signal() {
        let parsed = ParsedLine {
            message: "everything is fine".to_string(),
            ..Default::default()
        };
        let fields = normalize(parsed, Format::GenericTimestamped, ingested_at());
        assert_eq!(fields.level, LogLevel::Info);
    }

    #[test]
    fn source_extracted_from_bracket_token_when_parser_silent() {
        let parsed = ParsedLine {
            message: "[payments] charge succeeded".to_string(),
            ..Default::default()
        };
        let fields = normalize(parsed, Format::GenericTimestamped, ingested_at());
        assert_eq!(fields.source.as_deref(), Some("payments"));
    }

    #[test]
    fn normalize_is_idempotent_over_its_own_output_shape() {
        let parsed = ParsedLine {
            raw_timestamp: Some("2024-01-15T10:30:45Z".to_string()),
            raw_level: Some("error".to_string()),
            message: "db timeout".to_string(),
            source: Some("ns1/p1".to_string()),
            ..Default::default()
        };
        let first = normalize(parsed.clone(), Format::Kubernetes, ingested_at());
        let reparsed = ParsedLine {
            raw_timestamp: Some(first.event_time.to_rfc3339()),
            raw_level: Some(first.level.as_str().to_string()),
            message: first.message.clone(),
            source: first.source.clone(),
            service: first.service.clone(),
            fields: first.metadata.clone(),
        };
        let second = normalize(reparsed, Format::Kubernetes, ingested_at());
        assert_eq!(first.event_time, second.event_time);
        assert_eq!(first.level, second.level);
        assert_eq!(first.message, second.message);
    }
}
