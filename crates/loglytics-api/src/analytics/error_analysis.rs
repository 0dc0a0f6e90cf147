//! Error analysis report: timeline, per-service breakdown, keyword
//! categorization, mean time between failures, and hotspot sources. Ported
//! from `metrics_calculator.py`'s `get_error_analysis`, with the keyword
//! categories renamed to the spec's canonical set.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use loglytics_core::LogRecord;

const HOTSPOT_LIMIT: usize = 10;
const SERVICE_LIMIT: usize = 20;

/// Categories in priority order: the first whose keyword list matches the
/// lower-cased message wins, so list the more specific categories first.
const CATEGORIES: &[(&str, &[&str])] = &[
    ("timeout", &["timeout", "timed out", "deadline exceeded"]),
    ("connection", &["connection refused", "connection reset", "connection closed", "econnrefused"]),
    ("permission", &["permission denied", "forbidden", "unauthorized", "access denied"]),
    (
        "resource-exhaustion",
        &["out of memory", "oom", "disk full", "too many open files", "quota exceeded", "resource exhausted"],
    ),
    ("configuration", &["config", "configuration", "missing env", "invalid setting"]),
    ("database", &["sql", "database", "deadlock", "constraint violation", "query failed"]),
    ("network", &["network", "dns", "unreachable", "socket"]),
    ("null-reference", &["null pointer", "nullpointerexception", "none type", "nullreferenceexception", "undefined is not"]),
];

pub fn compute(records: &[LogRecord]) -> Value {
    let errors: Vec<&LogRecord> = records.iter().filter(|r| r.level.is_error_class()).collect();
    if errors.is_empty() {
        return json!({
            "total_errors": 0,
            "error_timeline": [],
            "errors_by_service": [],
            "error_categories": {},
            "mtbf_hours": 0.0,
            "error_hotspots": [],
            "recurring_errors": 0,
            "first_time_errors": 0,
        });
    }

    json!({
        "total_errors": errors.len(),
        "error_timeline": timeline(&errors),
        "errors_by_service": by_service(&errors),
        "error_categories": categories(&errors),
        "mtbf_hours": mtbf_hours(&errors),
        "error_hotspots": hotspots(&errors),
        "recurring_errors": recurring_count(&errors, true),
        "first_time_errors": recurring_count(&errors, false),
    })
}

fn timeline(errors: &[&LogRecord]) -> Vec<Value> {
    let mut buckets: BTreeMap<String, usize> = BTreeMap::new();
    for record in errors {
        let key = record.event_time.format("%Y-%m-%dT%H:00:00Z").to_string();
        *buckets.entry(key).or_insert(0) += 1;
    }
    buckets.into_iter().map(|(time, count)| json!({"time": time, "count": count})).collect()
}

fn by_service(errors: &[&LogRecord]) -> Vec<Value> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in errors {
        let service = record.service.as_deref().unwrap_or("unknown");
        *counts.entry(service).or_insert(0) += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(SERVICE_LIMIT);
    ranked.into_iter().map(|(service, count)| json!({"service": service, "count": count})).collect()
}

fn categorize(message: &str) -> &'static str {
    let lower = message.to_ascii_lowercase();
    for (name, keywords) in CATEGORIES {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return name;
        }
    }
    "other"
}

fn categories(errors: &[&LogRecord]) -> Value {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for record in errors {
        *counts.entry(categorize(&record.message)).or_insert(0) += 1;
    }
    json!(counts)
}

/// Mean interval, in hours, between consecutive error timestamps. `0` below
/// two samples -- there is no interval to measure.
fn mtbf_hours(errors: &[&LogRecord]) -> f64 {
    if errors.len() < 2 {
        return 0.0;
    }
    let mut times: Vec<DateTime<Utc>> = errors.iter().map(|r| r.event_time).collect();
    times.sort();
    let deltas: Vec<f64> = times
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_seconds() as f64 / 3600.0)
        .collect();
    deltas.iter().sum::<f64>() / deltas.len() as f64
}

fn hotspots(errors: &[&LogRecord]) -> Vec<Value> {
    let mut per_source: HashMap<&str, (usize, HashSet<&str>)> = HashMap::new();
    for record in errors {
        let source = record.source.as_deref().unwrap_or("unknown");
        let entry = per_source.entry(source).or_insert((0, HashSet::new()));
        entry.0 += 1;
        entry.1.insert(record.message.as_str());
    }
    let mut ranked: Vec<(&str, usize, usize)> =
        per_source.into_iter().map(|(source, (count, messages))| (source, count, messages.len())).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(HOTSPOT_LIMIT);
    ranked
        .into_iter()
        .map(|(source, count, distinct_messages)| {
            json!({"source": source, "error_count": count, "distinct_messages": distinct_messages})
        })
        .collect()
}

fn recurring_count(errors: &[&LogRecord], recurring: bool) -> usize {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in errors {
        *counts.entry(record.message.as_str()).or_insert(0) += 1;
    }
    counts.values().filter(|&&count| if recurring { count > 1 } else { count == 1 }).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use loglytics_core::LogLevel;
    use std::collections::BTreeMap as Map;

    fn record(message: &str, level: LogLevel, service: Option<&str>, hour_offset: i64) -> LogRecord {
        LogRecord {
            tenant_id: "t1".to_string(),
            ingested_at: Utc::now(),
            seq: 0,
            event_time: Utc::now() - chrono::Duration::hours(hour_offset),
            level,
            message: message.to_string(),
            source: Some("svc-a".to_string()),
            service: service.map(|s| s.to_string()),
            metadata: Map::new(),
            raw: "{}".to_string(),
        }
    }

    #[test]
    fn categorizes_by_keyword() {
        assert_eq!(categorize("Connection refused by peer"), "connection");
        assert_eq!(categorize("request timed out after 30s"), "timeout");
        assert_eq!(categorize("totally unrecognized failure"), "other");
    }

    #[test]
    fn mtbf_is_zero_below_two_samples() {
        let errors = vec![record("boom", LogLevel::Error, None, 0)];
        let refs: Vec<&LogRecord> = errors.iter().collect();
        assert_eq!(mtbf_hours(&refs), 0.0);
    }

    #[test]
    fn recurring_and_first_time_partition_messages() {
        let errors = vec![
            record("boom", LogLevel::Error, Some("svc"), 1),
            record("boom", LogLevel::Error, Some("svc"), 2),
            record("unique", LogLevel::Error, Some("svc"), 3),
        ];
        let value = compute(&errors);
        assert_eq!(value["recurring_errors"], 1);
        assert_eq!(value["first_time_errors"], 1);
    }
}
