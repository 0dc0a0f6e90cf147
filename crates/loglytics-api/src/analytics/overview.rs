//! Overview report: volume, level distribution, timeline, and the noisiest
//! error/warning messages. Ported from `metrics_calculator.py`'s
//! `get_overview_metrics`.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use loglytics_core::{LogLevel, LogRecord};

use super::truncate_chars;

/// Timeline buckets hourly under this span, daily at or above it.
const HOURLY_SPAN_LIMIT_HOURS: i64 = 24 * 7;
const TOP_MESSAGE_LIMIT: usize = 10;
const TOP_MESSAGE_CHAR_LIMIT: usize = 100;

pub fn compute(records: &[LogRecord]) -> Value {
    if records.is_empty() {
        return json!({
            "total_count": 0,
            "date_range": { "first": null, "last": null },
            "level_distribution": {},
            "timeline": [],
            "top_errors": [],
            "top_warnings": [],
            "distinct_sources": 0,
        });
    }

    let first = records.iter().map(|r| r.event_time).min().unwrap();
    let last = records.iter().map(|r| r.event_time).max().unwrap();

    let mut level_distribution: BTreeMap<&'static str, usize> = BTreeMap::new();
    for record in records {
        *level_distribution.entry(record.level.as_str()).or_insert(0) += 1;
    }

    let distinct_sources = records
        .iter()
        .filter_map(|r| r.source.as_deref())
        .collect::<HashSet<_>>()
        .len();

    json!({
        "total_count": records.len(),
        "date_range": { "first": first.to_rfc3339(), "last": last.to_rfc3339() },
        "level_distribution": level_distribution,
        "timeline": timeline(records, first, last),
        "top_errors": top_messages(records, LogLevel::Error),
        "top_warnings": top_messages(records, LogLevel::Warn),
        "distinct_sources": distinct_sources,
    })
}

fn timeline(records: &[LogRecord], first: DateTime<Utc>, last: DateTime<Utc>) -> Vec<Value> {
    let span_hours = (last - first).num_hours();
    let hourly = span_hours < HOURLY_SPAN_LIMIT_HOURS;

    let mut buckets: BTreeMap<String, BTreeMap<&'static str, usize>> = BTreeMap::new();
    for record in records {
        let key = if hourly {
            record.event_time.format("%Y-%m-%dT%H:00:00Z").to_string()
        } else {
            record.event_time.format("%Y-%m-%d").to_string()
        };
        *buckets.entry(key).or_default().entry(record.level.as_str()).or_insert(0) += 1;
    }

    buckets
        .into_iter()
        .map(|(time, levels)| {
            let mut obj = serde_json::Map::new();
            obj.insert("time".to_string(), json!(time));
            for (level, count) in levels {
                obj.insert(level.to_string(), json!(count));
            }
            Value::Object(obj)
        })
        .collect()
}

fn top_messages(records: &[LogRecord], level: LogLevel) -> Vec<Value> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records.iter().filter(|r| r.level == level) {
        *counts.entry(record.message.as_str()).or_insert(0) += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(TOP_MESSAGE_LIMIT);
    ranked
        .into_iter()
        .map(|(message, count)| json!({"message": truncate_chars(message, TOP_MESSAGE_CHAR_LIMIT), "count": count}))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn record(level: LogLevel, message: &str, hour_offset: i64) -> LogRecord {
        LogRecord {
            tenant_id: "t1".to_string(),
            ingested_at: Utc::now(),
            seq: 0,
            event_time: Utc::now() - chrono::Duration::hours(hour_offset),
            level,
            message: message.to_string(),
            source: Some("api".to_string()),
            service: None,
            metadata: Map::new(),
            raw: "{}".to_string(),
        }
    }

    #[test]
    fn empty_input_yields_zeroed_overview() {
        let value = compute(&[]);
        assert_eq!(value["total_count"], 0);
        assert_eq!(value["date_range"]["first"], Value::Null);
    }

    #[test]
    fn counts_messages_and_levels() {
        let records = vec![
            record(LogLevel::Error, "boom", 1),
            record(LogLevel::Error, "boom", 2),
            record(LogLevel::Warn, "slow", 3),
            record(LogLevel::Info, "ok", 4),
        ];
        let value = compute(&records);
        assert_eq!(value["total_count"], 4);
        assert_eq!(value["level_distribution"]["ERROR"], 2);
        assert_eq!(value["top_errors"][0]["message"], "boom");
        assert_eq!(value["top_errors"][0]["count"], 2);
        assert_eq!(value["distinct_sources"], 1);
    }
}
