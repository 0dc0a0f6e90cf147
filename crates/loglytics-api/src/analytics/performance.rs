//! Performance report: response-time distribution, throughput, slow
//! operations, per-endpoint latency, and resource-usage mentions extracted
//! from message text. Ported from `performance_analyzer.py`.
//!
//! Percentiles use the nearest-rank method rather than the original's
//! linear interpolation -- a deliberate divergence from the Python source
//! (see the glossary entry on percentile calculation).

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use regex::Regex;
use serde_json::{json, Value};

use loglytics_core::{LogLevel, LogRecord};

const SLOW_OPERATION_THRESHOLD_MS: f64 = 1000.0;
const HISTOGRAM_BUCKETS: usize = 10;
const TOP_SLOW_OPERATIONS: usize = 10;
const TOP_ENDPOINTS: usize = 15;
/// Response times must lie in this range to be counted; anything outside is
/// almost certainly a mis-extraction, not a real measurement.
const RESPONSE_TIME_RANGE_MS: (f64, f64) = (0.0, 300_000.0);

struct DurationPatterns {
    patterns: Vec<Regex>,
}

impl DurationPatterns {
    fn new() -> Self {
        let raw = [
            r"(?i)\btook\s+(\d+(?:\.\d+)?)\s*(ms|milliseconds|s|seconds)\b",
            r"(?i)\bduration[:=]?\s*(\d+(?:\.\d+)?)\s*(ms|milliseconds|s|seconds)\b",
            r"(?i)\belapsed[:=]?\s*(\d+(?:\.\d+)?)\s*(ms|milliseconds|s|seconds)\b",
            r"(?i)\bresponded in\s+(\d+(?:\.\d+)?)\s*(ms|milliseconds|s|seconds)\b",
            r"(?i)\bcompleted in\s+(\d+(?:\.\d+)?)\s*(ms|milliseconds|s|seconds)\b",
        ];
        Self { patterns: raw.iter().map(|p| Regex::new(p).expect("static duration pattern")).collect() }
    }

    fn extract_ms(&self, message: &str) -> Option<f64> {
        for pattern in &self.patterns {
            if let Some(caps) = pattern.captures(message) {
                let value: f64 = caps.get(1)?.as_str().parse().ok()?;
                let unit = caps.get(2)?.as_str().to_ascii_lowercase();
                let ms = if unit.starts_with('s') { value * 1000.0 } else { value };
                if ms > RESPONSE_TIME_RANGE_MS.0 && ms <= RESPONSE_TIME_RANGE_MS.1 {
                    return Some(ms);
                }
                return None;
            }
        }
        None
    }
}

fn endpoint_pattern() -> Regex {
    Regex::new(r"(?i)\b(GET|POST|PUT|DELETE|PATCH|HEAD)\s+(\S+).*?(\d+(?:\.\d+)?)\s*ms\b").expect("static endpoint pattern")
}

fn cpu_pattern() -> Regex {
    Regex::new(r"(?i)\bcpu[:=]?\s*(\d+(?:\.\d+)?)\s*%").expect("static cpu pattern")
}

fn memory_pattern() -> Regex {
    Regex::new(r"(?i)\bmem(?:ory)?[:=]?\s*(\d+(?:\.\d+)?)\s*%").expect("static memory pattern")
}

pub fn compute(records: &[LogRecord]) -> Value {
    if records.is_empty() {
        return json!({
            "sample_count": 0,
            "response_time": Value::Null,
            "throughput": Value::Null,
            "slow_operations": [],
            "endpoints": [],
            "resource_usage": Value::Null,
        });
    }

    let duration_patterns = DurationPatterns::new();
    let mut durations: Vec<f64> = records.iter().filter_map(|r| duration_patterns.extract_ms(&r.message)).collect();
    durations.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let response_time = if durations.is_empty() {
        Value::Null
    } else {
        json!({
            "count": durations.len(),
            "min_ms": durations.first().copied().unwrap_or(0.0),
            "max_ms": durations.last().copied().unwrap_or(0.0),
            "avg_ms": durations.iter().sum::<f64>() / durations.len() as f64,
            "p50_ms": percentile_nearest_rank(&durations, 50.0),
            "p95_ms": percentile_nearest_rank(&durations, 95.0),
            "p99_ms": percentile_nearest_rank(&durations, 99.0),
            "histogram": histogram(&durations),
        })
    };

    json!({
        "sample_count": records.len(),
        "response_time": response_time,
        "throughput": throughput(records),
        "slow_operations": slow_operations(records, &duration_patterns),
        "endpoints": endpoint_performance(records),
        "resource_usage": resource_usage(records),
    })
}

/// Nearest-rank percentile: rank = ceil(p/100 * n), 1-indexed into the
/// sorted sample.
fn percentile_nearest_rank(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

fn histogram(sorted: &[f64]) -> Vec<Value> {
    let min = *sorted.first().unwrap();
    let max = *sorted.last().unwrap();
    if (max - min).abs() < f64::EPSILON {
        return vec![json!({"range_start_ms": min, "range_end_ms": max, "count": sorted.len()})];
    }
    let width = (max - min) / HISTOGRAM_BUCKETS as f64;
    let mut counts = vec![0usize; HISTOGRAM_BUCKETS];
    for &value in sorted {
        let mut bucket = ((value - min) / width) as usize;
        if bucket >= HISTOGRAM_BUCKETS {
            bucket = HISTOGRAM_BUCKETS - 1;
        }
        counts[bucket] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| {
            json!({
                "range_start_ms": min + width * i as f64,
                "range_end_ms": min + width * (i + 1) as f64,
                "count": count,
            })
        })
        .collect()
}

/// Logs-per-minute min/max/avg, estimated logs-per-second (`avg/60`), and
/// the single busiest minute.
fn throughput(records: &[LogRecord]) -> Value {
    let mut minute_counts: HashMap<DateTime<Utc>, usize> = HashMap::new();
    for record in records {
        let minute = record
            .event_time
            .date_naive()
            .and_hms_opt(record.event_time.hour(), record.event_time.minute(), 0)
            .unwrap()
            .and_utc();
        *minute_counts.entry(minute).or_insert(0) += 1;
    }

    let counts: Vec<usize> = minute_counts.values().copied().collect();
    let min = counts.iter().copied().min().unwrap_or(0);
    let max = counts.iter().copied().max().unwrap_or(0);
    let avg = if counts.is_empty() { 0.0 } else { counts.iter().sum::<usize>() as f64 / counts.len() as f64 };

    let peak = minute_counts
        .iter()
        .max_by_key(|(_, count)| **count)
        .map(|(time, count)| (*time, *count));

    json!({
        "logs_per_minute": {"min": min, "max": max, "avg": avg},
        "estimated_logs_per_second": avg / 60.0,
        "peak_minute": peak.map(|(time, count)| json!({
            "time": time.to_rfc3339(),
            "count": count,
        })).unwrap_or(Value::Null),
    })
}

fn slow_operations(records: &[LogRecord], patterns: &DurationPatterns) -> Vec<Value> {
    let mut grouped: HashMap<&str, (usize, f64)> = HashMap::new();
    for record in records {
        let Some(duration) = patterns.extract_ms(&record.message) else { continue };
        if duration < SLOW_OPERATION_THRESHOLD_MS {
            continue;
        }
        let entry = grouped.entry(record.message.as_str()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 = entry.1.max(duration);
    }
    let mut ranked: Vec<(&str, usize, f64)> =
        grouped.into_iter().map(|(message, (count, max_ms))| (message, count, max_ms)).collect();
    ranked.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap());
    ranked.truncate(TOP_SLOW_OPERATIONS);
    ranked
        .into_iter()
        .map(|(message, count, max_ms)| {
            json!({
                "message": super::truncate_chars(message, 150),
                "occurrences": count,
                "max_duration_ms": max_ms,
                "severity": slow_severity(max_ms),
            })
        })
        .collect()
}

fn slow_severity(duration_ms: f64) -> &'static str {
    if duration_ms >= 10_000.0 {
        "critical"
    } else if duration_ms >= 5_000.0 {
        "high"
    } else {
        "medium"
    }
}

#[derive(Default)]
struct EndpointStats {
    durations: Vec<f64>,
    error_count: usize,
}

/// Per `(METHOD, path)` average latency, error rate, and
/// `score = (1 - error_rate) * 1000 / (avg_ms + 1)`, highest score first.
fn endpoint_performance(records: &[LogRecord]) -> Vec<Value> {
    let pattern = endpoint_pattern();
    let mut grouped: HashMap<String, EndpointStats> = HashMap::new();
    for record in records {
        let Some(caps) = pattern.captures(&record.message) else { continue };
        let method = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let path = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let Some(duration) = caps.get(3).and_then(|m| m.as_str().parse::<f64>().ok()) else { continue };
        if !(duration > RESPONSE_TIME_RANGE_MS.0 && duration <= RESPONSE_TIME_RANGE_MS.1) {
            continue;
        }
        let entry = grouped.entry(format!("{method} {path}")).or_default();
        entry.durations.push(duration);
        if record.level.is_error_class() {
            entry.error_count += 1;
        }
    }

    let mut ranked: Vec<(String, f64, f64, f64, usize)> = grouped
        .into_iter()
        .map(|(endpoint, mut stats)| {
            stats.durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let count = stats.durations.len();
            let avg_ms = stats.durations.iter().sum::<f64>() / count as f64;
            let error_rate = stats.error_count as f64 / count as f64;
            let score = (1.0 - error_rate) * 1000.0 / (avg_ms + 1.0);
            (endpoint, avg_ms, error_rate, score, count)
        })
        .collect();
    ranked.sort_by(|a, b| b.3.partial_cmp(&a.3).unwrap());
    ranked.truncate(TOP_ENDPOINTS);

    ranked
        .into_iter()
        .map(|(endpoint, avg_ms, error_rate, score, count)| {
            json!({
                "endpoint": endpoint,
                "count": count,
                "avg_ms": avg_ms,
                "error_rate": error_rate,
                "score": score,
            })
        })
        .collect()
}

fn resource_usage(records: &[LogRecord]) -> Value {
    let cpu = cpu_pattern();
    let memory = memory_pattern();
    let mut cpu_values: Vec<f64> = Vec::new();
    let mut memory_values: Vec<f64> = Vec::new();
    for record in records {
        if let Some(caps) = cpu.captures(&record.message) {
            if let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
                if (0.0..=100.0).contains(&value) {
                    cpu_values.push(value);
                }
            }
        }
        if let Some(caps) = memory.captures(&record.message) {
            if let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
                if (0.0..=100.0).contains(&value) {
                    memory_values.push(value);
                }
            }
        }
    }
    if cpu_values.is_empty() && memory_values.is_empty() {
        return Value::Null;
    }
    json!({
        "cpu": resource_stats(&cpu_values),
        "memory": resource_stats(&memory_values),
    })
}

/// count/min/max/mean/median for a resource-usage sample.
fn resource_stats(values: &[f64]) -> Value {
    if values.is_empty() {
        return json!({"count": 0, "min": 0.0, "max": 0.0, "mean": 0.0, "median": 0.0});
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    json!({
        "count": sorted.len(),
        "min": sorted.first().copied().unwrap_or(0.0),
        "max": sorted.last().copied().unwrap_or(0.0),
        "mean": sorted.iter().sum::<f64>() / sorted.len() as f64,
        "median": percentile_nearest_rank(&sorted, 50.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            tenant_id: "t1".to_string(),
            ingested_at: chrono::Utc::now(),
            seq: 0,
            event_time: chrono::Utc::now(),
            level: LogLevel::Info,
            message: message.to_string(),
            source: None,
            service: None,
            metadata: BTreeMap::new(),
            raw: "{}".to_string(),
        }
    }

    #[test]
    fn percentile_uses_nearest_rank() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_nearest_rank(&sorted, 50.0), 3.0);
        assert_eq!(percentile_nearest_rank(&sorted, 95.0), 5.0);
    }

    #[test]
    fn extracts_duration_from_message() {
        let patterns = DurationPatterns::new();
        assert_eq!(patterns.extract_ms("request took 150ms"), Some(150.0));
        assert_eq!(patterns.extract_ms("completed in 2 s"), Some(2000.0));
        assert_eq!(patterns.extract_ms("no timing here"), None);
    }

    #[test]
    fn classifies_slow_operations_by_severity() {
        assert_eq!(slow_severity(12_000.0), "critical");
        assert_eq!(slow_severity(6_000.0), "high");
        assert_eq!(slow_severity(1_500.0), "medium");
    }

    #[test]
    fn endpoint_extraction_groups_by_method_and_path() {
        let records = vec![record("GET /api/users responded 200 in 45ms"), record("GET /api/users responded 200 in 55ms")];
        let value = compute(&records);
        let endpoints = value["endpoints"].as_array().unwrap();
        assert_eq!(endpoints[0]["endpoint"], "GET /api/users");
        assert_eq!(endpoints[0]["count"], 2);
    }
}
