//! Anomaly detection report: four independent sub-checks (statistical,
//! volume, temporal, pattern-rarity) each gated on its own minimum sample
//! size, combined into a per-period anomaly score. Ported from
//! `anomaly_detector.py`.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use serde_json::{json, Value};

use loglytics_core::LogRecord;

const STATISTICAL_MIN_TOTAL: usize = 10;
const STATISTICAL_MIN_HOURS: usize = 3;
const VOLUME_MIN_TOTAL: usize = 20;
const TEMPORAL_MIN_TOTAL: usize = 50;
const TEMPORAL_MIN_ERRORS: usize = 10;
const PATTERN_MIN_TOTAL: usize = 20;
const PATTERN_MIN_ERRORS: usize = 10;
const PATTERN_RARITY_THRESHOLD: f64 = 0.05;
const VOLUME_CHANGE_THRESHOLD_PCT: f64 = 100.0;
const TEMPORAL_MULTIPLIER: f64 = 3.0;

pub fn compute(records: &[LogRecord], z_threshold: f64, min_samples: usize) -> Value {
    if records.len() < min_samples {
        return json!({
            "sample_count": records.len(),
            "statistical": [],
            "volume": [],
            "temporal": [],
            "pattern": [],
            "anomaly_scores": [],
        });
    }

    let hourly_counts = hourly_error_counts(records);
    let statistical = statistical_anomalies(&hourly_counts, z_threshold);
    let volume = volume_anomalies(records, &hourly_counts);
    let temporal = temporal_anomalies(records);
    let pattern = pattern_anomalies(records);

    let all_hourly = hourly_record_stats(records);
    let anomaly_scores = per_hour_anomaly_scores(&all_hourly, &statistical, &volume);

    json!({
        "sample_count": records.len(),
        "statistical": statistical,
        "volume": volume,
        "temporal": temporal,
        "pattern": pattern,
        "anomaly_scores": anomaly_scores,
    })
}

fn hourly_error_counts(records: &[LogRecord]) -> Vec<(DateTime<Utc>, usize)> {
    let mut buckets: HashMap<DateTime<Utc>, usize> = HashMap::new();
    for record in records.iter().filter(|r| r.level.is_anomaly_class()) {
        let hour = record.event_time.date_naive().and_hms_opt(record.event_time.hour(), 0, 0).unwrap().and_utc();
        *buckets.entry(hour).or_insert(0) += 1;
    }
    let mut ranked: Vec<(DateTime<Utc>, usize)> = buckets.into_iter().collect();
    ranked.sort_by_key(|(time, _)| *time);
    ranked
}

/// Per-hour `(total_logs, error_count)` over every record, errors being
/// `is_anomaly_class` (ERROR/CRITICAL/WARN). Backs the per-hour anomaly
/// score, which -- unlike the other three sub-checks -- weighs a hour's
/// full log volume, not just its error volume.
fn hourly_record_stats(records: &[LogRecord]) -> Vec<(DateTime<Utc>, usize, usize)> {
    let mut buckets: HashMap<DateTime<Utc>, (usize, usize)> = HashMap::new();
    for record in records {
        let hour = record.event_time.date_naive().and_hms_opt(record.event_time.hour(), 0, 0).unwrap().and_utc();
        let entry = buckets.entry(hour).or_insert((0, 0));
        entry.0 += 1;
        if record.level.is_anomaly_class() {
            entry.1 += 1;
        }
    }
    let mut ranked: Vec<(DateTime<Utc>, usize, usize)> =
        buckets.into_iter().map(|(time, (total, errors))| (time, total, errors)).collect();
    ranked.sort_by_key(|(time, _, _)| *time);
    ranked
}

/// Maximum findings returned by the statistical and volume sub-checks.
const TOP_ANOMALIES: usize = 10;
/// |z| above which a statistical anomaly is "high" severity rather than
/// "medium".
const STATISTICAL_HIGH_SEVERITY_Z: f64 = 3.0;

/// Flags hours whose error count's z-score (against the mean/stddev of all
/// hourly counts) exceeds `z_threshold`. Requires at least
/// `STATISTICAL_MIN_TOTAL` errors across at least `STATISTICAL_MIN_HOURS`
/// distinct hours to have a meaningful distribution. Returns up to
/// [`TOP_ANOMALIES`], sorted by |z| descending.
fn statistical_anomalies(hourly_counts: &[(DateTime<Utc>, usize)], z_threshold: f64) -> Vec<Value> {
    let total: usize = hourly_counts.iter().map(|(_, count)| count).sum();
    if total < STATISTICAL_MIN_TOTAL || hourly_counts.len() < STATISTICAL_MIN_HOURS {
        return Vec::new();
    }

    let values: Vec<f64> = hourly_counts.iter().map(|(_, count)| *count as f64).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let stddev = variance.sqrt();
    if stddev < f64::EPSILON {
        return Vec::new();
    }

    let mut found: Vec<(f64, DateTime<Utc>, usize, f64)> = hourly_counts
        .iter()
        .filter_map(|(time, count)| {
            let z = (*count as f64 - mean) / stddev;
            if z.abs() > z_threshold {
                Some((z.abs(), *time, *count, z))
            } else {
                None
            }
        })
        .collect();
    found.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    found.truncate(TOP_ANOMALIES);

    found
        .into_iter()
        .map(|(_, time, count, z)| {
            json!({
                "time": time.to_rfc3339(),
                "count": count,
                "z_score": z,
                "type": if z > 0.0 { "spike" } else { "drop" },
                "severity": if z.abs() > STATISTICAL_HIGH_SEVERITY_Z { "high" } else { "medium" },
            })
        })
        .collect()
}

/// Flags consecutive-hour pairs whose error count changed by more than
/// `VOLUME_CHANGE_THRESHOLD_PCT`%. Returns up to [`TOP_ANOMALIES`], sorted by
/// |change_pct| descending.
fn volume_anomalies(records: &[LogRecord], hourly_counts: &[(DateTime<Utc>, usize)]) -> Vec<Value> {
    if records.len() < VOLUME_MIN_TOTAL || hourly_counts.len() < 2 {
        return Vec::new();
    }
    let mut found: Vec<Value> = hourly_counts
        .windows(2)
        .filter_map(|pair| {
            let (prev_time, prev_count) = pair[0];
            let (time, count) = pair[1];
            if prev_count == 0 {
                return None;
            }
            let change_pct = ((count as f64 - prev_count as f64) / prev_count as f64) * 100.0;
            if change_pct.abs() > VOLUME_CHANGE_THRESHOLD_PCT {
                Some(json!({
                    "time": time.to_rfc3339(),
                    "previous_time": prev_time.to_rfc3339(),
                    "count": count,
                    "previous_count": prev_count,
                    "change_pct": change_pct,
                    "type": if change_pct > 0.0 { "spike" } else { "drop" },
                    "severity": if change_pct.abs() > 200.0 { "high" } else { "medium" },
                }))
            } else {
                None
            }
        })
        .collect();
    found.sort_by(|a, b| {
        let a = a["change_pct"].as_f64().unwrap().abs();
        let b = b["change_pct"].as_f64().unwrap().abs();
        b.partial_cmp(&a).unwrap()
    });
    found.truncate(TOP_ANOMALIES);
    found
}

/// Flags hours-of-day whose error rate exceeds `TEMPORAL_MULTIPLIER` times
/// the average hourly rate, i.e. a time-of-day spike (e.g. every deploy
/// window) rather than a one-off burst.
fn temporal_anomalies(records: &[LogRecord]) -> Vec<Value> {
    let errors: Vec<&LogRecord> = records.iter().filter(|r| r.level.is_anomaly_class()).collect();
    if records.len() < TEMPORAL_MIN_TOTAL || errors.len() < TEMPORAL_MIN_ERRORS {
        return Vec::new();
    }

    let mut by_hour_of_day: HashMap<u32, usize> = HashMap::new();
    for record in &errors {
        *by_hour_of_day.entry(record.event_time.hour()).or_insert(0) += 1;
    }
    let expected = errors.len() as f64 / 24.0;
    if expected < f64::EPSILON {
        return Vec::new();
    }

    let mut ranked: Vec<(u32, usize)> = by_hour_of_day.into_iter().collect();
    ranked.sort_by_key(|(hour, _)| *hour);
    ranked
        .into_iter()
        .filter_map(|(hour, count)| {
            if count as f64 > expected * TEMPORAL_MULTIPLIER {
                Some(json!({"hour_of_day": hour, "count": count, "expected": expected}))
            } else {
                None
            }
        })
        .collect()
}

/// Flags error messages that occur in fewer than `PATTERN_RARITY_THRESHOLD`
/// of all errors -- rare enough to be worth surfacing, but still seen more
/// than once (a true one-off is noise, not a pattern).
fn pattern_anomalies(records: &[LogRecord]) -> Vec<Value> {
    let errors: Vec<&LogRecord> = records.iter().filter(|r| r.level.is_anomaly_class()).collect();
    if records.len() < PATTERN_MIN_TOTAL || errors.len() < PATTERN_MIN_ERRORS {
        return Vec::new();
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in &errors {
        *counts.entry(record.message.as_str()).or_insert(0) += 1;
    }
    let total_errors = errors.len() as f64;
    let mut ranked: Vec<(&str, usize)> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1 && (*count as f64 / total_errors) < PATTERN_RARITY_THRESHOLD)
        .collect();
    ranked.sort_by(|a, b| a.1.cmp(&b.1));
    ranked
        .into_iter()
        .map(|(message, count)| {
            json!({
                "message": super::truncate_chars(message, 150),
                "count": count,
                "rarity": count as f64 / total_errors,
            })
        })
        .collect()
}

/// Only scores above this are worth surfacing.
const ANOMALY_SCORE_CUTOFF: f64 = 0.1;

/// Per-hour anomaly score in `[0, 1]`, weighted: 0.5 if the hour falls in
/// `[2, 6]` (night hours), `+0.3 * min(error_rate * 10, 1)`, `+0.2` if the
/// hour's total log count exceeds the p90 of all hourly totals, `+0.2` if
/// the hour carries a statistical-anomaly flag, `+0.1` if it carries a
/// volume-anomaly flag; capped at 1.0. Ported from
/// `anomaly_detector.py::_calculate_anomaly_scores`, which scores over every
/// hour's full log volume (not just the error-class subset the other three
/// sub-checks use) -- `error_rate` here is `errors / total_logs` within the
/// hour, not the hour's share of the tenant's total error count.
fn per_hour_anomaly_scores(
    hourly_stats: &[(DateTime<Utc>, usize, usize)],
    statistical: &[Value],
    volume: &[Value],
) -> Vec<Value> {
    if hourly_stats.is_empty() {
        return Vec::new();
    }

    let totals: Vec<usize> = hourly_stats.iter().map(|(_, total, _)| *total).collect();
    let p90 = percentile_nearest_rank(&totals, 90.0);

    let statistical_hours: std::collections::HashSet<String> = statistical
        .iter()
        .filter_map(|v| v["time"].as_str().map(str::to_string))
        .collect();
    let volume_hours: std::collections::HashSet<String> = volume
        .iter()
        .filter_map(|v| v["time"].as_str().map(str::to_string))
        .collect();

    hourly_stats
        .iter()
        .filter_map(|(time, total, errors)| {
            let error_rate = *errors as f64 / *total as f64;

            let mut score = 0.0;
            let hour = time.hour();
            if (2..=6).contains(&hour) {
                score += 0.5;
            }
            score += 0.3 * (error_rate * 10.0).min(1.0);
            if *total as f64 > p90 {
                score += 0.2;
            }
            let key = time.to_rfc3339();
            if statistical_hours.contains(&key) {
                score += 0.2;
            }
            if volume_hours.contains(&key) {
                score += 0.1;
            }
            score = score.min(1.0);

            if score > ANOMALY_SCORE_CUTOFF {
                Some(json!({"time": key, "score": score, "total_logs": total, "errors": errors}))
            } else {
                None
            }
        })
        .collect()
}

/// Nearest-rank percentile (matches `performance.rs`'s convention) over an
/// unsorted sample of counts.
fn percentile_nearest_rank(values: &[usize], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<usize> = values.to_vec();
    sorted.sort_unstable();
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx] as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use loglytics_core::LogLevel;
    use std::collections::BTreeMap;

    fn record(hours_ago: i64, level: LogLevel) -> LogRecord {
        LogRecord {
            tenant_id: "t1".to_string(),
            ingested_at: Utc::now(),
            seq: 0,
            event_time: Utc::now() - chrono::Duration::hours(hours_ago),
            level,
            message: "error happened".to_string(),
            source: None,
            service: None,
            metadata: BTreeMap::new(),
            raw: "{}".to_string(),
        }
    }

    #[test]
    fn below_minimum_samples_yields_no_anomalies() {
        let records = vec![record(0, LogLevel::Error)];
        let value = compute(&records, 2.0, 10);
        assert_eq!(value["anomaly_scores"], json!([]));
    }

    #[test]
    fn per_hour_anomaly_scores_is_empty_with_no_hours() {
        assert!(per_hour_anomaly_scores(&[], &[], &[]).is_empty());
    }

    #[test]
    fn per_hour_anomaly_scores_flags_night_hour_high_error_rate() {
        let night = Utc::now().date_naive().and_hms_opt(3, 0, 0).unwrap().and_utc();
        let day = Utc::now().date_naive().and_hms_opt(14, 0, 0).unwrap().and_utc();
        let hourly_stats = vec![(night, 10, 8), (day, 10, 1)];
        let scores = per_hour_anomaly_scores(&hourly_stats, &[], &[]);
        let night_entry = scores.iter().find(|v| v["time"] == night.to_rfc3339()).unwrap();
        assert!(night_entry["score"].as_f64().unwrap() > 0.7);
        assert!(scores.iter().all(|v| v["score"].as_f64().unwrap() <= 1.0));
    }
}
