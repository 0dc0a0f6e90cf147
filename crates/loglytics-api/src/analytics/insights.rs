//! Insights report: pure aggregation over the other five reports into a
//! health score and a short human-readable summary. Ported from
//! `analytics_engine.py`'s `generate_insights`/`_calculate_health_score`.
//!
//! Takes no records directly -- by construction it can only repeat what the
//! other reports already found, never introduce a new finding of its own.

use serde_json::{json, Value};

const CRITICAL_PENALTY: f64 = 25.0;
const HIGH_PENALTY: f64 = 15.0;
const MEDIUM_PENALTY: f64 = 10.0;

const CRITICAL_ERROR_RATE: f64 = 0.10;
const HIGH_ERROR_RATE: f64 = 0.05;
const MEDIUM_ERROR_RATE: f64 = 0.01;

pub fn compute(overview: &Value, errors: &Value, anomalies: &Value, performance: &Value, patterns: &Value) -> Value {
    let total_count = overview["total_count"].as_u64().unwrap_or(0);
    let total_errors = errors["total_errors"].as_u64().unwrap_or(0);
    let error_rate = if total_count > 0 { total_errors as f64 / total_count as f64 } else { 0.0 };

    let mut critical = 0u32;
    let mut high = 0u32;
    let mut medium = 0u32;

    if let Some(slow_ops) = performance["slow_operations"].as_array() {
        for op in slow_ops {
            match op["severity"].as_str() {
                Some("critical") => critical += 1,
                Some("high") => high += 1,
                Some("medium") => medium += 1,
                _ => {}
            }
        }
    }

    for key in ["statistical", "volume", "temporal", "pattern"] {
        if let Some(findings) = anomalies[key].as_array() {
            high += findings.len() as u32;
        }
    }

    if error_rate > CRITICAL_ERROR_RATE {
        critical += 1;
    } else if error_rate > HIGH_ERROR_RATE {
        high += 1;
    } else if error_rate > MEDIUM_ERROR_RATE {
        medium += 1;
    }

    let health_score =
        (100.0 - (critical as f64 * CRITICAL_PENALTY + high as f64 * HIGH_PENALTY + medium as f64 * MEDIUM_PENALTY))
            .max(0.0);

    json!({
        "health_score": health_score,
        "error_rate": error_rate,
        "critical_issues": critical,
        "high_issues": high,
        "medium_issues": medium,
        "summary": summary(total_count, total_errors, error_rate, critical, errors, anomalies, patterns),
    })
}

fn summary(
    total_count: u64,
    total_errors: u64,
    error_rate: f64,
    critical: u32,
    errors: &Value,
    anomalies: &Value,
    patterns: &Value,
) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!(
        "{total_count} total events analyzed, {total_errors} errors ({:.1}% error rate).",
        error_rate * 100.0
    ));

    if let Some(mtbf) = errors["mtbf_hours"].as_f64() {
        if mtbf > 0.0 {
            lines.push(format!("Mean time between failures: {mtbf:.1} hours."));
        }
    }

    if critical > 0 {
        lines.push(format!("{critical} critical issue(s) detected."));
    }

    if let Some(scores) = anomalies["anomaly_scores"].as_array() {
        let peak = scores.iter().filter_map(|v| v["score"].as_f64()).fold(0.0_f64, f64::max);
        if peak > 0.0 {
            lines.push(format!("Peak anomaly score: {peak:.2}/1.0."));
        }
    }

    if let Some(causes) = patterns["root_causes"].as_array() {
        if let Some(top) = causes.first().and_then(|v| v["category"].as_str()) {
            lines.push(format!("Most common root cause category: {top}."));
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_inputs_yield_a_perfect_health_score() {
        let empty = json!({});
        let overview = json!({"total_count": 100});
        let errors = json!({"total_errors": 0, "mtbf_hours": 0.0});
        let value = compute(&overview, &errors, &empty, &empty, &empty);
        assert_eq!(value["health_score"], 100.0);
        assert_eq!(value["critical_issues"], 0);
    }

    #[test]
    fn high_error_rate_applies_critical_penalty() {
        let overview = json!({"total_count": 100});
        let errors = json!({"total_errors": 20, "mtbf_hours": 0.0});
        let empty = json!({});
        let value = compute(&overview, &errors, &empty, &empty, &empty);
        assert_eq!(value["critical_issues"], 1);
        assert_eq!(value["health_score"], 75.0);
    }
}
