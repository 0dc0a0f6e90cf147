//! Pattern analysis report: common word n-grams, root-cause categorization,
//! time-windowed error correlations, and message clustering. Ported from
//! `pattern_analyzer.py`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Timelike, Utc};
use regex::Regex;
use serde_json::{json, Value};

use loglytics_core::LogRecord;

const TOP_NGRAMS: usize = 15;
const TOP_CLUSTERS: usize = 15;
const CORRELATION_WINDOW_MINUTES: i64 = 5;
const MIN_CLUSTER_SIZE: usize = 2;

/// Root-cause keyword table, distinct from the error-analysis category
/// table: these eight categories mirror the original `_analyze_root_causes`
/// almost verbatim.
const ROOT_CAUSES: &[(&str, &[&str])] = &[
    ("connection_issues", &["connection", "connect", "refused", "reset"]),
    ("permission_issues", &["permission", "denied", "forbidden", "unauthorized"]),
    ("resource_exhaustion", &["memory", "disk", "quota", "limit exceeded", "too many"]),
    ("configuration_errors", &["config", "configuration", "setting", "environment variable"]),
    ("database_issues", &["database", "sql", "query", "deadlock", "constraint"]),
    ("network_issues", &["network", "dns", "unreachable", "socket"]),
    ("timeout_issues", &["timeout", "timed out", "deadline"]),
    ("null_reference", &["null", "none", "undefined", "nil pointer"]),
];

/// Simpler category table used only to group error correlations, distinct
/// from both the error-analysis and root-cause tables above.
const CORRELATION_CATEGORIES: &[(&str, &[&str])] = &[
    ("database", &["database", "sql", "query"]),
    ("network", &["network", "connection", "socket", "dns"]),
    ("auth", &["auth", "permission", "forbidden", "unauthorized"]),
    ("validation", &["invalid", "validation", "malformed"]),
    ("timeout", &["timeout", "timed out"]),
];

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "at", "of", "to", "in", "on", "for", "and", "or", "with", "was", "were", "this", "that",
];

pub fn compute(records: &[LogRecord]) -> Value {
    let anomaly_class: Vec<&LogRecord> = records.iter().filter(|r| r.level.is_anomaly_class()).collect();
    if anomaly_class.is_empty() {
        return json!({
            "common_phrases": [],
            "root_causes": [],
            "correlations": [],
            "clusters": [],
        });
    }

    json!({
        "common_phrases": common_phrases(&anomaly_class),
        "root_causes": root_causes(&anomaly_class),
        "correlations": correlations(&anomaly_class),
        "clusters": clusters(&anomaly_class),
    })
}

fn tokenize(message: &str) -> Vec<String> {
    message
        .to_ascii_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

/// Word bigrams/trigrams ranked by frequency across every message, surfacing
/// recurring phrases independent of exact message text.
fn common_phrases(records: &[&LogRecord]) -> Vec<Value> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for record in records {
        let words = tokenize(&record.message);
        for window in words.windows(2) {
            *counts.entry(window.join(" ")).or_insert(0) += 1;
        }
        for window in words.windows(3) {
            *counts.entry(window.join(" ")).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().filter(|(_, count)| *count > 1).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(TOP_NGRAMS);
    ranked.into_iter().map(|(phrase, count)| json!({"phrase": phrase, "count": count})).collect()
}

/// Maximum example messages kept per root-cause category.
const ROOT_CAUSE_EXAMPLES: usize = 3;
/// Maximum root-cause categories returned, ranked by count.
const TOP_ROOT_CAUSES: usize = 10;

/// Categorizes each message into at most one root cause -- the first
/// category (in table order) whose keyword appears -- then ranks categories
/// by how many messages they absorbed. A message matching both
/// `connection_issues` and `network_issues` keywords only ever counts once,
/// against whichever category is checked first.
fn root_causes(records: &[&LogRecord]) -> Vec<Value> {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    let mut examples: HashMap<&'static str, Vec<Value>> = HashMap::new();
    for record in records {
        let lower = record.message.to_ascii_lowercase();
        for (name, keywords) in ROOT_CAUSES {
            if keywords.iter().any(|kw| lower.contains(kw)) {
                *counts.entry(name).or_insert(0) += 1;
                let bucket = examples.entry(name).or_default();
                if bucket.len() < ROOT_CAUSE_EXAMPLES {
                    bucket.push(json!({
                        "message": super::truncate_chars(&record.message, 100),
                        "time": record.event_time.to_rfc3339(),
                        "level": record.level,
                        "source": record.source.clone().unwrap_or_else(|| "unknown".to_string()),
                    }));
                }
                break;
            }
        }
    }

    let total = records.len().max(1) as f64;
    let mut ranked: Vec<(&'static str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(TOP_ROOT_CAUSES);

    ranked
        .into_iter()
        .map(|(name, count)| {
            json!({
                "category": name,
                "count": count,
                "percentage": (count as f64 / total) * 100.0,
                "examples": examples.remove(name).unwrap_or_default(),
            })
        })
        .collect()
}

fn correlate_category(message: &str) -> &'static str {
    let lower = message.to_ascii_lowercase();
    for (name, keywords) in CORRELATION_CATEGORIES {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return name;
        }
    }
    "other"
}

/// Maximum sample messages kept per correlation window.
const CORRELATION_SAMPLES: usize = 5;
/// Maximum correlation windows returned, ranked by score.
const TOP_CORRELATIONS: usize = 10;

/// Buckets errors into `CORRELATION_WINDOW_MINUTES`-wide windows; windows
/// that saw at least two distinct categorized error types are scored
/// `distinct_types / total_errors_in_window` and ranked by that score
/// descending. A window with one error type throughout, however many
/// errors, scores nothing -- correlation needs variety, not volume.
fn correlations(records: &[&LogRecord]) -> Vec<Value> {
    let window_minutes = CORRELATION_WINDOW_MINUTES;
    let mut windows: HashMap<DateTime<Utc>, Vec<(&LogRecord, &'static str)>> = HashMap::new();
    for record in records {
        let minute = record.event_time.minute() as i64;
        let rounded = (minute / window_minutes) * window_minutes;
        let window_start = record
            .event_time
            .date_naive()
            .and_hms_opt(record.event_time.hour(), rounded as u32, 0)
            .unwrap()
            .and_utc();
        windows.entry(window_start).or_default().push((record, correlate_category(&record.message)));
    }

    let mut ranked: Vec<Value> = windows
        .into_iter()
        .filter_map(|(window_start, mut entries)| {
            if entries.len() < 2 {
                return None;
            }
            entries.sort_by_key(|(r, _)| r.event_time);
            let distinct_types: HashSet<&'static str> = entries.iter().map(|(_, cat)| *cat).collect();
            if distinct_types.len() < 2 {
                return None;
            }
            let total = entries.len();
            let score = distinct_types.len() as f64 / total as f64;
            let sample_errors: Vec<Value> = entries
                .iter()
                .take(CORRELATION_SAMPLES)
                .map(|(record, category)| {
                    json!({
                        "message": super::truncate_chars(&record.message, 80),
                        "level": record.level,
                        "category": category,
                        "time": record.event_time.to_rfc3339(),
                    })
                })
                .collect();
            let mut error_types: Vec<&'static str> = distinct_types.into_iter().collect();
            error_types.sort_unstable();
            Some(json!({
                "window_start": window_start.to_rfc3339(),
                "unique_error_types": error_types.len(),
                "total_errors": total,
                "score": score,
                "error_types": error_types,
                "sample_errors": sample_errors,
            }))
        })
        .collect();

    ranked.sort_by(|a, b| {
        let a = a["score"].as_f64().unwrap();
        let b = b["score"].as_f64().unwrap();
        b.partial_cmp(&a).unwrap()
    });
    ranked.truncate(TOP_CORRELATIONS);
    ranked
}

/// Normalize a message so near-duplicates (differing only by ids/numbers)
/// cluster together: digits collapse to `N`, punctuation to spaces.
fn normalize_for_clustering(message: &str) -> String {
    let digits = Regex::new(r"\d+").expect("static digit pattern");
    let punctuation = Regex::new(r"[^\w\s]").expect("static punctuation pattern");
    let replaced = digits.replace_all(message, "N");
    let replaced = punctuation.replace_all(&replaced, " ");
    let collapsed: Vec<&str> = replaced.split_whitespace().collect();
    collapsed.join(" ").to_ascii_lowercase().chars().take(50).collect()
}

fn clusters(records: &[&LogRecord]) -> Vec<Value> {
    let mut groups: HashMap<String, (usize, HashSet<&str>)> = HashMap::new();
    for record in records {
        let key = normalize_for_clustering(&record.message);
        let entry = groups.entry(key).or_insert((0, HashSet::new()));
        entry.0 += 1;
        entry.1.insert(record.message.as_str());
    }
    let mut ranked: Vec<(String, usize, usize)> = groups
        .into_iter()
        .filter(|(_, (count, _))| *count >= MIN_CLUSTER_SIZE)
        .map(|(key, (count, variants))| (key, count, variants.len()))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(TOP_CLUSTERS);
    ranked
        .into_iter()
        .map(|(key, count, variants)| json!({"pattern": key, "occurrences": count, "distinct_variants": variants}))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use loglytics_core::LogLevel;
    use std::collections::BTreeMap;

    fn record(message: &str, minute_offset: i64) -> LogRecord {
        LogRecord {
            tenant_id: "t1".to_string(),
            ingested_at: Utc::now(),
            seq: 0,
            event_time: Utc::now() + chrono::Duration::minutes(minute_offset),
            level: LogLevel::Error,
            message: message.to_string(),
            source: None,
            service: None,
            metadata: BTreeMap::new(),
            raw: "{}".to_string(),
        }
    }

    #[test]
    fn normalizes_digits_for_clustering() {
        assert_eq!(normalize_for_clustering("user 123 not found"), normalize_for_clustering("user 456 not found"));
    }

    #[test]
    fn clusters_require_minimum_size() {
        let records = vec![record("user 123 not found", 0)];
        let refs: Vec<&LogRecord> = records.iter().collect();
        assert!(clusters(&refs).is_empty());
    }

    #[test]
    fn root_cause_only_counts_first_matching_category() {
        let records = vec![record("database connection timeout occurred", 0)];
        let refs: Vec<&LogRecord> = records.iter().collect();
        let causes = root_causes(&refs);
        assert_eq!(causes.len(), 1);
        assert_eq!(causes[0]["category"], "connection_issues");
        assert_eq!(causes[0]["count"], 1);
        assert_eq!(causes[0]["examples"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn root_cause_examples_are_capped_at_three() {
        let records: Vec<LogRecord> = (0..5).map(|i| record("database error occurred", i)).collect();
        let refs: Vec<&LogRecord> = records.iter().collect();
        let causes = root_causes(&refs);
        assert_eq!(causes[0]["count"], 5);
        assert_eq!(causes[0]["examples"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn correlations_require_distinct_categories_in_window() {
        let records = vec![record("database query failed", 0), record("database deadlock detected", 1)];
        let refs: Vec<&LogRecord> = records.iter().collect();
        assert!(correlations(&refs).is_empty());
    }

    #[test]
    fn correlations_score_by_distinct_type_ratio() {
        let records =
            vec![record("database query failed", 0), record("connection refused", 1), record("unrelated issue", 2)];
        let refs: Vec<&LogRecord> = records.iter().collect();
        let found = correlations(&refs);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["total_errors"], 3);
        assert_eq!(found[0]["unique_error_types"], 3);
        assert_eq!(found[0]["score"], 1.0);
    }
}
