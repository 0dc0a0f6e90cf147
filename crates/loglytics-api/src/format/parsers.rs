//! Parser bank: turns one raw line of a known [`Format`] into a
//! [`ParsedLine`] the normalizer (C3) consumes.
//!
//! Grounded on `original_source/.../log_parser/parsers/apache_nginx_parser.py`
//! and `cloud_parser.py` for the field-extraction regexes per format family.
//! Every regex is compiled once, in [`ParserBank::new`], and reused for every
//! line — the same compile-once-reuse discipline as [`super::detector::FormatDetector`].
//!
//! Parsers never fail the batch on a bad line: a line that does not match its
//! claimed format's shape becomes a synthetic `level="ERROR"` record with
//! `fields.parse_error=true`, carrying the original text as `message`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::detector::Format;

/// Lines longer than this are truncated before parsing, per the wire
/// contract's per-line size limit.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Structured output of parsing one line. Timestamps and levels are carried
/// as their raw string form; C3 is responsible for interpreting them.
#[derive(Debug, Clone, Default)]
pub struct ParsedLine {
    pub raw_timestamp: Option<String>,
    pub raw_level: Option<String>,
    pub message: String,
    pub source: Option<String>,
    pub service: Option<String>,
    pub fields: BTreeMap<String, Value>,
}

impl ParsedLine {
    fn parse_error(original: &str) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("parse_error".to_string(), Value::Bool(true));
        ParsedLine {
            raw_timestamp: None,
            raw_level: Some("ERROR".to_string()),
            message: original.to_string(),
            source: None,
            service: None,
            fields,
        }
    }
}

/// Truncate a line to [`MAX_LINE_BYTES`] on a UTF-8 char boundary, flagging
/// the truncation so the normalizer can surface it in metadata.
fn truncate_line(line: &str) -> (std::borrow::Cow<'_, str>, bool) {
    if line.len() <= MAX_LINE_BYTES {
        return (std::borrow::Cow::Borrowed(line), false);
    }
    let mut end = MAX_LINE_BYTES;
    while end > 0 && !line.is_char_boundary(end) {
        end -= 1;
    }
    (std::borrow::Cow::Owned(line[..end].to_string()), true)
}

fn mark_truncated(parsed: &mut ParsedLine) {
    parsed.fields.insert("truncated".to_string(), Value::Bool(true));
}

struct ParserBank {
    apache_combined: Regex,
    apache_common: Regex,
    apache_error: Regex,
    nginx_access: Regex,
    nginx_error: Regex,
    syslog_5424: Regex,
    syslog_3164: Regex,
    docker: Regex,
    kubernetes: Regex,
    cloud_aws: Regex,
    cloud_generic: Regex,
    windows_field: Regex,
    generic_ts: Regex,
}

impl ParserBank {
    fn new() -> Self {
        Self {
            apache_combined: Regex::new(
                r#"^(\S+)\s+\S+\s+\S+\s+\[([^\]]+)\]\s+"([^"]*)"\s+(\d+)\s+(\d+|-)\s+"([^"]*)"\s+"([^"]*)"$"#,
            )
            .expect("apache_combined"),
            apache_common: Regex::new(
                r#"^(\S+)\s+\S+\s+\S+\s+\[([^\]]+)\]\s+"([^"]*)"\s+(\d+)\s+(\d+|-)$"#,
            )
            .expect("apache_common"),
            apache_error: Regex::new(r"^\[([^\]]+)\]\s+\[([^\]]+)\]\s+\[([^\]]+)\]\s+(.+)$")
                .expect("apache_error"),
            nginx_access: Regex::new(
                r#"^(\S+)\s+-\s+-\s+\[([^\]]+)\]\s+"([^"]*)"\s+(\d+)\s+(\d+|-)\s+"([^"]*)"\s+"([^"]*)"(?:\s+"([^"]*)")?$"#,
            )
            .expect("nginx_access"),
            nginx_error: Regex::new(
                r"^(\d{4}/\d{2}/\d{2}\s+\d{2}:\d{2}:\d{2})\s+\[([^\]]+)\]\s+(\d+)#(\d+):\s+(.+)$",
            )
            .expect("nginx_error"),
            syslog_5424: Regex::new(
                r"^<(\d{1,3})>1\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(?:(-|\[[^\]]*\])\s+)?(.*)$",
            )
            .expect("syslog_5424"),
            syslog_3164: Regex::new(
                r"^(?:<(\d{1,3})>)?([A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(\S+)\s+([\w.\-/]+?)(?:\[(\d+)\])?:\s*(.*)$",
            )
            .expect("syslog_3164"),
            docker: Regex::new(
                r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z)\s+(?:(stdout|stderr)\s+([FP])\s+)?(.*)$",
            )
            .expect("docker"),
            kubernetes: Regex::new(
                r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z)\s+(stdout|stderr)\s+([FP])\s+(.*)$",
            )
            .expect("kubernetes"),
            cloud_aws: Regex::new(
                r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?)\s+(\S+)\s+(\S+)\s+(.+)$",
            )
            .expect("cloud_aws"),
            cloud_generic: Regex::new(
                r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?)\s+(\S+)\s+(.+)$",
            )
            .expect("cloud_generic"),
            windows_field: Regex::new(r"(?i)^(Log Name|Source|Event ID|Level|Category|Computer):\s*(.*)$")
                .expect("windows_field"),
            generic_ts: Regex::new(r"(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?)")
                .expect("generic_ts"),
        }
    }

    fn parse(&self, format: Format, line: &str) -> ParsedLine {
        match format {
            Format::JsonLines => self.parse_json(line),
            Format::Syslog => self.parse_syslog(line),
            Format::ApacheAccessCombined => self.parse_apache_combined(line),
            Format::ApacheAccessCommon => self.parse_apache_common(line),
            Format::ApacheError => self.parse_apache_error(line),
            Format::NginxAccess => self.parse_nginx_access(line),
            Format::NginxError => self.parse_nginx_error(line),
            Format::Docker => self.parse_docker(line),
            Format::Kubernetes => self.parse_kubernetes(line),
            Format::CloudAws => self.parse_cloud_aws(line),
            Format::CloudAzure => self.parse_cloud_generic(line, "azure"),
            Format::CloudGcp => self.parse_cloud_generic(line, "gcp"),
            Format::WindowsEvent => self.parse_windows_event(line),
            Format::GenericTimestamped => self.parse_generic_timestamped(line),
        }
    }

    fn parse_json(&self, line: &str) -> ParsedLine {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => return ParsedLine::parse_error(line),
        };
        let Some(obj) = value.as_object() else {
            return ParsedLine::parse_error(line);
        };

        let raw_timestamp = first_string(obj, &["timestamp", "time", "@timestamp"]);
        let raw_level = first_string(obj, &["level", "severity", "log_level", "loglevel"]);
        let message = first_string(obj, &["message", "msg", "text", "content", "body", "description"])
            .unwrap_or_else(|| line.to_string());
        let source = first_string(obj, &["source", "logger", "component", "module"]);
        let service = first_string(obj, &["service", "app", "application", "microservice"]);

        let consumed = [
            "timestamp", "time", "@timestamp", "level", "severity", "log_level", "loglevel",
            "message", "msg", "text", "content", "body", "description", "source", "logger",
            "component", "module", "service", "app", "application", "microservice",
        ];
        let mut fields = BTreeMap::new();
        for (key, val) in obj {
            if !consumed.contains(&key.as_str()) {
                fields.insert(key.clone(), val.clone());
            }
        }

        ParsedLine {
            raw_timestamp,
            raw_level,
            message,
            source,
            service,
            fields,
        }
    }

    fn parse_syslog(&self, line: &str) -> ParsedLine {
        if let Some(caps) = self.syslog_5424.captures(line) {
            let mut fields = BTreeMap::new();
            fields.insert("facility_priority".to_string(), Value::String(caps[1].to_string()));
            fields.insert("hostname".to_string(), Value::String(caps[3].to_string()));
            fields.insert("app_name".to_string(), Value::String(caps[4].to_string()));
            fields.insert("proc_id".to_string(), Value::String(caps[5].to_string()));
            fields.insert("msg_id".to_string(), Value::String(caps[6].to_string()));
            return ParsedLine {
                raw_timestamp: Some(caps[2].to_string()),
                raw_level: None,
                message: caps[8].to_string(),
                source: Some(caps[4].to_string()),
                service: None,
                fields,
            };
        }
        if let Some(caps) = self.syslog_3164.captures(line) {
            let mut fields = BTreeMap::new();
            if let Some(pri) = caps.get(1) {
                fields.insert("facility_priority".to_string(), Value::String(pri.as_str().to_string()));
            }
            fields.insert("hostname".to_string(), Value::String(caps[3].to_string()));
            if let Some(pid) = caps.get(5) {
                fields.insert("proc_id".to_string(), Value::String(pid.as_str().to_string()));
            }
            return ParsedLine {
                raw_timestamp: Some(caps[2].to_string()),
                raw_level: None,
                message: caps[6].to_string(),
                source: Some(caps[4].to_string()),
                service: None,
                fields,
            };
        }
        ParsedLine::parse_error(line)
    }

    fn parse_apache_combined(&self, line: &str) -> ParsedLine {
        let Some(caps) = self.apache_combined.captures(line) else {
            return ParsedLine::parse_error(line);
        };
        let status: i64 = caps[4].parse().unwrap_or(0);
        let (method, path, protocol) = split_request(&caps[3]);
        let mut fields = BTreeMap::new();
        fields.insert("remote_ip".to_string(), Value::String(caps[1].to_string()));
        fields.insert("request".to_string(), Value::String(caps[3].to_string()));
        fields.insert("status".to_string(), Value::from(status));
        if caps[5] != *"-" {
            fields.insert("bytes".to_string(), Value::from(caps[5].parse::<i64>().unwrap_or(0)));
        }
        if &caps[6] != "-" {
            fields.insert("referer".to_string(), Value::String(caps[6].to_string()));
        }
        if &caps[7] != "-" {
            fields.insert("user_agent".to_string(), Value::String(caps[7].to_string()));
        }
        fields.insert("method".to_string(), Value::String(method.clone()));
        fields.insert("path".to_string(), Value::String(path.clone()));
        fields.insert("protocol".to_string(), Value::String(protocol));
        ParsedLine {
            raw_timestamp: Some(caps[2].to_string()),
            raw_level: Some(status_to_level(status)),
            message: format!("{method} {path} - {status}"),
            source: Some("apache".to_string()),
            service: Some("web-server".to_string()),
            fields,
        }
    }

    fn parse_apache_common(&self, line: &str) -> ParsedLine {
        let Some(caps) = self.apache_common.captures(line) else {
            return ParsedLine::parse_error(line);
        };
        let status: i64 = caps[4].parse().unwrap_or(0);
        let (method, path, protocol) = split_request(&caps[3]);
        let mut fields = BTreeMap::new();
        fields.insert("remote_ip".to_string(), Value::String(caps[1].to_string()));
        fields.insert("request".to_string(), Value::String(caps[3].to_string()));
        fields.insert("status".to_string(), Value::from(status));
        if caps[5] != *"-" {
            fields.insert("bytes".to_string(), Value::from(caps[5].parse::<i64>().unwrap_or(0)));
        }
        fields.insert("method".to_string(), Value::String(method.clone()));
        fields.insert("path".to_string(), Value::String(path.clone()));
        fields.insert("protocol".to_string(), Value::String(protocol));
        ParsedLine {
            raw_timestamp: Some(caps[2].to_string()),
            raw_level: Some(status_to_level(status)),
            message: format!("{method} {path} - {status}"),
            source: Some("apache".to_string()),
            service: Some("web-server".to_string()),
            fields,
        }
    }

    fn parse_apache_error(&self, line: &str) -> ParsedLine {
        let Some(caps) = self.apache_error.captures(line) else {
            return ParsedLine::parse_error(line);
        };
        let mut fields = BTreeMap::new();
        fields.insert("log_level".to_string(), Value::String(caps[2].to_string()));
        fields.insert("pid".to_string(), Value::String(caps[3].to_string()));
        ParsedLine {
            raw_timestamp: Some(caps[1].to_string()),
            raw_level: Some(caps[2].to_string()),
            message: caps[4].to_string(),
            source: Some("apache".to_string()),
            service: Some("web-server".to_string()),
            fields,
        }
    }

    fn parse_nginx_access(&self, line: &str) -> ParsedLine {
        let Some(caps) = self.nginx_access.captures(line) else {
            return ParsedLine::parse_error(line);
        };
        let status: i64 = caps[4].parse().unwrap_or(0);
        let (method, path, protocol) = split_request(&caps[3]);
        let mut fields = BTreeMap::new();
        fields.insert("remote_ip".to_string(), Value::String(caps[1].to_string()));
        fields.insert("request".to_string(), Value::String(caps[3].to_string()));
        fields.insert("status".to_string(), Value::from(status));
        if caps[5] != *"-" {
            fields.insert("bytes".to_string(), Value::from(caps[5].parse::<i64>().unwrap_or(0)));
        }
        if &caps[6] != "-" {
            fields.insert("referer".to_string(), Value::String(caps[6].to_string()));
        }
        if &caps[7] != "-" {
            fields.insert("user_agent".to_string(), Value::String(caps[7].to_string()));
        }
        if let Some(upstream) = caps.get(8) {
            fields.insert("upstream".to_string(), Value::String(upstream.as_str().to_string()));
        }
        fields.insert("method".to_string(), Value::String(method.clone()));
        fields.insert("path".to_string(), Value::String(path.clone()));
        fields.insert("protocol".to_string(), Value::String(protocol));
        ParsedLine {
            raw_timestamp: Some(caps[2].to_string()),
            raw_level: Some(status_to_level(status)),
            message: format!("{method} {path} - {status}"),
            source: Some("nginx".to_string()),
            service: Some("web-server".to_string()),
            fields,
        }
    }

    fn parse_nginx_error(&self, line: &str) -> ParsedLine {
        let Some(caps) = self.nginx_error.captures(line) else {
            return ParsedLine::parse_error(line);
        };
        let mut fields = BTreeMap::new();
        fields.insert("log_level".to_string(), Value::String(caps[2].to_string()));
        fields.insert("pid".to_string(), Value::String(caps[3].to_string()));
        fields.insert("tid".to_string(), Value::String(caps[4].to_string()));
        ParsedLine {
            raw_timestamp: Some(caps[1].to_string()),
            raw_level: Some(caps[2].to_string()),
            message: caps[5].to_string(),
            source: Some("nginx".to_string()),
            service: Some("web-server".to_string()),
            fields,
        }
    }

    fn parse_docker(&self, line: &str) -> ParsedLine {
        let Some(caps) = self.docker.captures(line) else {
            return ParsedLine::parse_error(line);
        };
        let mut fields = BTreeMap::new();
        if let Some(stream) = caps.get(2) {
            fields.insert("stream".to_string(), Value::String(stream.as_str().to_string()));
        }
        ParsedLine {
            raw_timestamp: Some(caps[1].to_string()),
            raw_level: None,
            message: caps[4].to_string(),
            source: Some("docker".to_string()),
            service: None,
            fields,
        }
    }

    fn parse_kubernetes(&self, line: &str) -> ParsedLine {
        let Some(caps) = self.kubernetes.captures(line) else {
            return ParsedLine::parse_error(line);
        };
        let mut fields = BTreeMap::new();
        fields.insert("stream".to_string(), Value::String(caps[2].to_string()));
        ParsedLine {
            raw_timestamp: Some(caps[1].to_string()),
            raw_level: None,
            message: caps[4].to_string(),
            source: Some("kubernetes".to_string()),
            service: None,
            fields,
        }
    }

    fn parse_cloud_aws(&self, line: &str) -> ParsedLine {
        let Some(caps) = self.cloud_aws.captures(line) else {
            return ParsedLine::parse_error(line);
        };
        let log_group = caps[2].to_string();
        let log_stream = caps[3].to_string();
        let message = caps[4].to_string();
        let mut fields = BTreeMap::new();
        fields.insert("log_group".to_string(), Value::String(log_group.clone()));
        fields.insert("log_stream".to_string(), Value::String(log_stream.clone()));
        fields.insert(
            "aws_region".to_string(),
            Value::String(extract_aws_region(&log_group)),
        );
        merge_embedded_json(&mut fields, &message);
        ParsedLine {
            raw_timestamp: Some(caps[1].to_string()),
            raw_level: extract_level_from_message(&message),
            message,
            source: Some(log_stream),
            service: Some(log_group),
            fields,
        }
    }

    fn parse_cloud_generic(&self, line: &str, vendor: &str) -> ParsedLine {
        let Some(caps) = self.cloud_generic.captures(line) else {
            return ParsedLine::parse_error(line);
        };
        let resource = caps[2].to_string();
        let message = caps[3].to_string();
        let mut fields = BTreeMap::new();
        fields.insert("resource".to_string(), Value::String(resource.clone()));
        fields.insert("vendor".to_string(), Value::String(vendor.to_string()));
        merge_embedded_json(&mut fields, &message);
        ParsedLine {
            raw_timestamp: Some(caps[1].to_string()),
            raw_level: extract_level_from_message(&message),
            message,
            source: Some(resource.clone()),
            service: Some(resource),
            fields,
        }
    }

    fn parse_windows_event(&self, line: &str) -> ParsedLine {
        if let Some(caps) = self.windows_field.captures(line) {
            let key = caps[1].to_ascii_lowercase().replace(' ', "_");
            let value = caps[2].trim().to_string();
            let mut fields = BTreeMap::new();
            let raw_level = if key == "level" { Some(value.clone()) } else { None };
            fields.insert(format!("event_{key}"), Value::String(value));
            return ParsedLine {
                raw_timestamp: None,
                raw_level,
                message: line.to_string(),
                source: Some("windows-event".to_string()),
                service: None,
                fields,
            };
        }
        ParsedLine {
            raw_timestamp: None,
            raw_level: None,
            message: line.to_string(),
            source: Some("windows-event".to_string()),
            service: None,
            fields: BTreeMap::new(),
        }
    }

    fn parse_generic_timestamped(&self, line: &str) -> ParsedLine {
        let raw_timestamp = self
            .generic_ts
            .captures(line)
            .map(|caps| caps[1].to_string());
        ParsedLine {
            raw_timestamp,
            raw_level: extract_level_from_message(line),
            message: line.to_string(),
            source: None,
            service: None,
            fields: BTreeMap::new(),
        }
    }
}

fn first_string(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(value) = obj.get(*key) {
            return Some(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
    }
    None
}

fn split_request(request: &str) -> (String, String, String) {
    let mut parts = request.split_whitespace();
    let method = parts.next().unwrap_or("GET").to_string();
    let path = parts.next().unwrap_or("/").to_string();
    let protocol = parts.next().unwrap_or("HTTP/1.1").to_string();
    (method, path, protocol)
}

fn status_to_level(status: i64) -> String {
    match status {
        500..=599 => "ERROR",
        400..=499 => "WARN",
        _ => "INFO",
    }
    .to_string()
}

fn extract_level_from_message(message: &str) -> Option<String> {
    let lower = message.to_ascii_lowercase();
    const KEYWORDS: &[&str] = &[
        "critical", "fatal", "error", "exception", "failed", "failure", "warning", "warn",
        "info", "debug",
    ];
    KEYWORDS
        .iter()
        .find(|kw| lower.contains(**kw))
        .map(|kw| kw.to_uppercase())
}

fn extract_aws_region(log_group: &str) -> String {
    const REGIONS: &[&str] = &[
        "us-east-1", "us-east-2", "us-west-1", "us-west-2", "eu-west-1", "eu-central-1",
        "ap-southeast-1", "ap-southeast-2", "ap-northeast-1",
    ];
    REGIONS
        .iter()
        .find(|r| log_group.contains(**r))
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn merge_embedded_json(fields: &mut BTreeMap<String, Value>, message: &str) {
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(message) {
        for (key, value) in obj {
            fields.entry(key).or_insert(value);
        }
    }
}

fn bank() -> &'static ParserBank {
    static BANK: OnceLock<ParserBank> = OnceLock::new();
    BANK.get_or_init(ParserBank::new)
}

/// Parse one line of the given format. Never panics or propagates an error:
/// an unparseable line becomes a `parse_error` [`ParsedLine`].
pub fn parse_line(format: Format, line: &str) -> ParsedLine {
    let (line, was_truncated) = truncate_line(line);
    let mut parsed = bank().parse(format, &line);
    if was_truncated {
        mark_truncated(&mut parsed);
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_line_with_standard_fields() {
        let parsed = parse_line(
            Format::JsonLines,
            r#"{"timestamp":"2024-01-01T00:00:00Z","level":"error","message":"db timeout","request_id":"r1"}"#,
        );
        assert_eq!(parsed.raw_timestamp.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(parsed.raw_level.as_deref(), Some("error"));
        assert_eq!(parsed.message, "db timeout");
        assert_eq!(parsed.fields.get("request_id"), Some(&Value::String("r1".into())));
    }

    #[test]
    fn json_line_parse_failure_becomes_error_record() {
        let parsed = parse_line(Format::JsonLines, "not-json");
        assert_eq!(parsed.raw_level.as_deref(), Some("ERROR"));
        assert_eq!(parsed.fields.get("parse_error"), Some(&Value::Bool(true)));
        assert_eq!(parsed.message, "not-json");
    }

    #[test]
    fn parses_apache_combined() {
        let parsed = parse_line(
            Format::ApacheAccessCombined,
            r#"127.0.0.1 - - [10/Oct/2024:13:55:36 -0700] "GET /index.html HTTP/1.1" 200 2326 "-" "curl/8.0""#,
        );
        assert_eq!(parsed.fields.get("status"), Some(&Value::from(200)));
        assert_eq!(parsed.raw_level.as_deref(), Some("INFO"));
        assert_eq!(parsed.source.as_deref(), Some("apache"));
    }

    #[test]
    fn parses_kubernetes_line() {
        let parsed = parse_line(
            Format::Kubernetes,
            "2024-01-01T00:00:00.123Z stdout F panic: connection refused",
        );
        assert_eq!(parsed.message, "panic: connection refused");
        assert_eq!(parsed.fields.get("stream"), Some(&Value::String("stdout".into())));
    }

    #[test]
    fn truncates_overlong_lines() {
        let long = "x".repeat(MAX_LINE_BYTES + 10);
        let parsed = parse_line(Format::GenericTimestamped, &long);
        assert_eq!(parsed.fields.get("truncated"), Some(&Value::Bool(true)));
        assert!(parsed.message.len() <= MAX_LINE_BYTES);
    }
}
