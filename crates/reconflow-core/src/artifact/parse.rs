//! Pure text-to-record parsers for every stage artifact.
//!
//! None of these functions touch the filesystem. Malformed lines and records
//! are dropped individually; an artifact is never rejected as a whole.

use serde_json::{Map, Value};
use tracing::trace;

use crate::model::{
    BreachRecord, CodeLeakMatch, HostIntelRecord, HttpService, IpIntelRecord, OpenPort,
    VulnerabilityFinding,
};

/// Parse line-delimited JSON. Blank and unparseable lines are skipped; order is preserved.
pub fn parse_jsonl(text: &str) -> Vec<Value> {
    let mut values = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => values.push(value),
            Err(err) => trace!(line = idx + 1, error = %err, "dropping malformed jsonl line"),
        }
    }
    values
}

/// Parse a newline-separated token list, dropping blank lines. Case is left untouched.
pub fn parse_token_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Shape detected by [`parse_json_or_jsonl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentShape {
    Empty,
    Array,
    Object,
    Lines,
}

/// Parse text that is either one JSON document (array or single object) or JSONL.
///
/// The whole document is tried first; an array is used as-is, any other value
/// becomes a one-element sequence, and a document-level parse failure falls
/// back to [`parse_jsonl`].
pub fn parse_json_or_jsonl(text: &str) -> (DocumentShape, Vec<Value>) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return (DocumentShape::Empty, Vec::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => (DocumentShape::Array, items),
        Ok(value) => (DocumentShape::Object, vec![value]),
        Err(_) => (DocumentShape::Lines, parse_jsonl(trimmed)),
    }
}

pub fn parse_port_scan(text: &str) -> Vec<OpenPort> {
    objects(parse_jsonl(text))
        .map(|obj| OpenPort {
            ip: string_field(&obj, &["ip"]),
            port: obj.get("port").and_then(as_port),
            protocol: string_field(&obj, &["protocol"]),
            tls: obj.get("tls").and_then(Value::as_bool),
            note: String::new(),
        })
        .collect()
}

pub fn parse_http_probe(text: &str) -> Vec<HttpService> {
    objects(parse_jsonl(text))
        .map(|obj| HttpService {
            url: string_field(&obj, &["url"]),
            status: obj.get("status_code").and_then(as_port),
            title: string_field(&obj, &["title"]),
            tech: string_list(obj.get("technologies").or_else(|| obj.get("tech"))),
        })
        .collect()
}

pub fn parse_vulnerability_scan(text: &str) -> Vec<VulnerabilityFinding> {
    objects(parse_jsonl(text))
        .map(|obj| {
            let info = obj.get("info").and_then(Value::as_object);
            VulnerabilityFinding {
                severity: info.and_then(|info| string_field(info, &["severity"])),
                template_id: string_field(&obj, &["template-id", "template_id"]),
                host: string_field(&obj, &["host"]),
                description: info
                    .and_then(|info| string_field(info, &["description"]))
                    .unwrap_or_default(),
            }
        })
        .collect()
}

pub fn parse_breaches(text: &str) -> Vec<BreachRecord> {
    objects(parse_jsonl(text))
        .map(|mut obj| {
            let queried_domain = obj
                .remove("_queried_domain")
                .and_then(|v| v.as_str().map(str::to_string));
            BreachRecord {
                queried_domain,
                breach: Value::Object(obj),
            }
        })
        .collect()
}

pub fn parse_code_leaks(text: &str) -> Vec<CodeLeakMatch> {
    objects(parse_jsonl(text))
        .map(|obj| CodeLeakMatch {
            query: string_field(&obj, &["query"]),
            name: string_field(&obj, &["name"]),
            path: string_field(&obj, &["path"]),
            repo_full_name: string_field(&obj, &["repo_full_name"]),
            html_url: string_field(&obj, &["html_url"]),
            score: obj.get("score").and_then(Value::as_f64),
        })
        .collect()
}

pub fn parse_ip_intel(text: &str) -> Vec<IpIntelRecord> {
    objects(parse_jsonl(text))
        .map(|obj| IpIntelRecord {
            ip: string_field(&obj, &["_ip", "ip"]),
            attributes: Value::Object(obj),
        })
        .collect()
}

/// Host-intel artifacts come either as a JSON array or as JSONL; both shapes
/// yield the same records.
pub fn parse_host_intel(text: &str) -> Vec<HostIntelRecord> {
    let (shape, values) = parse_json_or_jsonl(text);
    trace!(?shape, records = values.len(), "detected host intel shape");
    objects(values).map(host_intel_from_object).collect()
}

fn host_intel_from_object(obj: Map<String, Value>) -> HostIntelRecord {
    let vuln_ids = match obj.get("vuln_ids") {
        Some(ids) => string_list(Some(ids)),
        None => match obj.get("vulns") {
            Some(Value::Object(vulns)) => vulns.keys().cloned().collect(),
            other => string_list(other),
        },
    };
    HostIntelRecord {
        ip: string_field(&obj, &["_ip", "ip", "ip_str"]),
        org: string_field(&obj, &["org", "isp"]),
        ports: obj
            .get("ports")
            .and_then(Value::as_array)
            .map(|ports| ports.iter().filter_map(as_port).collect())
            .unwrap_or_default(),
        tags: string_list(obj.get("tags")),
        vuln_ids,
        raw: obj
            .get("data_raw")
            .cloned()
            .unwrap_or_else(|| Value::Object(obj.clone())),
    }
}

fn objects(values: Vec<Value>) -> impl Iterator<Item = Map<String, Value>> {
    values.into_iter().filter_map(|value| match value {
        Value::Object(obj) => Some(obj),
        _ => None,
    })
}

/// First non-null string under any of `keys`; numbers are rendered as text.
fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn as_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
