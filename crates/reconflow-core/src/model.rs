use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Engagement target: identity, owned domains and free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domains: Vec<String>,
    /// Extra keys from the target file (engagement id, timestamp, client contact, ...).
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

impl Target {
    pub fn new(name: impl Into<String>, domains: Vec<String>) -> Self {
        Self {
            name: name.into(),
            domains,
            metadata: BTreeMap::new(),
        }
    }

    /// Owned domains, lower-cased, in configuration order.
    pub fn owned_domains(&self) -> Vec<String> {
        self.domains
            .iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect()
    }
}

/// Vulnerability severity as reported by the template scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }

    /// Case-insensitive lookup; `None` for anything outside the known scale.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "info" => Ok(Self::Info),
            _ => Err(UnknownSeverity(s.to_string())),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown severity `{0}`")]
pub struct UnknownSeverity(pub String);

/// One open port observed by the port scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPort {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub tls: Option<bool>,
    #[serde(default)]
    pub note: String,
}

impl OpenPort {
    /// Identity of a port observation across repeated scans.
    pub fn key(&self) -> (Option<&str>, Option<u16>, Option<&str>) {
        (self.ip.as_deref(), self.port, self.protocol.as_deref())
    }
}

/// One probed HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpService {
    pub url: Option<String>,
    pub status: Option<u16>,
    pub title: Option<String>,
    #[serde(default)]
    pub tech: Vec<String>,
}

/// One template match from the vulnerability scanner.
///
/// `severity` keeps the raw string so unknown levels survive into the report
/// even though they are not scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityFinding {
    pub severity: Option<String>,
    pub template_id: Option<String>,
    pub host: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl VulnerabilityFinding {
    pub fn parsed_severity(&self) -> Option<Severity> {
        self.severity.as_deref().and_then(Severity::parse)
    }
}

/// Provider breach object tagged with the domain that matched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreachRecord {
    pub queried_domain: Option<String>,
    pub breach: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeLeakMatch {
    pub query: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub repo_full_name: Option<String>,
    pub html_url: Option<String>,
    pub score: Option<f64>,
}

/// IP geolocation/ownership lookup, passed through from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpIntelRecord {
    pub ip: Option<String>,
    pub attributes: Value,
}

/// Host intelligence for one IP (exposed ports, tags, known vulnerability ids).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostIntelRecord {
    pub ip: Option<String>,
    pub org: Option<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub vuln_ids: Vec<String>,
    #[serde(default)]
    pub raw: Value,
}

/// Summary item produced by the findings rules, never by a stage directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFinding {
    pub title: String,
    pub severity: Severity,
    pub category: String,
    pub description: String,
    pub evidence: String,
}

/// Every normalized record sequence of one target, ready for rules and reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    /// Owned (or unfiltered) subdomains, sorted and unique.
    pub subdomains: Vec<String>,
    pub open_ports: Vec<OpenPort>,
    /// Unique IPs across port observations, sorted.
    pub ips: Vec<String>,
    pub http_services: Vec<HttpService>,
    pub vulnerabilities: Vec<VulnerabilityFinding>,
    pub breaches: Vec<BreachRecord>,
    pub code_leaks: Vec<CodeLeakMatch>,
    pub ip_intel: Vec<IpIntelRecord>,
    pub host_intel: Vec<HostIntelRecord>,
}
