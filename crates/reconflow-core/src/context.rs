//! Render context handed to the external report renderer.

use std::{fs, path::PathBuf, time::SystemTime};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::{
    aggregate::Aggregator,
    artifact::ArtifactLayout,
    findings::RuleSet,
    model::{
        BreachRecord, CodeLeakMatch, HostIntelRecord, HttpService, IpIntelRecord, KeyFinding,
        OpenPort, RecordSet, Target, VulnerabilityFinding,
    },
    normalize::{
        collapse_ports, hosts_with_open_ports, join_truncated, truncate,
        DESCRIPTION_DISPLAY_CHARS, LIST_DISPLAY_CHARS, TECH_DISPLAY_CHARS,
    },
    risk::risk_score,
};

/// Engagement id used when the target file does not carry one.
pub const DEFAULT_ENGAGEMENT_ID: &str = "BBP-OSINT-2025-001";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub subdomain_count: usize,
    pub ip_count: usize,
    pub hosts_with_open_ports: usize,
    pub http_services_count: usize,
    pub vulnerability_findings_count: usize,
    pub breach_records: usize,
    pub code_leak_matches: usize,
    pub ip_intel_hosts: usize,
    pub host_intel_hosts: usize,
    pub risk_score: u64,
}

impl Stats {
    pub fn from_records(records: &RecordSet) -> Self {
        Self {
            subdomain_count: records.subdomains.len(),
            ip_count: records.ips.len(),
            hosts_with_open_ports: hosts_with_open_ports(&records.open_ports),
            http_services_count: records.http_services.len(),
            vulnerability_findings_count: records.vulnerabilities.len(),
            breach_records: records.breaches.len(),
            code_leak_matches: records.code_leaks.len(),
            ip_intel_hosts: records.ip_intel.len(),
            host_intel_hosts: records.host_intel.len(),
            risk_score: risk_score(&records.vulnerabilities),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpServiceRow {
    pub url: Option<String>,
    pub status: Option<u16>,
    pub title: Option<String>,
    pub tech: String,
}

impl From<&HttpService> for HttpServiceRow {
    fn from(service: &HttpService) -> Self {
        Self {
            url: service.url.clone(),
            status: service.status,
            title: service.title.clone(),
            tech: join_truncated(&service.tech, TECH_DISPLAY_CHARS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VulnerabilityRow {
    pub severity: Option<String>,
    pub template_id: Option<String>,
    pub host: Option<String>,
    pub description: String,
}

impl From<&VulnerabilityFinding> for VulnerabilityRow {
    fn from(finding: &VulnerabilityFinding) -> Self {
        Self {
            severity: finding.severity.clone(),
            template_id: finding.template_id.clone(),
            host: finding.host.clone(),
            description: truncate(&finding.description, DESCRIPTION_DISPLAY_CHARS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostIntelRow {
    pub ip: Option<String>,
    pub org: Option<String>,
    pub ports: String,
    pub tags: String,
    pub vuln_ids: String,
}

impl From<&HostIntelRecord> for HostIntelRow {
    fn from(record: &HostIntelRecord) -> Self {
        Self {
            ip: record.ip.clone(),
            org: record.org.clone(),
            ports: join_truncated(&record.ports, LIST_DISPLAY_CHARS),
            tags: join_truncated(&record.tags, LIST_DISPLAY_CHARS),
            vuln_ids: join_truncated(&record.vuln_ids, LIST_DISPLAY_CHARS),
        }
    }
}

/// Everything a renderer needs, already truncated for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportContext {
    pub target: Target,
    pub stats: Stats,
    pub subdomains: Vec<String>,
    pub open_ports: Vec<OpenPort>,
    pub http_services: Vec<HttpServiceRow>,
    pub vulnerability_findings: Vec<VulnerabilityRow>,
    pub key_findings: Vec<KeyFinding>,
    pub breaches: Vec<BreachRecord>,
    pub code_leaks: Vec<CodeLeakMatch>,
    pub ip_intel: Vec<IpIntelRecord>,
    pub host_intel: Vec<HostIntelRow>,
}

/// Compose the render context. `generated_at` is only used when the target
/// has no `timestamp` of its own.
pub fn assemble(
    target: &Target,
    records: RecordSet,
    rules: &RuleSet,
    generated_at: SystemTime,
) -> ReportContext {
    let mut target = target.clone();
    target
        .metadata
        .entry("timestamp".to_string())
        .or_insert_with(|| {
            Value::String(humantime::format_rfc3339_seconds(generated_at).to_string())
        });
    target
        .metadata
        .entry("engagement_id".to_string())
        .or_insert_with(|| Value::String(DEFAULT_ENGAGEMENT_ID.to_string()));

    let stats = Stats::from_records(&records);
    // Rules see every raw observation; only the display table is collapsed.
    let key_findings = rules.derive(&records);
    ReportContext {
        target,
        stats,
        http_services: records.http_services.iter().map(HttpServiceRow::from).collect(),
        vulnerability_findings: records
            .vulnerabilities
            .iter()
            .map(VulnerabilityRow::from)
            .collect(),
        host_intel: records.host_intel.iter().map(HostIntelRow::from).collect(),
        key_findings,
        subdomains: records.subdomains,
        open_ports: collapse_ports(&records.open_ports),
        breaches: records.breaches,
        code_leaks: records.code_leaks,
        ip_intel: records.ip_intel,
    }
}

impl ReportContext {
    /// Aggregate the target's artifacts and assemble the context in one step.
    #[instrument(name = "report_context", skip_all, fields(target = %target.name))]
    pub fn from_artifacts(
        layout: &ArtifactLayout,
        target: &Target,
        rules: &RuleSet,
        generated_at: SystemTime,
    ) -> Result<Self> {
        let records = Aggregator::new(layout, target).collect()?;
        let context = assemble(target, records, rules, generated_at);
        info!(
            risk_score = context.stats.risk_score,
            key_findings = context.key_findings.len(),
            "report context assembled"
        );
        Ok(context)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize report context")
    }

    /// Write `<target_dir>/<identity>_report_context.json`, replacing any previous one.
    pub fn write(&self, layout: &ArtifactLayout) -> Result<PathBuf> {
        let dir = layout.target_dir();
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(format!("{}_report_context.json", layout.identity()));
        fs::write(&path, self.to_json()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{Duration, UNIX_EPOCH};

    fn epoch_plus(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn empty_records_give_zero_stats_and_no_findings() {
        let target = Target::new("acme", vec!["acme.com".into()]);
        let context = assemble(&target, RecordSet::default(), &RuleSet::default(), epoch_plus(0));
        assert_eq!(context.stats, Stats::default());
        assert!(context.key_findings.is_empty());
        assert_eq!(context.target.metadata["timestamp"], json!("1970-01-01T00:00:00Z"));
        assert_eq!(context.target.metadata["engagement_id"], json!(DEFAULT_ENGAGEMENT_ID));
    }

    #[test]
    fn existing_metadata_is_not_overwritten() {
        let mut target = Target::new("acme", Vec::new());
        target.metadata.insert("engagement_id".into(), json!("ENG-7"));
        target.metadata.insert("timestamp".into(), json!("kickoff"));
        let context = assemble(&target, RecordSet::default(), &RuleSet::default(), epoch_plus(60));
        assert_eq!(context.target.metadata["engagement_id"], json!("ENG-7"));
        assert_eq!(context.target.metadata["timestamp"], json!("kickoff"));
    }

    #[test]
    fn display_rows_are_truncated_but_records_are_not() {
        let long = "x".repeat(150);
        let records = RecordSet {
            vulnerabilities: vec![VulnerabilityFinding {
                severity: Some("Medium".into()),
                template_id: Some("t".into()),
                host: Some("h".into()),
                description: long.clone(),
            }],
            http_services: vec![HttpService {
                url: Some("https://a.acme.com".into()),
                status: Some(200),
                title: None,
                tech: (0..30).map(|i| format!("tech{i}")).collect(),
            }],
            host_intel: vec![HostIntelRecord {
                ip: Some("10.0.0.1".into()),
                org: None,
                ports: (1000..1040).collect(),
                tags: vec!["cloud".into()],
                vuln_ids: Vec::new(),
                raw: Value::Null,
            }],
            ..RecordSet::default()
        };
        let context = assemble(
            &Target::new("acme", Vec::new()),
            records.clone(),
            &RuleSet::default(),
            epoch_plus(0),
        );

        assert_eq!(context.vulnerability_findings[0].description.chars().count(), 100);
        assert_eq!(context.http_services[0].tech.chars().count(), 80);
        assert_eq!(context.host_intel[0].ports.chars().count(), 80);
        assert_eq!(context.host_intel[0].tags, "cloud");
        assert_eq!(context.stats.risk_score, 40);
        assert_eq!(records.vulnerabilities[0].description, long);
    }

    #[test]
    fn repeated_port_rows_collapse_for_display_but_still_count_for_rules() {
        let rdp = OpenPort {
            ip: Some("198.51.100.7".into()),
            port: Some(3389),
            protocol: Some("tcp".into()),
            tls: None,
            note: String::new(),
        };
        let records = RecordSet {
            open_ports: vec![rdp.clone(), rdp.clone()],
            ..RecordSet::default()
        };
        let context = assemble(
            &Target::new("acme", Vec::new()),
            records,
            &RuleSet::default(),
            epoch_plus(0),
        );
        assert_eq!(context.open_ports, vec![rdp]);
        assert_eq!(context.stats.hosts_with_open_ports, 1);
        assert_eq!(context.key_findings.len(), 2);
    }

    #[test]
    fn assembling_twice_is_byte_identical() {
        let temp = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(temp.path(), "acme");
        layout
            .write(
                crate::artifact::ArtifactKind::PortScan,
                "{\"ip\":\"10.0.0.1\",\"port\":3389}\n",
            )
            .unwrap();
        let target = Target::new("acme", vec!["acme.com".into()]);
        let build = || {
            ReportContext::from_artifacts(&layout, &target, &RuleSet::default(), epoch_plus(42))
                .unwrap()
                .to_json()
                .unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn context_file_lands_next_to_raw_dir() {
        let temp = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(temp.path(), "acme");
        let target = Target::new("ACME Corp", Vec::new());
        let context =
            ReportContext::from_artifacts(&layout, &target, &RuleSet::default(), epoch_plus(0))
                .unwrap();
        let path = context.write(&layout).unwrap();
        assert_eq!(path, temp.path().join("acme").join("acme_report_context.json"));
        assert!(!temp.path().join("ACME Corp").exists());
        let written: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["stats"]["risk_score"], json!(0));
    }
}
