use std::fmt::Write;

use serde::Serialize;

use crate::{
    config::{GlobalConfig, SkipReason},
    context::{ReportContext, Stats},
    model::KeyFinding,
    pipeline::{stage_enablement, RunReport, StageKind, StageOutcome},
};

/// Format styles supported by the console renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Per-stage status lines for a finished run.
pub fn render_run_report(report: &RunReport, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_run_human(report),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
    }
}

fn render_run_human(report: &RunReport) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(out, "Pipeline: {}", report.target)?;
    for entry in &report.stages {
        let status = match &entry.outcome {
            StageOutcome::Ran {
                records,
                failed_lookups,
                rate_limited,
            } => {
                let mut line = format!("ran, {records} records");
                if *failed_lookups > 0 {
                    write!(line, ", {failed_lookups} failed lookups")?;
                }
                if *rate_limited {
                    line.push_str(", stopped by rate limit");
                }
                line
            }
            StageOutcome::Skipped { reason } => format!("skipped ({reason})"),
            StageOutcome::Failed { detail } => format!("failed: {detail}"),
        };
        writeln!(out, "  - {:<20} {status}", entry.stage.as_str())?;
    }
    writeln!(
        out,
        "\nRan: {} • Skipped: {} • Failed: {}",
        report.count_ran(),
        report.count_skipped(),
        report.count_failed()
    )?;
    Ok(out)
}

/// Headline numbers and key findings of an assembled context.
pub fn render_context_summary(context: &ReportContext, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_summary_human(context),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&JsonSummary::from(context))?),
    }
}

fn render_summary_human(context: &ReportContext) -> anyhow::Result<String> {
    let stats = &context.stats;
    let mut out = String::new();
    writeln!(out, "Target: {}", context.target.name)?;
    writeln!(out, "Risk Score: {}", stats.risk_score)?;
    writeln!(out)?;
    for (label, value) in [
        ("Subdomains", stats.subdomain_count),
        ("Unique IPs", stats.ip_count),
        ("Hosts with open ports", stats.hosts_with_open_ports),
        ("HTTP services", stats.http_services_count),
        ("Vulnerability findings", stats.vulnerability_findings_count),
        ("Breach records", stats.breach_records),
        ("Code leak matches", stats.code_leak_matches),
        ("IP intel hosts", stats.ip_intel_hosts),
        ("Host intel hosts", stats.host_intel_hosts),
    ] {
        writeln!(out, "  {label:>22}: {value}")?;
    }

    writeln!(out)?;
    if context.key_findings.is_empty() {
        writeln!(out, "No key findings.")?;
    } else {
        writeln!(out, "Key Findings:")?;
        for finding in &context.key_findings {
            writeln!(
                out,
                "  - [{severity}] {title} ({evidence})",
                severity = finding.severity,
                title = finding.title,
                evidence = finding.evidence,
            )?;
        }
    }
    Ok(out)
}

#[derive(Debug, Serialize)]
struct JsonSummary<'a> {
    target: &'a str,
    stats: &'a Stats,
    key_findings: &'a [KeyFinding],
}

impl<'a> From<&'a ReportContext> for JsonSummary<'a> {
    fn from(context: &'a ReportContext) -> Self {
        Self {
            target: &context.target.name,
            stats: &context.stats,
            key_findings: &context.key_findings,
        }
    }
}

#[derive(Debug, Serialize)]
struct EnablementRow {
    stage: StageKind,
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<SkipReason>,
}

/// Which stages the configuration allows, without running anything.
pub fn render_enablement(config: &GlobalConfig, format: OutputFormat) -> anyhow::Result<String> {
    let rows: Vec<EnablementRow> = StageKind::ORDER
        .iter()
        .map(|stage| {
            let decision = stage_enablement(config, *stage);
            EnablementRow {
                stage: *stage,
                enabled: decision.is_ok(),
                reason: decision.err(),
            }
        })
        .collect();

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&rows)?),
        OutputFormat::Human => {
            let mut out = String::new();
            for row in &rows {
                match &row.reason {
                    None => writeln!(out, "  {:<20} enabled", row.stage.as_str())?,
                    Some(reason) => {
                        writeln!(out, "  {:<20} disabled ({reason})", row.stage.as_str())?
                    }
                }
            }
            Ok(out)
        }
    }
}
