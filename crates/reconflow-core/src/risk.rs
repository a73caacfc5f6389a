use crate::model::{Severity, VulnerabilityFinding};

/// Contribution of one severity level to the aggregate risk score.
pub fn severity_weight(severity: Severity) -> u64 {
    match severity {
        Severity::Critical => 100,
        Severity::High => 70,
        Severity::Medium => 40,
        Severity::Low => 10,
        Severity::Info => 1,
    }
}

/// Unbounded additive score over all vulnerability findings. Unknown or
/// missing severities contribute nothing.
pub fn risk_score(findings: &[VulnerabilityFinding]) -> u64 {
    findings
        .iter()
        .filter_map(VulnerabilityFinding::parsed_severity)
        .map(severity_weight)
        .sum()
}
