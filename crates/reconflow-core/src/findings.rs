use tracing::debug;

use crate::model::{KeyFinding, RecordSet, Severity};

/// A pure derivation rule: normalized records in, zero or more findings out.
pub type RuleFn = fn(&RecordSet) -> Vec<KeyFinding>;

/// A named rule entry in the registry.
#[derive(Clone, Copy)]
pub struct FindingRule {
    pub id: &'static str,
    pub derive: RuleFn,
}

/// Ordered registry of independent rules. Output order follows rule order.
#[derive(Clone)]
pub struct RuleSet {
    rules: Vec<FindingRule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(vec![
            FindingRule {
                id: "public-rdp",
                derive: public_rdp,
            },
            FindingRule {
                id: "high-impact-template",
                derive: high_impact_template,
            },
        ])
    }
}

impl RuleSet {
    pub fn new(rules: Vec<FindingRule>) -> Self {
        Self { rules }
    }

    /// Append a rule after the existing ones.
    pub fn with_rule(mut self, rule: FindingRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|rule| rule.id)
    }

    pub fn derive(&self, records: &RecordSet) -> Vec<KeyFinding> {
        let mut findings = Vec::new();
        for rule in &self.rules {
            let produced = (rule.derive)(records);
            debug!(rule = rule.id, count = produced.len(), "applied finding rule");
            findings.extend(produced);
        }
        findings
    }
}

/// Remote desktop reachable from the internet, one finding per observation.
pub fn public_rdp(records: &RecordSet) -> Vec<KeyFinding> {
    records
        .open_ports
        .iter()
        .filter(|port| port.port == Some(3389))
        .map(|port| {
            let ip = port.ip.as_deref().unwrap_or("unknown");
            KeyFinding {
                title: "Public RDP service exposed".into(),
                severity: Severity::High,
                category: "attack_surface".into(),
                description: format!("Host {ip} exposes RDP (3389/tcp) to the internet."),
                evidence: format!("Port 3389 open on {ip}"),
            }
        })
        .collect()
}

/// Critical and high template matches carried through as findings.
pub fn high_impact_template(records: &RecordSet) -> Vec<KeyFinding> {
    records
        .vulnerabilities
        .iter()
        .filter_map(|vuln| {
            let severity = vuln.parsed_severity()?;
            if !matches!(severity, Severity::Critical | Severity::High) {
                return None;
            }
            Some(KeyFinding {
                title: format!("Template match ({severity})"),
                severity,
                category: "vulnerability".into(),
                description: format!(
                    "Template {} triggered.",
                    vuln.template_id.as_deref().unwrap_or("unknown")
                ),
                evidence: vuln.host.clone().unwrap_or_default(),
            })
        })
        .collect()
}
