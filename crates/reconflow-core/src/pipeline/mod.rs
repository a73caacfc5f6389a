//! Stage sequencing for one target run.
//!
//! Core stages run strictly in order (subdomains, ports, HTTP, vulnerabilities),
//! each gated on its upstream stage having produced a non-empty artifact in this
//! run. The four enrichment stages are independent and run concurrently. No
//! stage outcome ever aborts the run.

use std::{collections::BTreeSet, fmt, sync::Arc};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    artifact::{
        parse::{parse_http_probe, parse_port_scan, parse_token_list},
        ArtifactKind, ArtifactLayout,
    },
    config::{CapabilityName, GlobalConfig, SkipReason},
    model::Target,
    normalize::unique_ips,
};

pub mod lookup;
pub mod providers;
pub mod tools;

use providers::{HttpProviderFactory, ProviderFactory};
use tools::{args, invoke, resolve_hosts, CommandToolRunner, HostResolver, SystemResolver, ToolRunner};

/// Every stage the orchestrator knows, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    SubdomainDiscovery,
    PortScan,
    HttpProbe,
    VulnerabilityScan,
    BreachSearch,
    CodeLeakSearch,
    IpEnrichment,
    HostEnrichment,
}

impl StageKind {
    pub const ORDER: [StageKind; 8] = [
        Self::SubdomainDiscovery,
        Self::PortScan,
        Self::HttpProbe,
        Self::VulnerabilityScan,
        Self::BreachSearch,
        Self::CodeLeakSearch,
        Self::IpEnrichment,
        Self::HostEnrichment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubdomainDiscovery => "subdomain_discovery",
            Self::PortScan => "port_scan",
            Self::HttpProbe => "http_probe",
            Self::VulnerabilityScan => "vulnerability_scan",
            Self::BreachSearch => "breach_search",
            Self::CodeLeakSearch => "code_leak_search",
            Self::IpEnrichment => "ip_enrichment",
            Self::HostEnrichment => "host_enrichment",
        }
    }

    /// Artifact this stage overwrites.
    pub fn artifact(&self) -> ArtifactKind {
        match self {
            Self::SubdomainDiscovery => ArtifactKind::Subdomains,
            Self::PortScan => ArtifactKind::PortScan,
            Self::HttpProbe => ArtifactKind::HttpProbe,
            Self::VulnerabilityScan => ArtifactKind::VulnerabilityScan,
            Self::BreachSearch => ArtifactKind::Breaches,
            Self::CodeLeakSearch => ArtifactKind::CodeLeaks,
            Self::IpEnrichment => ArtifactKind::IpIntel,
            Self::HostEnrichment => ArtifactKind::HostIntel,
        }
    }

    /// Stage whose artifact must be present and non-empty before this one runs.
    pub fn upstream(&self) -> Option<StageKind> {
        match self {
            Self::PortScan => Some(Self::SubdomainDiscovery),
            Self::HttpProbe => Some(Self::PortScan),
            Self::VulnerabilityScan => Some(Self::HttpProbe),
            Self::IpEnrichment | Self::HostEnrichment => Some(Self::PortScan),
            Self::SubdomainDiscovery | Self::BreachSearch | Self::CodeLeakSearch => None,
        }
    }

    /// Capabilities consulted by the enablement policy. The subdomain stage
    /// runs when either enumerator is usable.
    pub fn capabilities(&self) -> &'static [CapabilityName] {
        match self {
            Self::SubdomainDiscovery => &[CapabilityName::Amass, CapabilityName::Subfinder],
            Self::PortScan => &[CapabilityName::Naabu],
            Self::HttpProbe => &[CapabilityName::Httpx],
            Self::VulnerabilityScan => &[CapabilityName::Nuclei],
            Self::BreachSearch => &[CapabilityName::Hibp],
            Self::CodeLeakSearch => &[CapabilityName::Github],
            Self::IpEnrichment => &[CapabilityName::Ipinfo],
            Self::HostEnrichment => &[CapabilityName::Shodan],
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of attempting one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Ran {
        records: usize,
        failed_lookups: usize,
        rate_limited: bool,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        detail: String,
    },
}

impl StageOutcome {
    pub fn ran(records: usize) -> Self {
        Self::Ran {
            records,
            failed_lookups: 0,
            rate_limited: false,
        }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    pub fn is_ran(&self) -> bool {
        matches!(self, Self::Ran { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: StageKind,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

/// Ordered per-stage status summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub target: String,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            stages: Vec::new(),
        }
    }

    pub fn push(&mut self, stage: StageKind, outcome: StageOutcome) {
        self.stages.push(StageReport { stage, outcome });
    }

    pub fn outcome(&self, stage: StageKind) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|report| report.stage == stage)
            .map(|report| &report.outcome)
    }

    pub fn count_ran(&self) -> usize {
        self.stages.iter().filter(|r| r.outcome.is_ran()).count()
    }

    pub fn count_skipped(&self) -> usize {
        self.stages
            .iter()
            .filter(|r| matches!(r.outcome, StageOutcome::Skipped { .. }))
            .count()
    }

    pub fn count_failed(&self) -> usize {
        self.stages
            .iter()
            .filter(|r| matches!(r.outcome, StageOutcome::Failed { .. }))
            .count()
    }
}

/// Drives every stage for one target.
pub struct Orchestrator {
    config: Arc<GlobalConfig>,
    target: Target,
    layout: ArtifactLayout,
    tools: Box<dyn ToolRunner>,
    resolver: Box<dyn HostResolver>,
    providers: Box<dyn ProviderFactory>,
}

impl Orchestrator {
    pub fn new(config: Arc<GlobalConfig>, target: Target, layout: ArtifactLayout) -> Self {
        Self {
            config,
            target,
            layout,
            tools: Box::new(CommandToolRunner),
            resolver: Box::new(SystemResolver),
            providers: Box::new(HttpProviderFactory),
        }
    }

    pub fn with_tools(mut self, tools: impl ToolRunner + 'static) -> Self {
        self.tools = Box::new(tools);
        self
    }

    pub fn with_resolver(mut self, resolver: impl HostResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn with_providers(mut self, providers: impl ProviderFactory + 'static) -> Self {
        self.providers = Box::new(providers);
        self
    }

    #[instrument(name = "pipeline_run", skip(self), fields(target = %self.target.name))]
    pub async fn run(&self) -> RunReport {
        info!(data_dir = %self.layout.target_dir().display(), "starting pipeline");
        if let Err(err) = self.layout.ensure_raw_dir() {
            error!(error = %format!("{err:#}"), "raw data directory unavailable");
        }

        let mut report = RunReport::new(self.target.name.clone());
        for stage in [
            StageKind::SubdomainDiscovery,
            StageKind::PortScan,
            StageKind::HttpProbe,
            StageKind::VulnerabilityScan,
        ] {
            let outcome = match self.gate(stage, &report) {
                Err(reason) => StageOutcome::skipped(reason),
                Ok(()) => settle(stage, self.run_core(stage).await),
            };
            self.discard_stale(stage, &outcome);
            log_outcome(stage, &outcome);
            report.push(stage, outcome);
        }

        let (breaches, leaks, ip_intel, host_intel) = tokio::join!(
            self.run_enrichment(StageKind::BreachSearch, &report),
            self.run_enrichment(StageKind::CodeLeakSearch, &report),
            self.run_enrichment(StageKind::IpEnrichment, &report),
            self.run_enrichment(StageKind::HostEnrichment, &report),
        );
        for (stage, outcome) in [
            (StageKind::BreachSearch, breaches),
            (StageKind::CodeLeakSearch, leaks),
            (StageKind::IpEnrichment, ip_intel),
            (StageKind::HostEnrichment, host_intel),
        ] {
            self.discard_stale(stage, &outcome);
            log_outcome(stage, &outcome);
            report.push(stage, outcome);
        }

        info!(
            ran = report.count_ran(),
            skipped = report.count_skipped(),
            failed = report.count_failed(),
            "pipeline finished"
        );
        report
    }

    /// Enablement first, then the upstream artifact requirement.
    fn gate(&self, stage: StageKind, report: &RunReport) -> Result<(), SkipReason> {
        stage_enablement(&self.config, stage)?;
        if let Some(upstream) = stage.upstream() {
            let produced = report.outcome(upstream).is_some_and(StageOutcome::is_ran)
                && self.layout.has_content(upstream.artifact());
            if !produced {
                return Err(SkipReason::missing_artifact(upstream.artifact()));
            }
        }
        Ok(())
    }

    /// An enabled stage that had nothing to work on leaves an empty artifact
    /// behind. Stages switched off by configuration keep earlier output.
    fn discard_stale(&self, stage: StageKind, outcome: &StageOutcome) {
        let StageOutcome::Skipped { reason } = outcome else {
            return;
        };
        if !matches!(reason, SkipReason::MissingArtifact(_) | SkipReason::NoInput(_))
            || !self.layout.path(stage.artifact()).exists()
        {
            return;
        }
        match self.layout.write(stage.artifact(), "") {
            Ok(path) => debug!(%stage, path = %path.display(), "cleared artifact from an earlier run"),
            Err(err) => warn!(%stage, error = %format!("{err:#}"), "could not clear stale artifact"),
        }
    }

    async fn run_core(&self, stage: StageKind) -> Result<StageOutcome> {
        match stage {
            StageKind::SubdomainDiscovery => self.discover_subdomains().await,
            StageKind::PortScan => self.scan_ports().await,
            StageKind::HttpProbe => self.probe_http().await,
            StageKind::VulnerabilityScan => self.scan_vulnerabilities().await,
            other => anyhow::bail!("{other} is not a core stage"),
        }
    }

    fn executable(&self, name: CapabilityName) -> Option<&std::path::Path> {
        self.config
            .capability(name)
            .filter(|_| self.config.enablement(name).is_ok())
            .and_then(|cap| cap.executable.as_deref())
    }

    async fn discover_subdomains(&self) -> Result<StageOutcome> {
        let domains = self.target.owned_domains();
        if domains.is_empty() {
            return Ok(StageOutcome::skipped(SkipReason::NoInput(
                "no domains configured for target".into(),
            )));
        }

        let mut hosts = BTreeSet::new();
        let mut attempts = 0usize;
        let mut errors = Vec::new();
        for domain in &domains {
            let invocations = [
                (CapabilityName::Amass, args(&["enum", "-passive", "-d", domain.as_str()])),
                (CapabilityName::Subfinder, args(&["-silent", "-d", domain.as_str()])),
            ];
            for (name, tool_args) in invocations {
                let Some(program) = self.executable(name) else {
                    continue;
                };
                attempts += 1;
                info!(tool = %name, %domain, "enumerating subdomains");
                match invoke(self.tools.as_ref(), program, &tool_args, None).await {
                    Ok(stdout) => hosts.extend(parse_token_list(&stdout)),
                    Err(err) => {
                        warn!(tool = %name, %domain, error = %format!("{err:#}"), "enumeration failed");
                        errors.push(format!("{name}: {err:#}"));
                    }
                }
            }
        }
        if attempts > 0 && errors.len() == attempts {
            return Ok(StageOutcome::Failed {
                detail: errors.join("; "),
            });
        }

        let hosts: Vec<String> = hosts.into_iter().collect();
        self.layout.write(ArtifactKind::Subdomains, &hosts.join("\n"))?;
        Ok(StageOutcome::ran(hosts.len()))
    }

    async fn scan_ports(&self) -> Result<StageOutcome> {
        let hosts = parse_token_list(&self.layout.read(ArtifactKind::Subdomains)?);
        if hosts.is_empty() {
            return Ok(StageOutcome::skipped(SkipReason::missing_artifact(
                ArtifactKind::Subdomains,
            )));
        }
        let ips = resolve_hosts(self.resolver.as_ref(), &hosts).await;
        if ips.is_empty() {
            return Ok(StageOutcome::skipped(SkipReason::NoInput(
                "no IPv4 addresses could be resolved".into(),
            )));
        }
        let targets = self
            .layout
            .write(ArtifactKind::PortScanTargets, &ips.join("\n"))?;
        let program = self.require_executable(CapabilityName::Naabu)?;
        info!(ips = ips.len(), "scanning ports");
        let list = targets.to_string_lossy().into_owned();
        let stdout = invoke(
            self.tools.as_ref(),
            program,
            &args(&["-silent", "-json", "-s", "c", "-list", list.as_str()]),
            None,
        )
        .await?;
        self.layout.write(ArtifactKind::PortScan, &stdout)?;
        Ok(StageOutcome::ran(parse_port_scan(&stdout).len()))
    }

    async fn probe_http(&self) -> Result<StageOutcome> {
        let hosts = parse_token_list(&self.layout.read(ArtifactKind::Subdomains)?);
        if hosts.is_empty() {
            return Ok(StageOutcome::skipped(SkipReason::missing_artifact(
                ArtifactKind::Subdomains,
            )));
        }
        let program = self.require_executable(CapabilityName::Httpx)?;
        info!(hosts = hosts.len(), "probing HTTP services");
        let stdout = invoke(
            self.tools.as_ref(),
            program,
            &args(&["-silent", "-json"]),
            Some(&hosts.join("\n")),
        )
        .await?;
        self.layout.write(ArtifactKind::HttpProbe, &stdout)?;
        Ok(StageOutcome::ran(parse_http_probe(&stdout).len()))
    }

    async fn scan_vulnerabilities(&self) -> Result<StageOutcome> {
        let urls: Vec<String> = parse_http_probe(&self.layout.read(ArtifactKind::HttpProbe)?)
            .into_iter()
            .filter_map(|service| service.url)
            .collect();
        if urls.is_empty() {
            return Ok(StageOutcome::skipped(SkipReason::NoInput(
                "no URLs in HTTP probe results".into(),
            )));
        }
        let program = self.require_executable(CapabilityName::Nuclei)?;
        info!(urls = urls.len(), "running template scan");
        let stdout = invoke(
            self.tools.as_ref(),
            program,
            &args(&["-json", "-silent"]),
            Some(&urls.join("\n")),
        )
        .await?;
        self.layout.write(ArtifactKind::VulnerabilityScan, &stdout)?;
        Ok(StageOutcome::ran(
            crate::artifact::parse::parse_vulnerability_scan(&stdout).len(),
        ))
    }

    fn require_executable(&self, name: CapabilityName) -> Result<&std::path::Path> {
        self.executable(name)
            .ok_or_else(|| anyhow::anyhow!("{name} executable is not available"))
    }

    async fn run_enrichment(&self, stage: StageKind, report: &RunReport) -> StageOutcome {
        if let Err(reason) = self.gate(stage, report) {
            return StageOutcome::skipped(reason);
        }
        settle(stage, self.enrich(stage).await)
    }

    #[instrument(name = "enrichment_stage", skip_all, fields(stage = %stage))]
    async fn enrich(&self, stage: StageKind) -> Result<StageOutcome> {
        let name = stage.capabilities()[0];
        let capability = self
            .config
            .capability(name)
            .ok_or_else(|| anyhow::anyhow!("{name} capability vanished after enablement"))?;
        let provider = self.providers.build(stage, capability)?;

        let ips = match stage.upstream() {
            Some(upstream) => unique_ips(&parse_port_scan(&self.layout.read(upstream.artifact())?)),
            None => Vec::new(),
        };
        let queries = provider.queries(&self.target, &ips);
        if queries.is_empty() {
            return Ok(StageOutcome::skipped(SkipReason::NoInput(format!(
                "no lookup inputs for {stage}"
            ))));
        }

        info!(lookups = queries.len(), "starting lookups");
        let run = lookup::run_lookups(provider.as_ref(), queries).await;
        self.layout.write_jsonl(stage.artifact(), &run.records)?;
        Ok(StageOutcome::Ran {
            records: run.records.len(),
            failed_lookups: run.failed,
            rate_limited: run.rate_limited,
        })
    }
}

/// Configuration-only enablement decision for a stage. A stage backed by
/// several capabilities is enabled when any one of them is.
pub fn stage_enablement(config: &GlobalConfig, stage: StageKind) -> Result<(), SkipReason> {
    let mut first_refusal = None;
    for name in stage.capabilities() {
        match config.enablement(*name) {
            Ok(()) => return Ok(()),
            Err(reason) => {
                first_refusal.get_or_insert(reason);
            }
        }
    }
    Err(first_refusal
        .unwrap_or_else(|| SkipReason::NoInput(format!("{stage} has no capability"))))
}

fn settle(stage: StageKind, result: Result<StageOutcome>) -> StageOutcome {
    result.unwrap_or_else(|err| {
        error!(%stage, error = %format!("{err:#}"), "stage failed");
        StageOutcome::Failed {
            detail: format!("{err:#}"),
        }
    })
}

fn log_outcome(stage: StageKind, outcome: &StageOutcome) {
    match outcome {
        StageOutcome::Ran {
            records,
            failed_lookups,
            rate_limited,
        } => info!(%stage, records, failed_lookups, rate_limited, "stage completed"),
        StageOutcome::Skipped { reason } => warn!(%stage, %reason, "stage skipped"),
        StageOutcome::Failed { detail } => warn!(%stage, %detail, "stage failed"),
    }
}

#[cfg(test)]
mod tests;
