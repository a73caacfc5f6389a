use std::{
    collections::HashMap,
    net::Ipv4Addr,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    providers::{EnrichmentProvider, ProviderFactory},
    tools::{HostResolver, ToolOutput, ToolRunner},
    *,
};
use crate::{
    config::{Capability, LookupSettings, PLACEHOLDER_CREDENTIAL},
    error::LookupError,
};

type Calls = Arc<Mutex<Vec<(String, Vec<String>, Option<String>)>>>;

/// Replays canned stdout keyed by the executable's file name.
#[derive(Default, Clone)]
struct FakeTools {
    outputs: HashMap<&'static str, &'static str>,
    calls: Calls,
}

impl FakeTools {
    fn with(mut self, tool: &'static str, stdout: &'static str) -> Self {
        self.outputs.insert(tool, stdout);
        self
    }

    fn invoked(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(tool, _, _)| tool.clone())
            .collect()
    }

    fn call(&self, tool: &str) -> Option<(Vec<String>, Option<String>)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _, _)| name == tool)
            .map(|(_, args, stdin)| (args.clone(), stdin.clone()))
    }
}

#[async_trait]
impl ToolRunner for FakeTools {
    async fn run(&self, program: &Path, args: &[String], stdin: Option<&str>) -> Result<ToolOutput> {
        let tool = program
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        self.calls
            .lock()
            .unwrap()
            .push((tool.clone(), args.to_vec(), stdin.map(str::to_string)));
        match self.outputs.get(tool.as_str()) {
            Some(stdout) => Ok(ToolOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                success: true,
            }),
            None => anyhow::bail!("failed to spawn {tool}"),
        }
    }
}

struct FixedResolver(Ipv4Addr);

struct NoAddresses;

#[async_trait]
impl HostResolver for NoAddresses {
    async fn resolve_ipv4(&self, _host: &str) -> Result<Vec<Ipv4Addr>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl HostResolver for FixedResolver {
    async fn resolve_ipv4(&self, _host: &str) -> Result<Vec<Ipv4Addr>> {
        Ok(vec![self.0])
    }
}

/// Records which stages had a provider built and echoes each query back.
#[derive(Default, Clone)]
struct EchoFactory {
    built: Arc<Mutex<Vec<StageKind>>>,
}

struct Echo {
    stage: StageKind,
    settings: LookupSettings,
}

#[async_trait]
impl EnrichmentProvider for Echo {
    fn stage(&self) -> StageKind {
        self.stage
    }

    fn settings(&self) -> &LookupSettings {
        &self.settings
    }

    fn queries(&self, target: &Target, ips: &[String]) -> Vec<String> {
        match self.stage {
            StageKind::IpEnrichment | StageKind::HostEnrichment => ips.to_vec(),
            _ => target.owned_domains(),
        }
    }

    async fn lookup(&self, query: &str, sink: &mut Vec<Value>) -> Result<(), LookupError> {
        sink.push(json!({ "_ip": query, "org": "Example Org" }));
        Ok(())
    }
}

impl ProviderFactory for EchoFactory {
    fn build(
        &self,
        stage: StageKind,
        capability: &Capability,
    ) -> Result<Box<dyn EnrichmentProvider>> {
        self.built.lock().unwrap().push(stage);
        let mut settings = capability.lookup.clone();
        settings.delay = std::time::Duration::ZERO;
        Ok(Box::new(Echo { stage, settings }))
    }
}

fn tool(name: CapabilityName) -> Capability {
    Capability::tool(name, format!("/opt/bin/{name}"))
}

fn provider(name: CapabilityName, key: &str) -> Capability {
    Capability::provider(name, true, Some(key.to_string()))
}

fn full_toolchain() -> GlobalConfig {
    GlobalConfig::default()
        .with(CapabilityName::Subfinder, tool(CapabilityName::Subfinder))
        .with(CapabilityName::Naabu, tool(CapabilityName::Naabu))
        .with(CapabilityName::Httpx, tool(CapabilityName::Httpx))
        .with(CapabilityName::Nuclei, tool(CapabilityName::Nuclei))
}

fn canned_tools() -> FakeTools {
    FakeTools::default()
        .with("subfinder", "b.acme.com\na.acme.com\n\n")
        .with(
            "naabu",
            "{\"ip\":\"10.0.0.1\",\"port\":443}\n{\"ip\":\"10.0.0.1\",\"port\":3389}\n",
        )
        .with(
            "httpx",
            "{\"url\":\"https://a.acme.com\",\"status_code\":200}\n",
        )
        .with(
            "nuclei",
            "{\"template-id\":\"exposed-panel\",\"host\":\"https://a.acme.com\",\"info\":{\"severity\":\"high\"}}\n",
        )
}

fn orchestrator(
    temp: &Path,
    config: GlobalConfig,
    tools: FakeTools,
    factory: EchoFactory,
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(config),
        Target::new("acme", vec!["acme.com".into()]),
        ArtifactLayout::new(temp, "acme"),
    )
    .with_tools(tools)
    .with_resolver(FixedResolver(Ipv4Addr::new(10, 0, 0, 1)))
    .with_providers(factory)
}

#[tokio::test]
async fn core_stages_thread_artifacts_in_order() {
    let temp = tempfile::tempdir().unwrap();
    let tools = canned_tools();
    let run = orchestrator(temp.path(), full_toolchain(), tools.clone(), EchoFactory::default())
        .run()
        .await;

    assert_eq!(
        run.stages.iter().map(|s| s.stage).collect::<Vec<_>>(),
        StageKind::ORDER.to_vec()
    );
    assert_eq!(run.outcome(StageKind::SubdomainDiscovery), Some(&StageOutcome::ran(2)));
    assert_eq!(run.outcome(StageKind::PortScan), Some(&StageOutcome::ran(2)));
    assert_eq!(run.outcome(StageKind::HttpProbe), Some(&StageOutcome::ran(1)));
    assert_eq!(run.outcome(StageKind::VulnerabilityScan), Some(&StageOutcome::ran(1)));
    assert_eq!(tools.invoked(), vec!["subfinder", "naabu", "httpx", "nuclei"]);

    let layout = ArtifactLayout::new(temp.path(), "acme");
    assert_eq!(
        layout.read(ArtifactKind::Subdomains).unwrap(),
        "a.acme.com\nb.acme.com"
    );
    assert_eq!(layout.read(ArtifactKind::PortScanTargets).unwrap(), "10.0.0.1");

    let (naabu_args, _) = tools.call("naabu").unwrap();
    assert_eq!(
        naabu_args.last().map(String::as_str),
        layout.path(ArtifactKind::PortScanTargets).to_str()
    );
    let (_, httpx_stdin) = tools.call("httpx").unwrap();
    assert_eq!(httpx_stdin.as_deref(), Some("a.acme.com\nb.acme.com"));
    let (_, nuclei_stdin) = tools.call("nuclei").unwrap();
    assert_eq!(nuclei_stdin.as_deref(), Some("https://a.acme.com"));
}

#[tokio::test]
async fn placeholder_credential_skips_without_building_a_provider() {
    let temp = tempfile::tempdir().unwrap();
    let factory = EchoFactory::default();
    let config = full_toolchain()
        .with(
            CapabilityName::Hibp,
            provider(CapabilityName::Hibp, PLACEHOLDER_CREDENTIAL),
        )
        .with(CapabilityName::Ipinfo, provider(CapabilityName::Ipinfo, "tok"));
    let run = orchestrator(temp.path(), config, canned_tools(), factory.clone())
        .run()
        .await;

    assert_eq!(
        run.outcome(StageKind::BreachSearch),
        Some(&StageOutcome::skipped(SkipReason::PlaceholderCredential(
            CapabilityName::Hibp
        )))
    );
    assert_eq!(
        run.outcome(StageKind::CodeLeakSearch),
        Some(&StageOutcome::skipped(SkipReason::NotConfigured(
            CapabilityName::Github
        )))
    );
    assert_eq!(*factory.built.lock().unwrap(), vec![StageKind::IpEnrichment]);

    let layout = ArtifactLayout::new(temp.path(), "acme");
    assert!(!layout.path(ArtifactKind::Breaches).exists());
    let intel = layout.read(ArtifactKind::IpIntel).unwrap();
    assert_eq!(intel, "{\"_ip\":\"10.0.0.1\",\"org\":\"Example Org\"}");
}

#[tokio::test]
async fn skipped_upstream_cascades_to_dependents() {
    let temp = tempfile::tempdir().unwrap();
    let factory = EchoFactory::default();
    let config = GlobalConfig::default()
        .with(CapabilityName::Subfinder, tool(CapabilityName::Subfinder))
        .with(CapabilityName::Httpx, tool(CapabilityName::Httpx))
        .with(CapabilityName::Shodan, provider(CapabilityName::Shodan, "key"));
    let tools = canned_tools();
    let run = orchestrator(temp.path(), config, tools.clone(), factory.clone())
        .run()
        .await;

    assert_eq!(
        run.outcome(StageKind::PortScan),
        Some(&StageOutcome::skipped(SkipReason::NotConfigured(
            CapabilityName::Naabu
        )))
    );
    assert_eq!(
        run.outcome(StageKind::HttpProbe),
        Some(&StageOutcome::skipped(SkipReason::missing_artifact(
            ArtifactKind::PortScan
        )))
    );
    assert_eq!(
        run.outcome(StageKind::HostEnrichment),
        Some(&StageOutcome::skipped(SkipReason::missing_artifact(
            ArtifactKind::PortScan
        )))
    );
    assert_eq!(tools.invoked(), vec!["subfinder"]);
    assert!(factory.built.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stale_upstream_artifact_does_not_unlock_a_stage() {
    let temp = tempfile::tempdir().unwrap();
    let layout = ArtifactLayout::new(temp.path(), "acme");
    layout
        .write(ArtifactKind::PortScan, "{\"ip\":\"10.9.9.9\",\"port\":22}")
        .unwrap();
    let config = GlobalConfig::default()
        .with(CapabilityName::Httpx, tool(CapabilityName::Httpx))
        .with(CapabilityName::Subfinder, tool(CapabilityName::Subfinder));
    let tools = FakeTools::default().with("subfinder", "");
    let run = orchestrator(temp.path(), config, tools.clone(), EchoFactory::default())
        .run()
        .await;

    assert!(matches!(
        run.outcome(StageKind::HttpProbe),
        Some(StageOutcome::Skipped { .. })
    ));
    assert_eq!(tools.invoked(), vec!["subfinder"]);
}

#[tokio::test]
async fn enabled_stage_without_input_empties_its_previous_artifact() {
    let temp = tempfile::tempdir().unwrap();
    let layout = ArtifactLayout::new(temp.path(), "acme");
    layout
        .write(ArtifactKind::PortScan, "{\"ip\":\"10.9.9.9\",\"port\":3389}")
        .unwrap();
    layout
        .write(ArtifactKind::HttpProbe, "{\"url\":\"https://old.acme.com\"}")
        .unwrap();
    layout
        .write(ArtifactKind::HostIntel, "{\"_ip\":\"10.9.9.9\"}")
        .unwrap();
    let run = orchestrator(temp.path(), full_toolchain(), canned_tools(), EchoFactory::default())
        .with_resolver(NoAddresses)
        .run()
        .await;

    assert_eq!(
        run.outcome(StageKind::PortScan),
        Some(&StageOutcome::skipped(SkipReason::NoInput(
            "no IPv4 addresses could be resolved".into()
        )))
    );
    assert_eq!(layout.read(ArtifactKind::PortScan).unwrap(), "");
    assert_eq!(layout.read(ArtifactKind::HttpProbe).unwrap(), "");
    assert_eq!(
        layout.read(ArtifactKind::HostIntel).unwrap(),
        "{\"_ip\":\"10.9.9.9\"}"
    );
    assert!(!layout.path(ArtifactKind::VulnerabilityScan).exists());
}

#[tokio::test]
async fn spawn_failure_is_reported_and_run_continues() {
    let temp = tempfile::tempdir().unwrap();
    let tools = FakeTools::default();
    let config = GlobalConfig::default()
        .with(CapabilityName::Subfinder, tool(CapabilityName::Subfinder))
        .with(CapabilityName::Hibp, provider(CapabilityName::Hibp, "key"));
    let run = orchestrator(temp.path(), config, tools, EchoFactory::default())
        .run()
        .await;

    match run.outcome(StageKind::SubdomainDiscovery) {
        Some(StageOutcome::Failed { detail }) => assert!(detail.contains("subfinder")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(
        run.outcome(StageKind::BreachSearch),
        Some(&StageOutcome::ran(1))
    );
    assert_eq!(run.count_failed(), 1);
    assert_eq!(run.count_ran(), 1);
}

#[tokio::test]
async fn empty_configuration_completes_with_all_skips() {
    let temp = tempfile::tempdir().unwrap();
    let run = orchestrator(
        temp.path(),
        GlobalConfig::default(),
        FakeTools::default(),
        EchoFactory::default(),
    )
    .run()
    .await;

    assert_eq!(run.stages.len(), 8);
    assert_eq!(run.count_skipped(), 8);
    assert!(ArtifactLayout::new(temp.path(), "acme").raw_dir().is_dir());
}

#[test]
fn outcomes_serialize_with_status_tag() {
    let mut report = RunReport::new("acme");
    report.push(
        StageKind::HostEnrichment,
        StageOutcome::skipped(SkipReason::Disabled(CapabilityName::Shodan)),
    );
    report.push(
        StageKind::IpEnrichment,
        StageOutcome::Ran {
            records: 3,
            failed_lookups: 1,
            rate_limited: true,
        },
    );
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(
        value["stages"][0],
        json!({
            "stage": "host_enrichment",
            "status": "skipped",
            "reason": { "kind": "disabled", "detail": "shodan" }
        })
    );
    assert_eq!(value["stages"][1]["rate_limited"], json!(true));
}

#[test]
fn either_enumerator_enables_subdomain_discovery() {
    let amass_only = GlobalConfig::default().with(CapabilityName::Amass, tool(CapabilityName::Amass));
    assert_eq!(stage_enablement(&amass_only, StageKind::SubdomainDiscovery), Ok(()));
    assert_eq!(
        stage_enablement(&GlobalConfig::default(), StageKind::SubdomainDiscovery),
        Err(SkipReason::NotConfigured(CapabilityName::Amass))
    );
    assert_eq!(
        stage_enablement(&amass_only, StageKind::PortScan),
        Err(SkipReason::NotConfigured(CapabilityName::Naabu))
    );
}
