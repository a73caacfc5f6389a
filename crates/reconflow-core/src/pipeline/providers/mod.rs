use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

use super::StageKind;
use crate::{
    config::{Capability, LookupSettings},
    error::LookupError,
    model::Target,
};

pub mod github;
pub mod hibp;
pub mod ipinfo;
pub mod shodan;

pub use github::GithubCodeSearch;
pub use hibp::HibpBreaches;
pub use ipinfo::IpInfo;
pub use shodan::ShodanHosts;

const USER_AGENT: &str = concat!("reconflow/", env!("CARGO_PKG_VERSION"));

/// Outbound lookup source backing one enrichment stage.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    fn stage(&self) -> StageKind;

    fn settings(&self) -> &LookupSettings;

    /// Lookup keys for this run: owned domains, search terms or port-scan IPs.
    fn queries(&self, target: &Target, ips: &[String]) -> Vec<String>;

    /// Perform one lookup, appending artifact records to `sink` as they arrive.
    /// Records pushed before an error are kept.
    async fn lookup(&self, query: &str, sink: &mut Vec<Value>) -> Result<(), LookupError>;
}

/// Builds providers for stages that passed the enablement check.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, stage: StageKind, capability: &Capability) -> Result<Box<dyn EnrichmentProvider>>;
}

/// Factory for the real HTTP-backed providers.
#[derive(Debug, Default, Clone)]
pub struct HttpProviderFactory;

impl ProviderFactory for HttpProviderFactory {
    fn build(&self, stage: StageKind, capability: &Capability) -> Result<Box<dyn EnrichmentProvider>> {
        let provider: Box<dyn EnrichmentProvider> = match stage {
            StageKind::BreachSearch => Box::new(HibpBreaches::new(capability)?),
            StageKind::CodeLeakSearch => Box::new(GithubCodeSearch::new(capability)?),
            StageKind::IpEnrichment => Box::new(IpInfo::new(capability)?),
            StageKind::HostEnrichment => Box::new(ShodanHosts::new(capability)?),
            other => anyhow::bail!("stage `{other}` is not an enrichment stage"),
        };
        Ok(provider)
    }
}

pub(crate) fn http_client(settings: &LookupSettings, provider: &str) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(settings.timeout)
        .build()
        .with_context(|| format!("failed to build {provider} HTTP client"))
}

pub(crate) fn base_url(settings: &LookupSettings, default: &str) -> String {
    settings
        .base_url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

pub(crate) fn credential(capability: &Capability) -> Result<String> {
    capability
        .credential
        .clone()
        .context("enabled provider has no credential")
}

/// Map throttling statuses to [`LookupError::RateLimited`] and other non-2xx
/// statuses to [`LookupError::Transient`].
pub(crate) async fn check_status(response: Response, throttle: &[StatusCode]) -> Result<Response, LookupError> {
    let status = response.status();
    if throttle.contains(&status) {
        return Err(LookupError::RateLimited {
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LookupError::Transient(format!(
            "unexpected status {status}: {}",
            body.chars().take(200).collect::<String>()
        )));
    }
    Ok(response)
}

pub(crate) async fn json_body(response: Response) -> Result<Value, LookupError> {
    response
        .json::<Value>()
        .await
        .map_err(|err| LookupError::Transient(format!("invalid JSON body: {err}")))
}
