use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use super::{base_url, check_status, credential, http_client, json_body, EnrichmentProvider};
use crate::{
    config::{Capability, LookupSettings},
    error::LookupError,
    model::Target,
    pipeline::StageKind,
};

const DEFAULT_BASE: &str = "https://api.shodan.io";

/// Host intelligence (exposed services, tags, known CVEs) per port-scan IP.
pub struct ShodanHosts {
    http: Client,
    base: String,
    api_key: String,
    settings: LookupSettings,
}

impl ShodanHosts {
    pub fn new(capability: &Capability) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(&capability.lookup, "Shodan")?,
            base: base_url(&capability.lookup, DEFAULT_BASE),
            api_key: credential(capability)?,
            settings: capability.lookup.clone(),
        })
    }
}

#[async_trait]
impl EnrichmentProvider for ShodanHosts {
    fn stage(&self) -> StageKind {
        StageKind::HostEnrichment
    }

    fn settings(&self) -> &LookupSettings {
        &self.settings
    }

    fn queries(&self, _target: &Target, ips: &[String]) -> Vec<String> {
        ips.to_vec()
    }

    async fn lookup(&self, ip: &str, sink: &mut Vec<Value>) -> Result<(), LookupError> {
        let response = self
            .http
            .get(format!("{}/shodan/host/{ip}", self.base))
            .query(&[("key", &self.api_key)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(%ip, "no host data indexed");
            return Ok(());
        }
        let response = check_status(response, &[StatusCode::TOO_MANY_REQUESTS]).await?;
        let data = json_body(response).await?;
        sink.push(summarize(ip, data));
        Ok(())
    }
}

/// Reduce a raw host document to the artifact shape, keeping the original under `data_raw`.
fn summarize(ip: &str, data: Value) -> Value {
    let org = data
        .get("org")
        .filter(|v| !v.is_null())
        .or_else(|| data.get("isp"))
        .cloned()
        .unwrap_or(Value::Null);
    let vuln_ids: Vec<String> = match data.get("vulns") {
        Some(Value::Object(vulns)) => vulns.keys().cloned().collect(),
        _ => Vec::new(),
    };
    json!({
        "_ip": ip,
        "org": org,
        "ports": data.get("ports").cloned().unwrap_or_else(|| json!([])),
        "tags": data.get("tags").cloned().unwrap_or_else(|| json!([])),
        "vuln_ids": vuln_ids,
        "data_raw": data,
    })
}
