use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::{base_url, check_status, credential, http_client, json_body, EnrichmentProvider};
use crate::{
    config::{Capability, LookupSettings},
    error::LookupError,
    model::Target,
    pipeline::StageKind,
};

const DEFAULT_BASE: &str = "https://ipinfo.io";

/// IP ownership/geolocation lookups for every port-scan IP.
pub struct IpInfo {
    http: Client,
    base: String,
    token: String,
    settings: LookupSettings,
}

impl IpInfo {
    pub fn new(capability: &Capability) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(&capability.lookup, "ipinfo")?,
            base: base_url(&capability.lookup, DEFAULT_BASE),
            token: credential(capability)?,
            settings: capability.lookup.clone(),
        })
    }
}

#[async_trait]
impl EnrichmentProvider for IpInfo {
    fn stage(&self) -> StageKind {
        StageKind::IpEnrichment
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
            .get(format!("{}/{ip}/json", self.base))
            .query(&[("token", &self.token)])
            .send()
            .await?;
        let response = check_status(response, &[StatusCode::TOO_MANY_REQUESTS]).await?;
        let mut data = json_body(response).await?;
        match &mut data {
            Value::Object(map) => {
                map.insert("_ip".into(), Value::from(ip));
                sink.push(data);
                Ok(())
            }
            _ => Err(LookupError::Transient("expected a JSON object".into())),
        }
    }
}
