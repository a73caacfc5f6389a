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

const DEFAULT_BASE: &str = "https://haveibeenpwned.com";

/// Breach search by owned domain.
pub struct HibpBreaches {
    http: Client,
    base: String,
    api_key: String,
    settings: LookupSettings,
}

impl HibpBreaches {
    pub fn new(capability: &Capability) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(&capability.lookup, "HIBP")?,
            base: base_url(&capability.lookup, DEFAULT_BASE),
            api_key: credential(capability)?,
            settings: capability.lookup.clone(),
        })
    }
}

#[async_trait]
impl EnrichmentProvider for HibpBreaches {
    fn stage(&self) -> StageKind {
        StageKind::BreachSearch
    }

    fn settings(&self) -> &LookupSettings {
        &self.settings
    }

    fn queries(&self, target: &Target, _ips: &[String]) -> Vec<String> {
        target.owned_domains()
    }

    async fn lookup(&self, domain: &str, sink: &mut Vec<Value>) -> Result<(), LookupError> {
        let response = self
            .http
            .get(format!("{}/api/v3/breaches", self.base))
            .query(&[("domain", domain)])
            .header("hibp-api-key", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let response = check_status(response, &[StatusCode::TOO_MANY_REQUESTS]).await?;
        match json_body(response).await? {
            Value::Array(items) => {
                for item in items {
                    sink.push(tag_domain(item, domain));
                }
                Ok(())
            }
            other => Err(LookupError::Transient(format!(
                "expected a JSON array of breaches, got {}",
                kind_of(&other)
            ))),
        }
    }
}

fn tag_domain(mut item: Value, domain: &str) -> Value {
    if let Value::Object(map) = &mut item {
        map.insert("_queried_domain".into(), Value::from(domain));
    }
    item
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
