use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{base_url, check_status, credential, http_client, EnrichmentProvider};
use crate::{
    config::{Capability, LookupSettings},
    error::LookupError,
    model::Target,
    pipeline::StageKind,
};

const DEFAULT_BASE: &str = "https://api.github.com";
const PER_PAGE: usize = 50;
const MAX_PAGES: usize = 3;

/// Code search for the target name and owned domains.
pub struct GithubCodeSearch {
    http: Client,
    base: String,
    token: String,
    settings: LookupSettings,
}

impl GithubCodeSearch {
    pub fn new(capability: &Capability) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(&capability.lookup, "GitHub")?,
            base: base_url(&capability.lookup, DEFAULT_BASE),
            token: credential(capability)?,
            settings: capability.lookup.clone(),
        })
    }

    async fn page(&self, query: &str, page: usize) -> Result<Vec<SearchItem>, LookupError> {
        let response = self
            .http
            .get(format!("{}/search/code", self.base))
            .query(&[
                ("q", query.to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ])
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;
        let response = check_status(
            response,
            &[StatusCode::FORBIDDEN, StatusCode::TOO_MANY_REQUESTS],
        )
        .await?;
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|err| LookupError::Transient(format!("invalid search response: {err}")))?;
        Ok(body.items)
    }
}

#[async_trait]
impl EnrichmentProvider for GithubCodeSearch {
    fn stage(&self) -> StageKind {
        StageKind::CodeLeakSearch
    }

    fn settings(&self) -> &LookupSettings {
        &self.settings
    }

    fn queries(&self, target: &Target, _ips: &[String]) -> Vec<String> {
        let mut terms = BTreeSet::new();
        if !target.name.trim().is_empty() {
            terms.insert(format!("\"{}\"", target.name.trim()));
        }
        for domain in target.owned_domains() {
            terms.insert(format!("\"{domain}\""));
        }
        terms.into_iter().collect()
    }

    async fn lookup(&self, query: &str, sink: &mut Vec<Value>) -> Result<(), LookupError> {
        for page in 1..=MAX_PAGES {
            let items = self.page(query, page).await?;
            let short_page = items.len() < PER_PAGE;
            for item in items {
                sink.push(item.into_record(query));
            }
            if short_page {
                break;
            }
            if !self.settings.delay.is_zero() {
                tokio::time::sleep(self.settings.delay).await;
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    name: Option<String>,
    path: Option<String>,
    html_url: Option<String>,
    score: Option<f64>,
    repository: Option<Repository>,
}

#[derive(Deserialize)]
struct Repository {
    full_name: Option<String>,
}

impl SearchItem {
    fn into_record(self, query: &str) -> Value {
        json!({
            "query": query,
            "name": self.name,
            "path": self.path,
            "repo_full_name": self.repository.and_then(|repo| repo.full_name),
            "html_url": self.html_url,
            "score": self.score,
        })
    }
}
