//! Web search used by research mode.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::config::SearchConfig;
use crate::error::ProviderError;

/// At most this many hits make it into a prompt.
pub const MAX_SEARCH_RESULTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    pub title: String,
    #[serde(alias = "url", alias = "href")]
    pub link: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ProviderError>;
}

/// Used when no search endpoint is configured.
pub struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, ProviderError> {
        Ok(Vec::new())
    }
}

/// GETs `{endpoint}?q=<query>` and reads `{title, link}` items from the JSON body.
pub struct HttpSearch {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpSearch {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            endpoint,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

/// Accepts a bare array, or an object holding the array under `items` or `results`.
fn parse_hits(body: Value) -> Result<Vec<SearchHit>, ProviderError> {
    let list = match body {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => map
            .remove("items")
            .or_else(|| map.remove("results"))
            .ok_or_else(|| ProviderError::Decode("search response has no result list".to_string()))?,
        _ => return Err(ProviderError::Decode("search response is not JSON list or object".to_string())),
    };

    let items = match list {
        Value::Array(items) => items,
        _ => return Err(ProviderError::Decode("search result list is not an array".to_string())),
    };

    // Items missing a title or link are skipped rather than failing the whole search.
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<SearchHit>(item).ok())
        .collect())
}

#[async_trait]
impl SearchProvider for HttpSearch {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ProviderError> {
        let mut request = self.client.get(&self.endpoint).query(&[("q", query)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { provider: "search", status, body });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        parse_hits(body)
    }
}

pub fn from_config(config: &SearchConfig) -> Arc<dyn SearchProvider> {
    if config.endpoint.trim().is_empty() {
        Arc::new(NoSearch)
    } else {
        Arc::new(HttpSearch::new(config.endpoint.clone(), config.resolve_api_key()))
    }
}

/// Run a search for research mode. Failures degrade to no results.
///
/// `limit` is capped at [`MAX_SEARCH_RESULTS`].
pub async fn resolve_search(provider: &dyn SearchProvider, query: &str, limit: usize) -> Vec<SearchHit> {
    match provider.search(query).await {
        Ok(mut hits) => {
            hits.truncate(limit.min(MAX_SEARCH_RESULTS));
            hits
        }
        Err(e) => {
            log::warn!("Search via {} failed, continuing without results: {}", provider.name(), e);
            Vec::new()
        }
    }
}

/// Numbered list used both in prompts and in `search:` replies.
pub fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("{}. {} - {}", i + 1, hit.title, hit.link))
        .collect::<Vec<_>>()
        .join("\n")
}
