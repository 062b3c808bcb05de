use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::runtime::check_status;
use super::WebSearch;
use crate::error::{Error, Result};

/// Web search through a SearXNG instance's JSON API.
pub struct SearxSearch {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

impl SearxSearch {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let resp = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .map_err(|e| Error::SearchUnavailable(e.to_string()))?;
        let parsed: SearxResponse = check_status(resp)
            .await
            .map_err(|e| Error::SearchUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::SearchUnavailable(e.to_string()))?;

        Ok(parsed.results.into_iter().take(max_results).collect())
    }
}

#[async_trait]
impl WebSearch for SearxSearch {
    async fn search(&self, query: &str, max_results: usize) -> String {
        info!("Searching the web for: '{}'", query);
        match self.fetch(query, max_results).await {
            Ok(hits) if hits.is_empty() => {
                info!("No web results for '{}'", query);
                String::new()
            }
            Ok(hits) => format_context(&hits),
            Err(e) => {
                warn!("Web search failed: {}", e);
                String::new()
            }
        }
    }
}

/// Numbered `title: snippet` lines under a fixed header.
pub fn format_context(hits: &[SearchHit]) -> String {
    let mut formatted = String::from("CURRENT WEB CONTEXT:\n");
    for (i, hit) in hits.iter().enumerate() {
        formatted.push_str(&format!("{}. {}: {}\n", i + 1, hit.title, hit.content));
    }
    formatted
}
