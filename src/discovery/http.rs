use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{DiscoveredItem, DiscoverySource, SearchCriteria, TitleClassifier};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, DiscoveryResult};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<DiscoveredItem>,
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    titles: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    verdicts: Vec<bool>,
}

fn build_client(timeout_ms: u64) -> DiscoveryResult<Client> {
    Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .map_err(DiscoveryError::Http)
}

async fn read_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> DiscoveryResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DiscoveryError::Api {
            status: status.as_u16(),
            message: body,
        });
    }
    response
        .json()
        .await
        .map_err(|e| DiscoveryError::InvalidResponse {
            message: format!("Failed to parse response: {}", e),
        })
}

/// Discovery source backed by the content search HTTP API.
#[derive(Clone)]
pub struct HttpDiscoverySource {
    client: Client,
    base_url: String,
}

impl HttpDiscoverySource {
    /// Create a client for the search API at `config.base_url`.
    pub fn new(config: &DiscoveryConfig) -> DiscoveryResult<Self> {
        Ok(Self {
            client: build_client(config.timeout_ms)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DiscoverySource for HttpDiscoverySource {
    async fn search(&self, criteria: &SearchCriteria) -> DiscoveryResult<Vec<DiscoveredItem>> {
        let url = format!("{}/v1/search", self.base_url);
        debug!(query = %criteria.query, max_results = criteria.max_results, "Searching trending items");

        let max_results = criteria.max_results.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", criteria.query.as_str()),
                ("region", criteria.region.as_str()),
                ("maxResults", max_results.as_str()),
            ])
            .send()
            .await?;

        let body: SearchResponse = read_json(response).await?;
        info!(count = body.items.len(), "Discovery search returned candidates");
        Ok(body.items)
    }
}

/// Title classifier backed by an HTTP endpoint.
#[derive(Clone)]
pub struct HttpTitleClassifier {
    client: Client,
    base_url: String,
}

impl HttpTitleClassifier {
    /// Create a classifier client for `base_url`.
    pub fn new(base_url: &str, timeout_ms: u64) -> DiscoveryResult<Self> {
        Ok(Self {
            client: build_client(timeout_ms)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TitleClassifier for HttpTitleClassifier {
    async fn classify_batch(&self, titles: &[String]) -> DiscoveryResult<Vec<bool>> {
        let url = format!("{}/v1/classify", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&ClassifyRequest { titles })
            .send()
            .await?;

        let body: ClassifyResponse = read_json(response).await?;
        if body.verdicts.len() != titles.len() {
            return Err(DiscoveryError::LengthMismatch {
                expected: titles.len(),
                actual: body.verdicts.len(),
            });
        }
        Ok(body.verdicts)
    }
}
