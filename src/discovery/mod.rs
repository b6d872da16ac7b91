//! Content-discovery and title-classifier collaborators.
//!
//! Discovery returns ranked candidates from the external content search API.
//! The classifier narrows them to the approved topical subset. Both sit behind
//! traits so the refresher can run against HTTP clients or test doubles.

mod http;

pub use http::{HttpDiscoverySource, HttpTitleClassifier};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::DiscoveryResult;

/// Search parameters passed to the discovery source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub query: String,
    pub region: String,
    #[serde(rename = "maxResults")]
    pub max_results: usize,
}

/// One ranked candidate returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

impl DiscoveredItem {
    /// Create a candidate with no thumbnail or channel.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            thumbnail_url: None,
            channel_id: None,
        }
    }

    /// Set the thumbnail URL
    pub fn with_thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }
}

/// Ranked content search.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Return candidates in rank order.
    async fn search(&self, criteria: &SearchCriteria) -> DiscoveryResult<Vec<DiscoveredItem>>;
}

/// Topical title classifier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TitleClassifier: Send + Sync {
    /// One verdict per title, same length and order as the input.
    async fn classify_batch(&self, titles: &[String]) -> DiscoveryResult<Vec<bool>>;
}

/// Keep the candidates the classifier approves, preserving rank order.
///
/// Without a classifier every candidate is approved. A classifier error or a
/// verdict list of the wrong length rejects everything.
pub async fn approve_candidates(
    classifier: Option<&Arc<dyn TitleClassifier>>,
    candidates: Vec<DiscoveredItem>,
) -> Vec<DiscoveredItem> {
    let Some(classifier) = classifier else {
        return candidates;
    };
    if candidates.is_empty() {
        return candidates;
    }

    let titles: Vec<String> = candidates.iter().map(|c| c.title.clone()).collect();
    let verdicts = match classifier.classify_batch(&titles).await {
        Ok(v) if v.len() == titles.len() => v,
        Ok(v) => {
            warn!(
                expected = titles.len(),
                actual = v.len(),
                "Classifier verdict count mismatch, rejecting all candidates"
            );
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "Classifier failed, rejecting all candidates");
            return Vec::new();
        }
    };

    candidates
        .into_iter()
        .zip(verdicts)
        .filter_map(|(item, approved)| approved.then_some(item))
        .collect()
}
