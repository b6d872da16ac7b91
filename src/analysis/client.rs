use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::{AnalysisConfig, RequestConfig};
use crate::error::{AnalysisError, AnalysisResult};

/// Header carrying the subject id so the service can deduplicate retries.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
/// Header identifying this caller to the service.
pub const CALLER_HEADER: &str = "X-Caller-Id";

/// Successful analysis response.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReply {
    /// Parsed body, always a JSON object.
    pub body: Value,
    /// Body as received.
    pub raw: String,
}

/// One attempt at the external analysis call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Analyze `subject_url`, deduplicated downstream by `subject_id`.
    async fn analyze(&self, subject_id: &str, subject_url: &str) -> AnalysisResult<AnalysisReply>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    subject_url: &'a str,
}

/// HTTP client for the analysis service.
///
/// Connect timeout is short; the overall request timeout covers the slow
/// analysis itself.
#[derive(Debug, Clone)]
pub struct HttpAnalysisClient {
    client: Client,
    endpoint: String,
    caller_id: String,
    read_timeout_ms: u64,
}

impl HttpAnalysisClient {
    pub fn new(config: &AnalysisConfig, request: &RequestConfig) -> AnalysisResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(request.connect_timeout_ms))
            .timeout(Duration::from_millis(request.read_timeout_ms))
            .build()
            .map_err(AnalysisError::Http)?;

        Ok(Self {
            client,
            endpoint: format!("{}/analyze", config.base_url.trim_end_matches('/')),
            caller_id: config.caller_id.clone(),
            read_timeout_ms: request.read_timeout_ms,
        })
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisClient {
    async fn analyze(&self, subject_id: &str, subject_url: &str) -> AnalysisResult<AnalysisReply> {
        debug!(subject_id, subject_url, "Requesting analysis");
        let start = Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .header(IDEMPOTENCY_HEADER, subject_id)
            .header(CALLER_HEADER, &self.caller_id)
            .json(&AnalyzeRequest { subject_url })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout {
                        timeout_ms: self.read_timeout_ms,
                    }
                } else {
                    AnalysisError::Http(e)
                }
            })?;

        let status = response.status();
        let raw = response.text().await.map_err(AnalysisError::Http)?;

        if !status.is_success() {
            return Err(AnalysisError::Api {
                status: status.as_u16(),
                message: raw,
            });
        }

        let body: Value = serde_json::from_str(&raw).map_err(|e| AnalysisError::InvalidResponse {
            message: format!("Failed to parse response: {}", e),
        })?;
        if !body.is_object() {
            return Err(AnalysisError::InvalidResponse {
                message: "response body is not a JSON object".to_string(),
            });
        }

        info!(
            subject_id,
            latency_ms = start.elapsed().as_millis(),
            "Analysis call succeeded"
        );
        Ok(AnalysisReply { body, raw })
    }
}
