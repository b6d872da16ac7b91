use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::types::{CreatePipeRequest, CreatedPipe, PipeRequest, PipeResponse};
use crate::config::LlmConfig;
use crate::error::{LlmError, LlmResult};
use crate::retry::{retry_with_backoff, RetryError, RetryPolicy};

/// Client for the pipe-run LLM API backing the scoring providers.
///
/// A run is retried `max_retries` times after the first attempt, doubling the
/// delay each time. Pipe creation is a single attempt.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    base_url: String,
    api_key: String,
    timeout_ms: u64,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> LlmResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout_ms: config.timeout_ms,
            retry: RetryPolicy::new(
                config.max_retries.saturating_add(1),
                Duration::from_millis(config.retry_delay_ms),
            ),
            cancel: CancellationToken::new(),
        })
    }

    /// Abandon pending retries once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a pipe. `success: false` in the body counts as a failed attempt.
    pub async fn call_pipe(&self, request: PipeRequest) -> LlmResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let started = Instant::now();

        let response = retry_with_backoff(self.retry, &self.cancel, &request.name, |_| {
            self.run_once(&url, &request)
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { last, attempts } => LlmError::Unavailable {
                message: last.to_string(),
                retries: attempts,
            },
            RetryError::Cancelled { last, attempts } => LlmError::Unavailable {
                message: last
                    .map(|e| format!("cancelled after: {}", e))
                    .unwrap_or_else(|| "cancelled".to_string()),
                retries: attempts,
            },
        })?;

        info!(
            pipe = %request.name,
            latency_ms = started.elapsed().as_millis(),
            total_tokens = response.usage().map(|u| u.total_tokens),
            "Pipe run finished"
        );
        Ok(response)
    }

    async fn run_once(&self, url: &str, request: &PipeRequest) -> LlmResult<PipeResponse> {
        debug!(pipe = %request.name, messages = request.messages.len(), "Running pipe");

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let body: PipeResponse = read_body(response).await?;
        if !body.success {
            return Err(LlmError::InvalidResponse {
                message: "pipe reported success=false".to_string(),
            });
        }
        Ok(body)
    }

    /// Create or update a pipe. A 409 means it already exists.
    pub async fn ensure_pipe(&self, request: CreatePipeRequest) -> LlmResult<()> {
        let response = self
            .http
            .post(format!("{}/v1/pipes", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        if response.status() == StatusCode::CONFLICT {
            info!(pipe = %request.name, "Pipe already exists");
            return Ok(());
        }

        let created: CreatedPipe = read_body(response).await?;
        info!(pipe = %created.name, model = %request.model, "Pipe ready");
        Ok(())
    }

    fn send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                timeout_ms: self.timeout_ms,
            }
        } else {
            LlmError::Http(e)
        }
    }
}

async fn read_body<T: DeserializeOwned>(response: reqwest::Response) -> LlmResult<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(LlmError::Api {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        });
    }
    response.json().await.map_err(|e| LlmError::InvalidResponse {
        message: format!("Failed to parse response: {}", e),
    })
}
