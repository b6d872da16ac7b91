//! Bounded retry with exponential backoff and cooperative cancellation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RequestConfig;

/// Attempt cap and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` is at least 1.
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    /// Delay after failed attempt `attempt` (1-based): initial, 2x, 4x, ...
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200))
    }
}

impl From<&RequestConfig> for RetryPolicy {
    fn from(config: &RequestConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
        )
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; `last` is the final error.
    Exhausted { last: E, attempts: u32 },
    /// Cancellation was requested before the attempts ran out.
    Cancelled { last: Option<E>, attempts: u32 },
}

impl<E> RetryError<E> {
    /// Number of attempts actually made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Run `operation` until it succeeds, the policy's attempts run out, or
/// `cancel` fires.
///
/// Cancellation is checked before each attempt and raced against each backoff
/// sleep; a cancelled sleep ends the loop immediately.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let total = policy.max_attempts;
    let mut last_error: Option<E> = None;

    for attempt in 1..=total {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled {
                last: last_error,
                attempts: attempt - 1,
            });
        }

        match operation(attempt).await {
            Ok(value) => {
                info!(target_id = %label, attempt, total, "Attempt succeeded");
                return Ok(value);
            }
            Err(e) => {
                warn!(target_id = %label, attempt, total, error = %e, "Attempt failed");
                last_error = Some(e);
            }
        }

        if attempt < total {
            let delay = policy.backoff_after(attempt);
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(target_id = %label, attempt, total, "Backoff interrupted by cancellation");
                    return Err(RetryError::Cancelled {
                        last: last_error,
                        attempts: attempt,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    match last_error {
        Some(last) => Err(RetryError::Exhausted {
            last,
            attempts: total,
        }),
        None => Err(RetryError::Cancelled {
            last: None,
            attempts: total,
        }),
    }
}
