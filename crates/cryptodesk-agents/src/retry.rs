use std::future::Future;
use std::time::Duration;

use cryptodesk_models::RetryConfig;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{AgentError, CollaboratorError};

/// Bounded exponential backoff applied to every collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier,
        }
    }
}

impl RetryPolicy {
    /// Retry without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay after the `attempt`-th failure (1-indexed).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `on_retry` is called before each backoff sleep
    /// with the failed attempt number, its error and the delay.
    pub async fn run<T, F, Fut, R>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut on_retry: R,
        mut op: F,
    ) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
        R: FnMut(u32, &CollaboratorError, Duration),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(AgentError::Collaborator(err));
            }
            if attempt >= self.max_attempts {
                return Err(AgentError::RetriesExhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.backoff_for(attempt);
            debug!(label, attempt, error = %err, delay_ms = delay.as_millis() as u64, "Retrying");
            on_retry(attempt, &err, delay);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
