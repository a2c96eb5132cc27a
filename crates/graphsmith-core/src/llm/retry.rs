//! Bounded retries with exponential backoff for text generation

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{Error, Result};

use super::generator::{FormatHint, TextGenerator};

/// How often and how patiently a service call is retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Retry quickly; handy for tests and offline runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before the next attempt after `attempt` failures
    ///
    /// Exponential in the attempt number, never below a server-suggested wait,
    /// capped at `max_delay`, plus up to 10% jitter.
    pub fn backoff(&self, attempt: u32, suggested_wait: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.base_delay.saturating_mul(1u32 << exponent);
        let delay = base
            .max(suggested_wait.unwrap_or(Duration::ZERO))
            .min(self.max_delay);

        let jitter_ms = (delay.as_millis() / 10) as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Run one service call under this policy
    ///
    /// Transient failures are retried; anything else is returned at once.
    /// The cancellation token is checked after every round-trip and cuts a
    /// backoff wait short.
    pub async fn complete(
        &self,
        generator: &dyn TextGenerator,
        prompt: &str,
        hint: FormatHint,
        cancel: &CancellationToken,
        task_id: &str,
    ) -> Result<String> {
        let mut attempts = 0;

        loop {
            attempts += 1;
            let outcome = generator.complete(prompt, hint).await;

            if cancel.is_cancelled() {
                return Err(Error::Cancelled(task_id.to_string()));
            }

            match outcome {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempts < self.max_attempts => {
                    let suggested = match &e {
                        Error::RateLimited(secs) => Some(Duration::from_secs(*secs)),
                        _ => None,
                    };
                    let wait = self.backoff(attempts, suggested);
                    warn!(
                        task_id = %task_id,
                        hint = %hint,
                        attempt = attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Service call failed, retrying after backoff"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(Error::Cancelled(task_id.to_string()));
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Err(e) if e.is_retryable() => {
                    return Err(Error::RetriesExhausted {
                        attempts,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}
