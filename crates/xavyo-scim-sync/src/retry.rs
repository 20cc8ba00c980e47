//! Transport-level retry with exponential backoff.
//!
//! Only idempotent requests are retried. A retried POST could create a second
//! remote resource and a retried PATCH could apply a membership delta twice,
//! so both go out exactly once and their failures surface to the caller.

use crate::error::{ScimClientError, ScimClientResult};
use reqwest::Method;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay, including `Retry-After`.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Whether requests with this method may be retried at all.
    #[must_use]
    pub fn applies_to(method: &Method) -> bool {
        matches!(*method, Method::GET | Method::PUT | Method::DELETE)
    }

    /// Whether `error` on attempt `attempt` (0-based) warrants another try.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, error: &ScimClientError) -> bool {
        attempt < self.max_retries && (error.is_retryable() || error.is_server_error())
    }

    /// Backoff before retry number `attempt + 1`. A `Retry-After` hint from
    /// the target wins over the exponential schedule.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &ScimClientError) -> Duration {
        let delay = match error {
            ScimClientError::RateLimited {
                retry_after_secs: Some(secs),
            } => Duration::from_secs(*secs),
            _ => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt)),
        };
        delay.min(self.max_delay)
    }

    /// Run `f` until it succeeds, fails permanently, or the budget is spent.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> ScimClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ScimClientResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let error = match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempts = attempt + 1, "Succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !self.should_retry(attempt, &error) {
                let transient = error.is_retryable() || error.is_server_error();
                if transient && self.max_retries > 0 {
                    warn!(operation, attempts = attempt + 1, error = %error, "Max retries exceeded");
                    return Err(ScimClientError::MaxRetriesExceeded {
                        attempts: attempt + 1,
                        message: format!("{operation}: {error}"),
                    });
                }
                return Err(error);
            }

            let delay = self.delay_for(attempt, &error);
            debug!(
                operation,
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Retrying after transient error"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
