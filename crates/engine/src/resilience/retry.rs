//! Retry with linear backoff, timeout racing and fallback execution.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first; at least one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
        }
    }

    /// Sleep before retry number `retry` (1-based): `base_delay * retry`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Retries ran out. Carries the number of attempts made and the final error.
#[derive(Debug)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: EngineError,
}

/// Race `fut` against `timeout`; expiry yields [`EngineError::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, timeout: Duration, fut: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Run `op` up to `policy.max_attempts` times, each attempt inside its own
/// timeout race, sleeping `base_delay * n` between attempts. Errors that are
/// not [`EngineError::is_retryable`] end the loop immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match with_timeout(operation, policy.attempt_timeout, op(attempt)).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                let retryable = e.is_retryable();
                if !retryable || attempt >= max_attempts {
                    warn!(
                        operation,
                        attempt,
                        retryable,
                        error = %e,
                        "giving up"
                    );
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Await `fut`, logging and substituting `fallback` on error.
pub async fn safe_execute<T, E, F>(context: &str, fallback: T, fut: F) -> T
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match fut.await {
        Ok(value) => value,
        Err(e) => {
            warn!(context, error = %e, "operation failed, using fallback");
            fallback
        }
    }
}
