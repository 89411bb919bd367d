//! Bounded retry with exponential backoff for provider calls

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::provider::ProviderError;

/// Longest single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_base: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff_base,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.attempts, Duration::from_millis(config.backoff_base_ms))
    }

    /// Total attempts, including the first
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Sleep after failed attempt `attempt` (1-based): base, 2x base, 4x base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Run `op` until it succeeds, fails with a non-retriable error, or the
/// attempts run out. Each attempt is bounded by `timeout`.
pub async fn call_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    timeout: Duration,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 1;
    loop {
        let outcome = match tokio::time::timeout(timeout, op(attempt)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt < policy.attempts() => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Provider call failed, retrying: {}",
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
