//! Retry with exponential backoff for transient failures.
//!
//! Only errors whose kind is `Transient` are retried. Everything else
//! surfaces on the first attempt with its kind intact.

use std::{future::Future, time::Duration};

use agent_bridge_core::{BridgeError, config::RetryConfig};
use rand::Rng;

/// Backoff schedule derived from `RetryConfig`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
}

impl RetryPolicy {
    /// Total attempts, at least one.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retrying after the given attempt (1-indexed).
    ///
    /// `base * 2^(attempt-1)`, capped at `max_delay`, then spread by
    /// `±jitter` so concurrent callers do not retry in lockstep.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let capped = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);

        if self.jitter <= 0.0 || capped.is_zero() {
            return capped;
        }
        let factor = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        capped.mul_f64((1.0 + factor).max(0.0))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Run `operation` until it succeeds, fails non-transiently, or the attempt
/// budget is spent. The closure receives the 1-indexed attempt number.
///
/// # Errors
/// Returns the first non-retryable error, or the last transient error
/// annotated with the number of attempts made.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt_fn: F,
) -> Result<T, BridgeError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BridgeError>>,
{
    let mut attempt = 1;
    loop {
        match attempt_fn(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "Request succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    ?delay,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err.after_attempts(attempt)),
        }
    }
}
