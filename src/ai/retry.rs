//! Bounded retry with exponential backoff and a per-attempt timeout.
//!
//! Every call to an external service (completion, embedding) goes through
//! [`with_retry`]. A stalled attempt is abandoned after `timeout` and counts
//! as a failure.

use std::future::Future;
use std::time::Duration;

/// Retry configuration for one external call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy with no delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay before retry number `attempt` (1-based, counting the failed attempt).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Final failure after all attempts were spent.
#[derive(Debug, thiserror::Error)]
#[error("{label} failed after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted {
    pub label: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Run `op` until it succeeds or the policy is exhausted.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last_error = format!("{e:#}"),
            Err(_) => last_error = format!("timed out after {:?}", policy.timeout),
        }

        if attempt < attempts {
            let delay = policy.delay_for(attempt);
            tracing::warn!(
                "[llm] {} attempt {}/{} failed: {}; retrying in {:?}",
                label,
                attempt,
                attempts,
                last_error,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    tracing::error!("[llm] {} gave up after {} attempt(s): {}", label, attempts, last_error);
    Err(RetryExhausted {
        label: label.to_string(),
        attempts,
        last_error,
    })
}
