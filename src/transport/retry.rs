//! Exponential backoff for credential acquisition and transport connect.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::{IotError, Result};

/// Exponential backoff with random jitter.
///
/// `delay(i) = clamp(2^i * base + rand(0..jitter), base, max)` for
/// `i < max_attempts`, and `None` once the retry budget is spent. Without
/// jitter the sequence is non-decreasing and never exceeds `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_attempts: u32,
    /// Base delay
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Random jitter range
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter, mostly for tests and tight loops.
    pub fn fixed(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based), `None` when exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let base = duration_ms(self.base_delay);
        let max = duration_ms(self.max_delay).max(base);
        let exp = base.saturating_mul(1u64 << attempt.min(63));

        let jitter = duration_ms(self.jitter);
        let jitter = if jitter > 0 {
            rand::thread_rng().gen_range(0..jitter)
        } else {
            0
        };

        Some(Duration::from_millis(
            exp.saturating_add(jitter).clamp(base, max),
        ))
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Run `op` until it succeeds, sleeping per `policy` between attempts.
///
/// Client errors ([`IotError::is_client_error`]) are returned immediately.
/// Transient errors are retried until the budget is spent, then wrapped
/// in [`IotError::RetriesExhausted`].
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff_while(policy, operation, || true, op).await
}

/// Like [`retry_with_backoff`], but stops after a failed attempt once
/// `keep_going` returns `false`. A sleep already in progress completes first.
pub async fn retry_with_backoff_while<T, F, Fut, C>(
    policy: &RetryPolicy,
    operation: &'static str,
    keep_going: C,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn() -> bool,
{
    let mut attempt = 0u32;
    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if err.is_client_error() {
            tracing::error!(operation, attempt, error = %err, "not retrying client error");
            return Err(err);
        }

        let delay = if keep_going() {
            policy.delay(attempt)
        } else {
            None
        };

        match delay {
            Some(delay) => {
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = duration_ms(delay),
                    error = %err,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            None => {
                return Err(IotError::RetriesExhausted {
                    operation,
                    attempts: attempt + 1,
                    source: Box::new(err),
                });
            },
        }
    }
}
