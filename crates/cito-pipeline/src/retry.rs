//! Retry logic with configurable backoff policies for transformer calls.

use std::future::Future;
use std::time::Duration;

use cito_types::{CitoError, Result};

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = base.as_millis() as u64 * 2u64.saturating_pow(attempt as u32);
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }

    /// Delay before the next attempt, stretched to honour a provider's
    /// `retry_after` hint.
    fn delay_after(&self, attempt: usize, err: &CitoError) -> Duration {
        let base = self.delay_for_attempt(attempt);
        match err {
            CitoError::RateLimited { retry_after_ms, .. } => {
                base.max(Duration::from_millis(*retry_after_ms))
            }
            _ => base,
        }
    }
}

impl Default for BackoffPolicy {
    /// 1s, 2s, 4s, then 8s.
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(8),
        }
    }
}

/// Run `f` up to `attempts` times (at least once).
///
/// An attempt that exceeds `timeout` counts as a [`CitoError::RequestTimeout`].
/// Only errors satisfying [`CitoError::is_retryable`] are retried; anything
/// else is returned immediately. `on_retry` observes each error that is about
/// to be retried, with the 1-based number of the failed attempt.
pub async fn execute_with_retry<T, F, Fut, R>(
    f: F,
    attempts: usize,
    policy: &BackoffPolicy,
    timeout: Option<Duration>,
    label: &str,
    on_retry: R,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(usize, &CitoError),
{
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, f()).await {
                Ok(result) => result,
                Err(_) => Err(CitoError::RequestTimeout {
                    provider: label.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => f().await,
        };
        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = policy.delay_after(attempt, &e);
                tracing::warn!(
                    stage = %label,
                    attempt = attempt + 1,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Retryable error, retrying"
                );
                on_retry(attempt + 1, &e);
                last_err = Some(e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| CitoError::RetriesExhausted {
        stage: label.to_string(),
        attempts,
    }))
}
