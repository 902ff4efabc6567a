//! Bounded retry with exponential backoff

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};

use crate::ports::chain::ChainError;
use crate::ports::exchange::ExchangeError;

/// Errors that know whether another attempt may succeed
pub trait Retryable: Display {
    fn is_retryable(&self) -> bool;

    /// Server-provided wait hint, overrides the computed backoff up to
    /// `max_backoff`
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for ExchangeError {
    fn is_retryable(&self) -> bool {
        ExchangeError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        ExchangeError::retry_after(self)
    }
}

impl Retryable for ChainError {
    fn is_retryable(&self) -> bool {
        ChainError::is_retryable(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2,
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` is reached. The last error is returned.
    pub async fn run<F, Fut, T, E>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_attempts.max(1) => {
                    tracing::warn!(operation, attempts = attempt, error = %e, "Retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = e
                        .retry_after()
                        .unwrap_or_else(|| self.backoff(attempt))
                        .min(self.max_backoff);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after backoff"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Run `fut` to completion, or until `deadline` passes. `None` means no
/// deadline.
pub async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
        assert_eq!(policy.backoff(10), Duration::from_secs(8));
        assert_eq!(policy.backoff(64), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limit_then_succeeds() {
        let attempts = &AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<u32, ExchangeError> = RetryPolicy::default()
            .run("fetch", move || async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ExchangeError::RateLimited { retry_after: None })
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        // 500ms + 1s of backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1500) && elapsed < Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let attempts = &AtomicU32::new(0);
        let result: Result<(), ExchangeError> = RetryPolicy::default()
            .run("fetch", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::Transport("reset".into()))
            })
            .await;

        assert!(matches!(result, Err(ExchangeError::Transport(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_does_not_retry_not_listed() {
        let attempts = &AtomicU32::new(0);
        let result: Result<(), ExchangeError> = RetryPolicy::default()
            .run("fetch", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::NotListed("PRIMEUSDT".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_honors_retry_after() {
        let attempts = &AtomicU32::new(0);
        let started = Instant::now();
        let _: Result<(), ExchangeError> = RetryPolicy::default()
            .run("fetch", move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ExchangeError::RateLimited { retry_after: Some(Duration::from_secs(5)) })
                } else {
                    Ok(())
                }
            })
            .await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_millis(5100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_capped_by_max_backoff() {
        let attempts = &AtomicU32::new(0);
        let started = Instant::now();
        let result: Result<(), ExchangeError> = RetryPolicy::default()
            .run("fetch", move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ExchangeError::RateLimited { retry_after: Some(Duration::from_secs(86_400)) })
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(8) && elapsed < Duration::from_millis(8100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_deadline() {
        let deadline = Instant::now() + Duration::from_secs(1);

        assert_eq!(within(Some(deadline), async { 7 }).await, Some(7));
        assert_eq!(within(Some(deadline), sleep(Duration::from_secs(2))).await, None);
        assert_eq!(within(None, sleep(Duration::from_secs(2))).await, Some(()));
    }

    #[tokio::test]
    async fn test_result_limit_is_not_retried() {
        let attempts = &AtomicU32::new(0);
        let result: Result<(), ChainError> = RetryPolicy { initial_backoff: Duration::ZERO, ..RetryPolicy::default() }
            .run("eth_getLogs", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ChainError::ResultLimit("query returned more than 10000 results".into()))
            })
            .await;

        assert!(matches!(result, Err(ChainError::ResultLimit(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chain_errors_use_same_policy() {
        let attempts = &AtomicU32::new(0);
        let result: Result<(), ChainError> = RetryPolicy { initial_backoff: Duration::ZERO, ..RetryPolicy::default() }
            .run("eth_getLogs", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ChainError::RateLimited)
            })
            .await;

        assert_eq!(result, Err(ChainError::RateLimited));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
