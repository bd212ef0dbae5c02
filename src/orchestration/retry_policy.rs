//! # Retry Policy
//!
//! Bounded exponential backoff around single store writes. Only errors for
//! which [`is_retryable`](crate::error::HarvesterError::is_retryable) holds
//! are retried; anything else is deterministic and returned immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay before retry number `attempt` (0-based): base * multiplier^attempt,
    /// capped at the configured maximum, then jittered
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self.config.base_delay_ms as f64
            * self.config.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let mut delay_ms = exponential.min(self.config.max_delay_ms as f64) as u64;

        if self.config.jitter_enabled {
            delay_ms = self.apply_jitter(delay_ms);
        }
        Duration::from_millis(delay_ms)
    }

    fn apply_jitter(&self, delay_ms: u64) -> u64 {
        let jitter_range = (delay_ms as f64 * self.config.max_jitter) as u64;
        if jitter_range == 0 {
            return delay_ms;
        }

        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(0..=jitter_range);
        if rng.gen_bool(0.5) {
            delay_ms.saturating_add(jitter)
        } else {
            delay_ms.saturating_sub(jitter)
        }
    }

    /// Run `operation` until it succeeds, fails permanently or runs out of
    /// attempts. The last error is returned on exhaustion.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt + 1 < self.config.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Store write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarvesterError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 4,
            multiplier: 2.0,
            jitter_enabled: false,
            max_jitter: 0.0,
        })
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy = policy(5);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(4));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 1_000,
            jitter_enabled: true,
            max_jitter: 0.1,
            ..RetryConfig::default()
        });
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0).as_millis();
            assert!((900..=1_100).contains(&delay));
        }
    }

    #[tokio::test]
    async fn test_retryable_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = policy(3)
            .execute("write", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(HarvesterError::Database("unavailable".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<()> = policy(2)
            .execute("write", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HarvesterError::Database("down".to_string()))
            })
            .await;
        assert!(matches!(result, Err(HarvesterError::Database(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<()> = policy(5)
            .execute("write", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HarvesterError::TaskInfoDoesNotExist { task_id: 1 })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
