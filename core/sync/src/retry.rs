//! Retry strategy for transport failures.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use attrsync_common::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay between two attempts.
    pub delay: Duration,
}

impl RetryConfig {
    /// `max_attempts` attempts spaced exactly `delay` apart.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::fixed(3, Duration::from_millis(1000))
    }
}

/// Runs operations with retry logic.
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

/// Execute with a custom retry condition.
    ///
    /// Returns the error of the last attempt once attempts are exhausted, or
    /// the first error `should_retry` rejects.
    pub async fn execute_with_condition<F, Fut, T, C>(
        &self,
        operation: F,
        should_retry: C,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&Error) -> bool,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !should_retry(&err) {
                        return Err(err);
                    }

                    attempt += 1;
                    if attempt >= self.config.max_attempts {
                        warn!("Operation failed after {} attempts: {}", attempt, err);
                        return Err(err);
                    }

                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}...",
                        attempt, err, self.config.delay
                    );
                    sleep(self.config.delay).await;
                }
            }
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[test]
    fn test_at_least_one_attempt() {
        let config = RetryConfig::fixed(0, Duration::from_millis(1000));
        assert_eq!(config.max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_fixed_spacing() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let starts_clone = starts.clone();
        let executor = RetryExecutor::default();

        let result: Result<i32> = executor
            .execute_with_condition(
                move || {
                    let starts = starts_clone.clone();
                    async move {
                        let mut starts = starts.lock().unwrap();
                        starts.push(Instant::now());
                        if starts.len() < 3 {
                            Err(Error::Network("Connection failed".to_string()))
                        } else {
                            Ok(42)
                        }
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let count_clone = attempt_count.clone();

        let result: Result<i32> = RetryExecutor::default()
            .execute_with_condition(
                move || {
                    let count = count_clone.clone();
                    async move {
                        let n = count.fetch_add(1, Ordering::SeqCst);
                        Err(Error::Network(format!("failure {}", n)))
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::Network(message)) => assert_eq!(message, "failure 2"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_custom_condition() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let count_clone = attempt_count.clone();
        let executor = RetryExecutor::new(RetryConfig::fixed(5, Duration::from_millis(1)));

        let result: Result<i32> = executor
            .execute_with_condition(
                move || {
                    let count = count_clone.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Err(Error::Http {
                            status: 401,
                            message: "unauthorized".to_string(),
                        })
                    }
                },
                |err| !err.is_auth_error(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }
}
