//! Bounded retry with exponential backoff for model calls
//!
//! Stages allow exactly one retry; the orchestrator never retries a whole run.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::ModelError;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_retry(Duration::from_millis(500))
    }
}

impl RetryPolicy {
    /// One retry after `backoff`.
    pub fn single_retry(backoff: Duration) -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: backoff,
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Fast retries for tests.
    pub fn fast() -> Self {
        Self::single_retry(Duration::from_millis(5))
    }

    fn backoff_duration(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let backoff_ms = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        Duration::from_millis(backoff_ms as u64).min(self.max_backoff)
    }

    /// Run `operation`, retrying transient model errors until attempts run out.
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, ModelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = operation_name, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let backoff = self.backoff_duration(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Model call failed, retrying"
                    );
                    sleep(backoff).await;
                }
                Err(e) => {
                    warn!(operation = operation_name, attempt, error = %e, "Model call failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> ModelError {
        ModelError::Timeout {
            provider: "test".to_string(),
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.backoff_duration(0), Duration::ZERO);
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fast();

        let result = policy
            .execute("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(transient())
                } else {
                    Ok("answer")
                }
            })
            .await;

        assert_eq!(result, Ok("answer"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_single_retry() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fast();

        let result: Result<(), _> = policy
            .execute("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fast();

        let result: Result<(), _> = policy
            .execute("misconfigured", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ModelError::NotConfigured {
                    provider: "test".to_string(),
                })
            })
            .await;

        assert!(matches!(result, Err(ModelError::NotConfigured { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
