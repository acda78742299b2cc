//! Retry Handler
//! Mission: bounded exponential backoff with jitter, gated by the error taxonomy's
//! retryable classification. Never itself decides retryability, only consumes it.

use crate::error::CoreError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter_enabled: bool,
    /// Narrows retryability beyond `CoreError::retryable`, e.g. to exclude a
    /// specific gateway code that is nominally retryable under this policy.
    pub retryable_predicate: fn(&CoreError) -> bool,
}

fn always_retryable(_: &CoreError) -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_enabled: true,
            retryable_predicate: always_retryable,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `k` (0-indexed), before jitter.
    pub fn base_delay(&self, k: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(k as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    pub fn delay_with_jitter(&self, k: u32) -> Duration {
        let base = self.base_delay(k);
        if !self.jitter_enabled {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.85..=1.15);
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RetryMetrics {
    pub total_attempts: u32,
    pub successful_retries: u32,
    pub failed_retries: u32,
}

/// Runs `make_attempt` until it succeeds, a non-retryable error is raised, or the
/// policy's attempt budget is exhausted. `make_attempt` is invoked once per attempt
/// and must produce a fresh future each time (the underlying call is not idempotent
/// to replay against the same future instance).
pub async fn execute<F, Fut, T>(
    policy: &RetryPolicy,
    mut make_attempt: F,
) -> (Result<T, CoreError>, RetryMetrics)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut metrics = RetryMetrics::default();
    let mut last_err: Option<CoreError> = None;

    for attempt in 0..policy.max_attempts {
        metrics.total_attempts += 1;
        match make_attempt(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    metrics.successful_retries += 1;
                }
                return (Ok(value), metrics);
            }
            Err(err) => {
                let retryable = err.retryable && (policy.retryable_predicate)(&err);
                last_err = Some(err);
                if !retryable {
                    return (Err(last_err.unwrap()), metrics);
                }
                if attempt + 1 >= policy.max_attempts {
                    metrics.failed_retries += 1;
                    break;
                }
                let delay = policy.delay_with_jitter(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after delay");
                tokio::time::sleep(delay).await;
            }
        }
    }

    (Err(last_err.expect("at least one attempt runs")), metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(10),
            jitter_enabled: false,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry_on_first_attempt() {
        let (result, metrics) = execute(&fast_policy(), |_| async { Ok::<_, CoreError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(metrics.total_attempts, 1);
        assert_eq!(metrics.successful_retries, 0);
    }

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        let calls = AtomicU32::new(0);
        let (result, metrics) = execute(&fast_policy(), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CoreError::new(ErrorCategory::Network, "flaky"))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(metrics.total_attempts, 3);
        assert_eq!(metrics.successful_retries, 1);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_errors() {
        let calls = AtomicU32::new(0);
        let (result, metrics) = execute(&fast_policy(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(CoreError::new(ErrorCategory::Validation, "bad input")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.total_attempts, 1);
    }

    #[tokio::test]
    async fn rethrows_last_error_on_exhaustion() {
        let (result, metrics) = execute(&fast_policy(), |_| async {
            Err::<(), _>(CoreError::new(ErrorCategory::Timeout, "still slow"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(metrics.total_attempts, 3);
        assert_eq!(metrics.failed_retries, 1);
    }

    #[tokio::test]
    async fn predicate_can_narrow_a_nominally_retryable_error() {
        fn reject_flaky(err: &CoreError) -> bool {
            err.message != "flaky"
        }
        let policy = RetryPolicy {
            retryable_predicate: reject_flaky,
            ..fast_policy()
        };
        let calls = AtomicU32::new(0);
        let (result, metrics) = execute(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(CoreError::new(ErrorCategory::Network, "flaky")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.total_attempts, 1);
    }

    #[test]
    fn delay_doubles_and_caps_at_max() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(3),
            jitter_enabled: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.base_delay(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay(2), Duration::from_secs(3)); // capped from 4
        assert_eq!(policy.base_delay(3), Duration::from_secs(3)); // still capped
    }
}
