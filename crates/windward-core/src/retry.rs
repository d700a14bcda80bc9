//! The single retry envelope.
//!
//! Every outbound call that may fail transiently goes through
//! [`retry_async`]; higher layers treat a returned failure as final.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::constants::{P2P_BASE_DELAY_MS, P2P_MAX_DELAY_MS, P2P_MAX_RETRIES, P2P_TIMEOUT_MS};

/// Classifies whether an error is worth another attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Marker produced when a single attempt exceeds its deadline. Callers'
/// error types convert it into their own timeout variant.
#[derive(Debug, Clone, Copy)]
pub struct AttemptTimeout {
    pub ms: u64,
}

/// Exponential-backoff policy: `max_attempts` tries, delay doubling from
/// `base_delay` capped at `max_delay`, each attempt bounded by
/// `attempt_timeout`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: P2P_MAX_RETRIES,
            base_delay: Duration::from_millis(P2P_BASE_DELAY_MS),
            max_delay: Duration::from_millis(P2P_MAX_DELAY_MS),
            attempt_timeout: Duration::from_millis(P2P_TIMEOUT_MS),
        }
    }
}

impl RetryPolicy {
    /// Worst-case wall-clock envelope: attempts × timeout plus all backoffs.
    pub fn deadline_envelope(&self) -> Duration {
        let mut total = self.attempt_timeout * self.max_attempts;
        let mut delay = self.base_delay;
        for _ in 1..self.max_attempts {
            total += delay;
            delay = (delay * 2).min(self.max_delay);
        }
        total
    }
}

/// Run `op` under `policy`. Retries only errors that classify retryable;
/// a timed-out attempt counts as retryable. The error of the final attempt
/// is returned unchanged.
pub async fn retry_async<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + From<AttemptTimeout> + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = policy.base_delay;
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        let result = match tokio::time::timeout(policy.attempt_timeout, op(attempt)).await {
            Ok(r) => r,
            Err(_) => Err(E::from(AttemptTimeout {
                ms: policy.attempt_timeout.as_millis() as u64,
            })),
        };

        match result {
            Ok(v) => {
                if attempt > 1 {
                    debug!(%label, attempt, "succeeded after retry");
                }
                return Ok(v);
            }
            Err(e) if attempt < attempts && e.is_retryable() => {
                warn!(%label, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("retry loop always returns within max_attempts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
        TimedOut(u64),
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient | TestError::TimedOut(_))
        }
    }

    impl From<AttemptTimeout> for TestError {
        fn from(t: AttemptTimeout) -> Self {
            TestError::TimedOut(t.ms)
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            attempt_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn transient_errors_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_async(&fast_policy(), "test", |_| async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TestError::Transient)
            } else {
                Ok(99)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_return_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_async(&fast_policy(), "test", |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::Permanent)
        })
        .await;
        assert!(matches!(result, Err(TestError::Permanent)));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry on permanent error");
    }

    #[tokio::test]
    async fn exhausted_retries_surface_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_async(&fast_policy(), "test", |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::Transient)
        })
        .await;
        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_attempts_convert_to_timeouts() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            attempt_timeout: Duration::from_millis(10),
        };
        let result: Result<u32, TestError> = retry_async(&policy, "slow", |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;
        assert!(matches!(result, Err(TestError::TimedOut(10))));
    }

    #[test]
    fn envelope_accounts_for_backoff() {
        let p = fast_policy();
        // 3 × 50ms timeouts + 1ms + 2ms backoff
        assert_eq!(p.deadline_envelope(), Duration::from_millis(153));
    }
}
