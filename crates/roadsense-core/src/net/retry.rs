use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Fixed-delay retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Last error of a failed retry loop.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
    /// False when the loop stopped on a non-retryable error.
    pub retryable: bool,
}

/// Run `op` until it succeeds, fails with an error `is_retryable` rejects, or
/// the budget runs out. `op` receives the 1-based attempt number.
pub async fn retry_with_policy<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    is_retryable: R,
    mut op: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let retryable = is_retryable(&error);
                if !retryable || attempt > policy.max_retries {
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                        retryable,
                    });
                }
                warn!(
                    attempt = attempt,
                    max_retries = policy.max_retries,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Offline,
        Fatal,
    }

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            delay: Duration::from_millis(1),
        }
    }

    fn is_offline(e: &FakeError) -> bool {
        *e == FakeError::Offline
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_with_policy(&fast_policy(), is_offline, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt <= 2 {
                    Err(FakeError::Offline)
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_always_failing_uses_whole_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_policy(&fast_policy(), is_offline, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FakeError::Offline) }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 4);
        assert!(failure.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_policy(&fast_policy(), is_offline, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FakeError::Fatal) }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.error, FakeError::Fatal);
        assert!(!failure.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_fixed_delay_between_attempts() {
        let start = tokio::time::Instant::now();
        let policy = RetryPolicy::default();
        let _: Result<(), _> =
            retry_with_policy(&policy, is_offline, |_| async { Err(FakeError::Offline) }).await;

        // Three sleeps of one second between four attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(4));
    }
}
