// SPDX-License-Identifier: Apache-2.0

use crate::error::ApiError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

pub trait BackoffPolicy {
    fn delay_for_attempt(&self, attempt: usize) -> Duration;
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 120,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_backoff_ms: 0,
        }
    }
}

impl BackoffPolicy for RetryPolicy {
    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        Duration::from_millis(self.base_backoff_ms.saturating_mul(attempt as u64))
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or attempts run out.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && err.is_retryable() => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after error: {err}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(120));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(360));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicUsize::new(0);
        let out = retry_with_backoff(&RetryPolicy::default(), "expr", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ApiError::transport("reset"))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(out, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicUsize::new(0);
        let out: Result<(), _> = retry_with_backoff(&RetryPolicy::default(), "expr", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::status(400, "unknown gene"))
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy {
            max_attempts: 2,
            base_backoff_ms: 10,
        };
        let out: Result<(), _> = retry_with_backoff(&policy, "expr", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::status(502, "bad gateway"))
        })
        .await;
        assert_eq!(out.map_err(|e| e.kind), Err(crate::ApiErrorKind::Status(502)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
