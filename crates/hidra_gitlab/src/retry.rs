//! Bounded exponential backoff for lookups that follow a creation conflict.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{ApiError, ApiResult};

/// Retry settings. Only used to bridge eventual consistency after a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(4000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
        }
    }

    /// Retry without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before the given retry (1-based): initial, 2x, 4x, ... capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Run a lookup until it succeeds, retrying only on not-found.
    pub async fn retry_not_found<T, F, Fut>(&self, what: &str, mut lookup: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match lookup().await {
                Err(ApiError::NotFound(message)) if attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        "{} not visible yet ({}), retrying in {:?} (attempt {}/{})",
                        what,
                        message,
                        delay,
                        attempt + 1,
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_retry_until_visible() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = RetryPolicy::immediate(5)
            .retry_not_found("group", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ApiError::NotFound("404".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: ApiResult<u32> = RetryPolicy::immediate(3)
            .retry_not_found("group", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::NotFound("404".to_string()))
            })
            .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: ApiResult<u32> = RetryPolicy::immediate(3)
            .retry_not_found("group", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Forbidden("403".to_string()))
            })
            .await;
        assert!(result.unwrap_err().is_permission_denied());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
