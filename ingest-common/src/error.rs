//! Error classification for retry logic.
//!
//! Component error enums implement [`ErrorClassification`] so that generic
//! retry helpers can decide whether an operation is worth repeating without
//! knowing the concrete error type.

use std::time::Duration;

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// May resolve on retry (network issues, timeouts, 5xx)
    Transient,
    /// Will not resolve on retry (invalid input, not found)
    Permanent,
    /// Resource exhaustion (rate limits)
    ResourceExhausted,
    /// Configuration problems (missing settings, bad credentials)
    Configuration,
    /// Internal errors (bugs, unexpected state)
    Internal,
}

/// Trait for errors that can classify themselves for retry logic.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error may succeed on retry
    fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ResourceExhausted
        )
    }

    /// Returns true if retrying is pointless
    fn is_permanent(&self) -> bool {
        matches!(self.category(), ErrorCategory::Permanent)
    }

    /// Suggests a delay before retrying, if applicable
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_secs(1)),
            ErrorCategory::ResourceExhausted => Some(Duration::from_secs(60)),
            _ => None,
        }
    }
}

/// Retry a fallible async operation with linearly growing delays.
///
/// Attempt `n` (1-based) is followed by a sleep of `base_delay * n` before
/// the next try. Non-transient errors and exhausted budgets surface to the
/// caller immediately.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<T, E>
where
    E: ErrorClassification + std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;

                if !err.is_transient() || attempt >= max_attempts {
                    return Err(err);
                }

                let delay = err
                    .suggested_retry_delay()
                    .unwrap_or(base_delay)
                    .max(base_delay * attempt);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Flaky,
        Fatal,
    }

    impl ErrorClassification for TestError {
        fn category(&self) -> ErrorCategory {
            match self {
                TestError::Flaky => ErrorCategory::Transient,
                TestError::Fatal => ErrorCategory::Permanent,
            }
        }

        fn suggested_retry_delay(&self) -> Option<Duration> {
            Some(Duration::from_millis(1))
        }
    }

    #[test]
    fn test_category_predicates() {
        assert!(TestError::Flaky.is_transient());
        assert!(!TestError::Flaky.is_permanent());
        assert!(TestError::Fatal.is_permanent());
        assert!(!TestError::Fatal.is_transient());
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_with_backoff(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError::Flaky)
                    } else {
                        Ok(n)
                    }
                }
            },
            3,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            },
            3,
            Duration::from_millis(1),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Flaky) }
            },
            3,
            Duration::from_millis(1),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
