//! Single-purpose retry helper
//!
//! [`RetryHelper`] is a restricted retry policy for callers that work with
//! plain `Result<T, E>` operations: a fixed exponential backoff seeded by an
//! initial delay, a hard cap on retries and a predicate over `E`. Once the cap
//! is hit or the predicate declines, the last error is returned as is.
//!
//! Defaults: 3 retries, 500 ms initial delay, every error retried.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::{Clock, default_clock};
use crate::patterns::retry::Backoff;

const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Retry helper for plain `Result` operations
pub struct RetryHelper<E> {
    retry_count: u32,
    backoff: Backoff,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    clock: Arc<dyn Clock>,
}

impl<E> Clone for RetryHelper<E> {
    fn clone(&self) -> Self {
        Self {
            retry_count: self.retry_count,
            backoff: self.backoff.clone(),
            should_retry: Arc::clone(&self.should_retry),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<E> fmt::Debug for RetryHelper<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryHelper")
            .field("retry_count", &self.retry_count)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl<E: 'static> Default for RetryHelper<E> {
    fn default() -> Self {
        Self {
            retry_count: DEFAULT_RETRY_COUNT,
            backoff: Backoff::exponential(DEFAULT_INITIAL_DELAY),
            should_retry: Arc::new(|_| true),
            clock: default_clock(),
        }
    }
}

impl<E: 'static> RetryHelper<E> {
    /// Helper with the default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries allowed after the first attempt
    #[must_use]
    pub const fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Delay before the first retry; zero selects the 500 ms default
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        let delay = if delay.is_zero() {
            DEFAULT_INITIAL_DELAY
        } else {
            delay
        };
        self.backoff = Backoff::exponential(delay);
        self
    }

    /// Retry only errors matching `predicate`
    #[must_use]
    pub fn should_retry<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Time source for backoff sleeps, async and blocking
    #[must_use]
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Delay slept after `attempt` failed: `initial * 2^(attempt-1)`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Whether a failure on `attempt` should be followed by another attempt
    fn next_delay(&self, error: &E, attempt: u32) -> Option<Duration> {
        if attempt > self.retry_count {
            warn!(pattern = "retry_helper", attempts = attempt, "retries exhausted");
            return None;
        }
        if !(self.should_retry)(error) {
            debug!(pattern = "retry_helper", attempt, "error is not retryable");
            return None;
        }
        let delay = self.delay(attempt);
        debug!(
            pattern = "retry_helper",
            attempt,
            delay_ms = delay.as_millis(),
            "attempt failed, waiting before retry"
        );
        Some(delay)
    }

    /// Run the operation, suspending between attempts
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            debug!(pattern = "retry_helper", attempt, "starting attempt");
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            let Some(delay) = self.next_delay(&error, attempt) else {
                return Err(error);
            };
            drop(error);
            self.clock.sleep(delay).await;
            attempt += 1;
        }
    }

    /// Run the operation, blocking the current thread between attempts
    pub fn execute_blocking<T, F>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            debug!(pattern = "retry_helper", attempt, "starting attempt");
            let error = match operation() {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            let Some(delay) = self.next_delay(&error, attempt) else {
                return Err(error);
            };
            self.clock.sleep_blocking(delay);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use pretty_assertions::assert_eq;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_settings() {
        let helper = RetryHelper::<io::Error>::new();
        assert_eq!(helper.retry_count, 3);
        assert_eq!(helper.delay(1), Duration::from_millis(500));
        assert_eq!(helper.delay(3), Duration::from_millis(2000));

        let helper = RetryHelper::<io::Error>::new().initial_delay(Duration::ZERO);
        assert_eq!(helper.delay(1), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_recovers_after_io_failures() {
        let clock = ManualClock::new();
        let helper = RetryHelper::new()
            .retry_count(5)
            .should_retry(|error: &io::Error| error.kind() == io::ErrorKind::Other)
            .clock(clock.clone());

        let calls = AtomicU32::new(0);
        let result = helper
            .execute(|| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt <= 3 {
                        Err(io::Error::other("disk busy"))
                    } else {
                        Ok("payload")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "payload");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
            ]
        );
    }

    #[tokio::test]
    async fn test_rethrows_unretryable_error_unchanged() {
        let clock = ManualClock::new();
        let helper = RetryHelper::new()
            .should_retry(|error: &io::Error| error.kind() == io::ErrorKind::Other)
            .clock(clock.clone());

        let calls = AtomicU32::new(0);
        let result: Result<(), io::Error> = helper
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(io::Error::from(io::ErrorKind::PermissionDenied)) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_blocking_gives_up_after_retry_count() {
        let helper = RetryHelper::new()
            .retry_count(2)
            .initial_delay(Duration::from_millis(1));

        let mut calls = 0;
        let result: Result<(), &str> = helper.execute_blocking(|| {
            calls += 1;
            Err("unreachable host")
        });

        assert_eq!(result, Err("unreachable host"));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_blocking_sleeps_on_injected_clock() {
        let clock = ManualClock::new();
        let helper = RetryHelper::new()
            .retry_count(3)
            .initial_delay(Duration::from_secs(10))
            .clock(clock.clone());

        let mut calls = 0;
        let result = helper.execute_blocking(|| {
            calls += 1;
            if calls < 3 {
                Err("connection reset")
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result, Ok(3));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(10), Duration::from_secs(20)]
        );
    }
}
