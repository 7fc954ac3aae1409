//! Time source and suspension points for the policies
//!
//! Policies never call `Instant::now()` or `tokio::time::sleep` directly: they
//! go through a [`Clock`]. [`TokioClock`] follows tokio's timer, so
//! `tokio::time::pause()` turns it into a virtual clock for tests.
//! [`ManualClock`] is fully virtual: sleeping, async or blocking, advances it
//! immediately and the requested durations are recorded for inspection.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;

/// Source of the current time and of non-blocking delays
pub trait Clock: Send + Sync + fmt::Debug + 'static {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspend the calling task for `duration`
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Block the calling thread for `duration`
    fn sleep_blocking(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// Shared handle to the default clock
pub(crate) fn default_clock() -> Arc<dyn Clock> {
    Arc::new(TokioClock)
}

/// Virtual clock that only moves when told to
///
/// `sleep` completes immediately after advancing the clock by the requested
/// duration, so retry backoff runs instantly while elapsed-time checks still
/// observe the delay. Not suitable for driving [`TimeoutPolicy`] deadlines,
/// which need a timer that races the operation.
///
/// [`TimeoutPolicy`]: crate::TimeoutPolicy
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualClockInner>>,
}

#[derive(Debug)]
struct ManualClockInner {
    now: Instant,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualClockInner {
                now: Instant::now(),
                sleeps: Vec::new(),
            })),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, duration: Duration) {
        self.inner.lock().now += duration;
    }

    /// Every duration passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().sleeps.clone()
    }

    /// Sum of all recorded sleeps
    pub fn total_slept(&self) -> Duration {
        self.inner.lock().sleeps.iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.lock().now
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let mut inner = self.inner.lock();
        inner.now += duration;
        inner.sleeps.push(duration);
        future::ready(()).boxed()
    }

    fn sleep_blocking(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.now += duration;
        inner.sleeps.push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances_time() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_secs(1)).await;
        clock.sleep(Duration::from_secs(2)).await;

        assert_eq!(clock.now() - start, Duration::from_secs(3));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(clock.total_slept(), Duration::from_secs(3));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = clock.now();

        other.advance(Duration::from_millis(250));

        assert_eq!(clock.now() - start, Duration::from_millis(250));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_manual_clock_blocking_sleep_returns_immediately() {
        let clock = ManualClock::new();
        let start = clock.now();
        let wall = Instant::now();

        clock.sleep_blocking(Duration::from_secs(60));

        assert_eq!(clock.now() - start, Duration::from_secs(60));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60)]);
        assert!(wall.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock;
        let start = clock.now();

        clock.sleep(Duration::from_secs(30)).await;

        assert!(clock.now() - start >= Duration::from_secs(30));
    }
}
