//! Circuit breaker
//!
//! Counts consecutive failures of a dependency and, once the threshold is
//! reached, rejects calls without invoking the operation until the break
//! duration has elapsed. The next call after that is admitted as the single
//! half-open trial: its success closes the breaker, its failure reopens it and
//! restarts the break timer.
//!
//! All clones of a breaker share one state machine. State lives behind a
//! single mutex that is never held across an `.await`; an atomic mirror of the
//! state lets closed-state calls skip the lock on admission.
//!
//! Calls admitted while the breaker was closed may still be in flight when it
//! opens. Their outcomes are recorded without losing increments, but they can
//! push the number of invocations past the threshold; every call admitted
//! after the breaker opened is rejected.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, default_clock};
use crate::observability::{FailurePredicate, OnBreak, OnTransition};
use crate::{ConfigError, ConfigResult, Policy, ResilienceError, ResilienceResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through to the operation
    Closed,
    /// Calls are rejected
    Open,
    /// One trial call is allowed through
    HalfOpen,
}

impl CircuitState {
    const fn to_atomic(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    const fn from_atomic(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Snapshot of a breaker's counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Counted failures since the last success
    pub consecutive_failures: u32,
    /// When the breaker last opened
    pub opened_at: Option<Instant>,
    /// Whether a half-open trial is running
    pub trial_in_flight: bool,
    /// Calls that reached the breaker
    pub total_calls: u64,
    /// Calls rejected without invoking the operation
    pub rejected_calls: u64,
    /// Calls recorded as successful
    pub successes: u64,
    /// Calls recorded as counted failures
    pub failures: u64,
    /// Number of transitions into the open state
    pub times_opened: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    isolated: bool,
    successes: u64,
    failures: u64,
    times_opened: u64,
}

#[derive(Debug)]
struct Shared {
    failure_threshold: u32,
    break_duration: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
    atomic_state: AtomicU8,
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
}

impl Shared {
    /// Set state and update the atomic mirror; caller holds the lock
    fn transition(&self, inner: &mut BreakerState, next: CircuitState) {
        inner.state = next;
        self.atomic_state.store(next.to_atomic(), Ordering::Release);
    }

    fn open(&self, inner: &mut BreakerState, now: Instant) {
        self.transition(inner, CircuitState::Open);
        inner.opened_at = Some(now);
        inner.times_opened += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Closed,
    Trial { entered_half_open: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    None,
    Opened,
    Closed,
}

/// Releases the half-open trial slot if the trial future is dropped
struct TrialGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl TrialGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.shared.state.lock();
            if inner.state == CircuitState::HalfOpen {
                inner.trial_in_flight = false;
            }
            drop(inner);
            debug!("half-open trial dropped before completion, slot released");
        }
    }
}

/// Circuit breaker guarding one dependency
pub struct CircuitBreaker<E> {
    shared: Arc<Shared>,
    count_if: FailurePredicate<E>,
    on_break: Option<OnBreak<E>>,
    on_reset: Option<OnTransition>,
    on_half_open: Option<OnTransition>,
}

impl<E> Clone for CircuitBreaker<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            count_if: Arc::clone(&self.count_if),
            on_break: self.on_break.clone(),
            on_reset: self.on_reset.clone(),
            on_half_open: self.on_half_open.clone(),
        }
    }
}

impl<E> fmt::Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("failure_threshold", &self.shared.failure_threshold)
            .field("break_duration", &self.shared.break_duration)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<E> CircuitBreaker<E> {
    /// Consecutive failures that open the breaker
    pub fn failure_threshold(&self) -> u32 {
        self.shared.failure_threshold
    }

    /// How long the breaker stays open before admitting a trial
    pub fn break_duration(&self) -> Duration {
        self.shared.break_duration
    }

    /// Current state without taking the lock
    ///
    /// Open to half-open happens on the next call, so an open breaker whose
    /// break duration has elapsed still reports `Open` until then.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_atomic(self.shared.atomic_state.load(Ordering::Acquire))
    }

    /// Check if the breaker is closed
    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Check if the breaker is open
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Counters and timestamps
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.shared.state.lock();
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
            trial_in_flight: inner.trial_in_flight,
            total_calls: self.shared.total_calls.load(Ordering::Relaxed),
            rejected_calls: self.shared.rejected_calls.load(Ordering::Relaxed),
            successes: inner.successes,
            failures: inner.failures,
            times_opened: inner.times_opened,
        }
    }
}

impl<E: 'static> CircuitBreaker<E> {
    /// Breaker counting every failure
    pub fn new(failure_threshold: u32, break_duration: Duration) -> ConfigResult<Self> {
        Self::builder()
            .failure_threshold(failure_threshold)
            .break_duration(break_duration)
            .build()
    }

    /// Start building a breaker
    pub fn builder() -> CircuitBreakerBuilder<E> {
        CircuitBreakerBuilder::new()
    }

    /// Close the breaker and clear the failure count
    pub fn reset(&self) {
        let mut inner = self.shared.state.lock();
        let was_closed = inner.state == CircuitState::Closed;
        self.shared.transition(&mut inner, CircuitState::Closed);
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        inner.isolated = false;
        drop(inner);

        info!(pattern = "circuit_breaker", "circuit breaker manually reset");
        if !was_closed && let Some(on_reset) = &self.on_reset {
            on_reset();
        }
    }

    /// Hold the breaker open until [`reset`](Self::reset)
    pub fn isolate(&self) {
        let now = self.shared.clock.now();
        let mut inner = self.shared.state.lock();
        if inner.state != CircuitState::Open {
            self.shared.open(&mut inner, now);
        }
        inner.isolated = true;
        inner.trial_in_flight = false;
        drop(inner);

        warn!(pattern = "circuit_breaker", "circuit breaker manually isolated");
    }

    /// Execute the operation if the breaker admits it
    #[tracing::instrument(skip_all, fields(
        pattern = "circuit_breaker",
        failure_threshold = self.shared.failure_threshold,
        circuit_state = tracing::field::Empty,
    ))]
    pub async fn execute<T, F, Fut>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T, E>>,
    {
        let admission = match self.admit() {
            Ok(admission) => admission,
            Err(retry_after) => {
                self.shared.rejected_calls.fetch_add(1, Ordering::Relaxed);
                debug!(?retry_after, "circuit open, call rejected");
                return Err(ResilienceError::CircuitOpen { retry_after });
            }
        };
        tracing::Span::current().record("circuit_state", tracing::field::display(self.state()));

        // Armed before any observer runs so an unwinding trial frees its slot
        let mut guard = TrialGuard {
            shared: &self.shared,
            armed: matches!(admission, Admission::Trial { .. }),
        };

        if let Admission::Trial {
            entered_half_open: true,
        } = admission
        {
            info!("circuit breaker half-open, admitting trial call");
            if let Some(on_half_open) = &self.on_half_open {
                on_half_open();
            }
        }

        let result = operation().await;
        guard.disarm();

        let transition = self.record(admission, self.classify(&result));
        match (transition, &result) {
            (Transition::Opened, Err(error)) => {
                warn!(
                    failure_threshold = self.shared.failure_threshold,
                    break_ms = self.shared.break_duration.as_millis(),
                    kind = %error.kind(),
                    "circuit breaker opened"
                );
                if let Some(on_break) = &self.on_break {
                    on_break(error, self.shared.break_duration);
                }
            }
            (Transition::Closed, _) => {
                info!("circuit breaker closed after successful trial");
                if let Some(on_reset) = &self.on_reset {
                    on_reset();
                }
            }
            _ => {}
        }

        result
    }

    /// Decide whether a call may proceed; `Err` carries the retry-after hint
    fn admit(&self) -> Result<Admission, Option<Duration>> {
        self.shared.total_calls.fetch_add(1, Ordering::Relaxed);
        if self.state() == CircuitState::Closed {
            return Ok(Admission::Closed);
        }

        let now = self.shared.clock.now();
        let mut inner = self.shared.state.lock();
        match inner.state {
            CircuitState::Closed => Ok(Admission::Closed),
            CircuitState::Open if inner.isolated => Err(None),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.shared.break_duration {
                    self.shared.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(Admission::Trial {
                        entered_half_open: true,
                    })
                } else {
                    Err(Some(self.shared.break_duration - elapsed))
                }
            }
            CircuitState::HalfOpen if inner.trial_in_flight => Err(None),
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(Admission::Trial {
                    entered_half_open: false,
                })
            }
        }
    }

    fn classify<T>(&self, result: &ResilienceResult<T, E>) -> Outcome {
        match result {
            Ok(_) => Outcome::Success,
            Err(error) if error.is_circuit_open() => Outcome::Ignored,
            Err(error) if (self.count_if)(error) => Outcome::Failure,
            Err(_) => Outcome::Success,
        }
    }

    fn record(&self, admission: Admission, outcome: Outcome) -> Transition {
        let now = self.shared.clock.now();
        let mut inner = self.shared.state.lock();
        match outcome {
            Outcome::Success => inner.successes += 1,
            Outcome::Failure => inner.failures += 1,
            Outcome::Ignored => {}
        }

        match (admission, inner.state, outcome) {
            (Admission::Trial { .. }, CircuitState::HalfOpen, Outcome::Success) => {
                inner.trial_in_flight = false;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                self.shared.transition(&mut inner, CircuitState::Closed);
                Transition::Closed
            }
            (Admission::Trial { .. }, CircuitState::HalfOpen, Outcome::Failure) => {
                inner.trial_in_flight = false;
                self.shared.open(&mut inner, now);
                Transition::Opened
            }
            (Admission::Trial { .. }, CircuitState::HalfOpen, Outcome::Ignored) => {
                inner.trial_in_flight = false;
                Transition::None
            }
            (Admission::Closed, CircuitState::Closed, Outcome::Success) => {
                inner.consecutive_failures = 0;
                Transition::None
            }
            (Admission::Closed, CircuitState::Closed, Outcome::Failure) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.shared.failure_threshold {
                    self.shared.open(&mut inner, now);
                    Transition::Opened
                } else {
                    Transition::None
                }
            }
            // Outcome of a call admitted before the state changed underneath it
            _ => Transition::None,
        }
    }
}

impl<T, E> Policy<T, E> for CircuitBreaker<E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn execute<F, Fut>(&self, operation: F) -> impl Future<Output = ResilienceResult<T, E>> + Send
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResilienceResult<T, E>> + Send + 'static,
    {
        Self::execute(self, operation)
    }
}

/// Builder for [`CircuitBreaker`]
pub struct CircuitBreakerBuilder<E> {
    failure_threshold: u32,
    break_duration: Duration,
    count_if: Option<FailurePredicate<E>>,
    on_break: Option<OnBreak<E>>,
    on_reset: Option<OnTransition>,
    on_half_open: Option<OnTransition>,
    clock: Option<Arc<dyn Clock>>,
}

impl<E: 'static> CircuitBreakerBuilder<E> {
    fn new() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(30),
            count_if: None,
            on_break: None,
            on_reset: None,
            on_half_open: None,
            clock: None,
        }
    }

    /// Consecutive failures that open the breaker
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// How long the breaker stays open
    #[must_use]
    pub const fn break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }

    /// Count only failures matching `predicate`; others count as healthy responses
    #[must_use]
    pub fn count_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ResilienceError<E>) -> bool + Send + Sync + 'static,
    {
        self.count_if = Some(Arc::new(predicate));
        self
    }

    /// Observer called when the breaker opens
    #[must_use]
    pub fn on_break<O>(mut self, observer: O) -> Self
    where
        O: Fn(&ResilienceError<E>, Duration) + Send + Sync + 'static,
    {
        self.on_break = Some(Arc::new(observer));
        self
    }

    /// Observer called when the breaker closes again
    #[must_use]
    pub fn on_reset<O>(mut self, observer: O) -> Self
    where
        O: Fn() + Send + Sync + 'static,
    {
        self.on_reset = Some(Arc::new(observer));
        self
    }

    /// Observer called when a trial call is admitted
    #[must_use]
    pub fn on_half_open<O>(mut self, observer: O) -> Self
    where
        O: Fn() + Send + Sync + 'static,
    {
        self.on_half_open = Some(Arc::new(observer));
        self
    }

    /// Time source for the break timer
    #[must_use]
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Validate and build the breaker
    pub fn build(self) -> ConfigResult<CircuitBreaker<E>> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::validation(
                "failure_threshold",
                "must be at least 1",
            ));
        }
        if self.break_duration.is_zero() {
            return Err(ConfigError::validation("break_duration", "must be positive"));
        }

        let shared = Shared {
            failure_threshold: self.failure_threshold,
            break_duration: self.break_duration,
            clock: self.clock.unwrap_or_else(default_clock),
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                isolated: false,
                successes: 0,
                failures: 0,
                times_opened: 0,
            }),
            atomic_state: AtomicU8::new(CircuitState::Closed.to_atomic()),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        };

        Ok(CircuitBreaker {
            shared: Arc::new(shared),
            count_if: self.count_if.unwrap_or_else(|| Arc::new(|_| true)),
            on_break: self.on_break,
            on_reset: self.on_reset,
            on_half_open: self.on_half_open,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use futures::FutureExt;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Down;

    type Breaker = CircuitBreaker<Down>;

    fn breaker(threshold: u32, clock: &ManualClock) -> Breaker {
        CircuitBreaker::builder()
            .failure_threshold(threshold)
            .break_duration(Duration::from_secs(5))
            .clock(clock.clone())
            .build()
            .unwrap()
    }

    async fn fail(breaker: &Breaker, calls: &AtomicU32) -> ResilienceResult<(), Down> {
        breaker
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ResilienceError::Operation(Down)) }
            })
            .await
    }

    async fn succeed(breaker: &Breaker, calls: &AtomicU32) -> ResilienceResult<(), Down> {
        breaker
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(5)]
    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects_next(#[case] threshold: u32) {
        let clock = ManualClock::new();
        let opened = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&opened);
        let breaker: Breaker = CircuitBreaker::builder()
            .failure_threshold(threshold)
            .break_duration(Duration::from_secs(5))
            .on_break(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .clock(clock.clone())
            .build()
            .unwrap();
        let calls = AtomicU32::new(0);

        for _ in 0..threshold {
            assert_eq!(fail(&breaker, &calls).await, Err(ResilienceError::Operation(Down)));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected = fail(&breaker, &calls).await;
        assert_eq!(
            rejected,
            Err(ResilienceError::CircuitOpen {
                retry_after: Some(Duration::from_secs(5))
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), threshold);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.stats().rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_count() {
        let clock = ManualClock::new();
        let breaker = breaker(3, &clock);
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let _ = fail(&breaker, &calls).await;
        }
        assert_eq!(breaker.stats().consecutive_failures, 2);

        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.stats().consecutive_failures, 0);

        for _ in 0..2 {
            let _ = fail(&breaker, &calls).await;
        }
        assert!(breaker.is_closed());
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes() {
        let clock = ManualClock::new();
        let half_opened = Arc::new(AtomicU32::new(0));
        let resets = Arc::new(AtomicU32::new(0));
        let (h, r) = (Arc::clone(&half_opened), Arc::clone(&resets));
        let breaker: Breaker = CircuitBreaker::builder()
            .failure_threshold(2)
            .break_duration(Duration::from_secs(5))
            .on_half_open(move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .on_reset(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .clock(clock.clone())
            .build()
            .unwrap();
        let calls = AtomicU32::new(0);

        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        assert!(breaker.is_open());

        clock.advance(Duration::from_millis(4_999));
        assert!(succeed(&breaker, &calls).await.unwrap_err().is_circuit_open());

        clock.advance(Duration::from_millis(1));
        succeed(&breaker, &calls).await.unwrap();

        assert!(breaker.is_closed());
        assert_eq!(breaker.stats().consecutive_failures, 0);
        assert_eq!(half_opened.load(Ordering::SeqCst), 1);
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_reopens_and_restarts_timer() {
        let clock = ManualClock::new();
        let breaker = breaker(1, &clock);
        let calls = AtomicU32::new(0);

        let _ = fail(&breaker, &calls).await;
        let first_open = breaker.stats().opened_at.unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(fail(&breaker, &calls).await, Err(ResilienceError::Operation(Down)));
        assert!(breaker.is_open());

        let stats = breaker.stats();
        assert_eq!(stats.times_opened, 2);
        assert_eq!(stats.opened_at.unwrap() - first_open, Duration::from_secs(5));

        clock.advance(Duration::from_secs(2));
        let rejected = succeed(&breaker, &calls).await.unwrap_err();
        assert_eq!(rejected.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_only_one_trial_admitted() {
        let clock = ManualClock::new();
        let breaker = breaker(1, &clock);
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        clock.advance(Duration::from_secs(5));

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = breaker.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .execute(move || async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok::<_, ResilienceError<Down>>(())
                })
                .await
        });
        started_rx.await.unwrap();

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        for _ in 0..3 {
            let rejected = succeed(&breaker, &calls).await;
            assert_eq!(rejected, Err(ResilienceError::CircuitOpen { retry_after: None }));
        }

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert!(breaker.is_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_trial_releases_slot() {
        let clock = ManualClock::new();
        let breaker = breaker(1, &clock);
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        clock.advance(Duration::from_secs(5));

        let pending = breaker.execute(|| std::future::pending::<ResilienceResult<(), Down>>());
        assert!(pending.now_or_never().is_none());
        assert!(!breaker.stats().trial_in_flight);

        succeed(&breaker, &calls).await.unwrap();
        assert!(breaker.is_closed());
    }

    #[tokio::test]
    async fn test_panicking_half_open_observer_releases_trial() {
        let clock = ManualClock::new();
        let breaker: Breaker = CircuitBreaker::builder()
            .failure_threshold(1)
            .break_duration(Duration::from_secs(5))
            .on_half_open(|| panic!("half-open observer"))
            .clock(clock.clone())
            .build()
            .unwrap();
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        clock.advance(Duration::from_secs(5));

        let unwound = AssertUnwindSafe(succeed(&breaker, &calls)).catch_unwind().await;
        assert!(unwound.is_err());

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::HalfOpen);
        assert!(!stats.trial_in_flight);

        clock.advance(Duration::from_secs(3600));
        succeed(&breaker, &calls).await.unwrap();
        assert!(breaker.is_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_break_observer_panic_reaches_caller() {
        let clock = ManualClock::new();
        let breaker: Breaker = CircuitBreaker::builder()
            .failure_threshold(1)
            .on_break(|_, _| panic!("break observer"))
            .clock(clock.clone())
            .build()
            .unwrap();
        let calls = AtomicU32::new(0);

        let unwound = AssertUnwindSafe(fail(&breaker, &calls)).catch_unwind().await;
        assert!(unwound.is_err());

        assert!(breaker.is_open());
        assert!(fail(&breaker, &calls).await.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uncounted_failures_do_not_open() {
        let clock = ManualClock::new();
        let breaker: Breaker = CircuitBreaker::builder()
            .failure_threshold(2)
            .count_if(|error: &ResilienceError<Down>| error.is_timeout())
            .clock(clock.clone())
            .build()
            .unwrap();
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let _ = fail(&breaker, &calls).await;
        }
        assert!(breaker.is_closed());

        for _ in 0..2 {
            let _ = breaker
                .execute(|| async {
                    Err::<(), _>(ResilienceError::<Down>::Timeout {
                        duration: Duration::from_secs(1),
                        elapsed: Duration::from_secs(1),
                    })
                })
                .await;
        }
        assert!(breaker.is_open());
    }

    #[tokio::test]
    async fn test_circuit_open_from_inner_layer_never_counts() {
        let clock = ManualClock::new();
        let breaker = breaker(1, &clock);

        for _ in 0..3 {
            let _ = breaker
                .execute(|| async {
                    Err::<(), _>(ResilienceError::<Down>::CircuitOpen { retry_after: None })
                })
                .await;
        }
        assert!(breaker.is_closed());
    }

    #[tokio::test]
    async fn test_isolate_and_reset() {
        let clock = ManualClock::new();
        let breaker = breaker(3, &clock);
        let calls = AtomicU32::new(0);

        breaker.isolate();
        clock.advance(Duration::from_secs(60));
        assert_eq!(
            succeed(&breaker, &calls).await,
            Err(ResilienceError::CircuitOpen { retry_after: None })
        );

        breaker.reset();
        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(breaker.is_closed());
    }

    #[test]
    fn test_debug_reports_state() {
        let clock = ManualClock::new();
        let breaker = breaker(2, &clock);
        breaker.isolate();

        let rendered = format!("{breaker:?}");
        assert!(rendered.contains("failure_threshold: 2"));
        assert!(rendered.contains("state: Open"));
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(Breaker::new(0, Duration::from_secs(1)).is_err());
        assert!(Breaker::new(1, Duration::ZERO).is_err());
        assert!(Breaker::new(1, Duration::from_millis(1)).is_ok());
    }
}
