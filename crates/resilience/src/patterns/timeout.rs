//! Deadline enforcement
//!
//! Two strategies decide what happens to an operation that misses its
//! deadline:
//!
//! - [`TimeoutStrategy::Cooperative`] polls the operation inline. At the
//!   deadline its future is dropped and the [`CancellationToken`] handed to
//!   it is cancelled. Work the operation started elsewhere (spawned tasks,
//!   threads, requests already on the wire) keeps running unless it observes
//!   the token; that leak is the caller's to avoid.
//! - [`TimeoutStrategy::Forced`] runs the operation as its own task. At the
//!   deadline the caller gets `Timeout` immediately and the task is
//!   abandoned, not aborted: it runs to completion, its result is discarded,
//!   and a reaper task logs how it ended. [`TimeoutPolicy::abandoned_stats`]
//!   exposes those outcomes. A panic inside an abandoned task is captured by
//!   the reaper and never reaches the process.
//!
//! Both strategies cancel the token and fire `on_timeout(elapsed)` exactly
//! once per timed-out call.
//!
//! Under `Forced`, anything the operation runs after the deadline runs on the
//! abandoned task, including observers of policies wrapped inside the
//! timeout. Their panics are counted by the reaper and never reach the
//! caller.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::{Clock, default_clock};
use crate::observability::OnTimeout;
use crate::{ConfigError, ConfigResult, Policy, ResilienceError, ResilienceResult};

/// What happens to an operation that misses its deadline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStrategy {
    /// Drop the operation future and cancel its token
    #[default]
    Cooperative,
    /// Abandon the operation's task and let it finish in the background
    Forced,
}

/// Outcomes of operations abandoned by forced timeouts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbandonedStats {
    /// Operations left running after their deadline
    pub abandoned: u64,
    /// Abandoned operations that later finished
    pub completed: u64,
    /// Abandoned operations that later panicked
    pub panicked: u64,
}

#[derive(Debug, Default)]
struct AbandonedCounters {
    abandoned: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Timeout policy
#[derive(Clone)]
pub struct TimeoutPolicy {
    duration: Duration,
    strategy: TimeoutStrategy,
    on_timeout: Option<OnTimeout>,
    clock: Arc<dyn Clock>,
    abandoned: Arc<AbandonedCounters>,
}

impl fmt::Debug for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutPolicy")
            .field("duration", &self.duration)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl TimeoutPolicy {
    /// Cooperative timeout of `duration`
    pub fn new(duration: Duration) -> ConfigResult<Self> {
        Self::builder(duration).build()
    }

    /// Start building a timeout policy
    pub fn builder(duration: Duration) -> TimeoutPolicyBuilder {
        TimeoutPolicyBuilder {
            duration,
            strategy: TimeoutStrategy::default(),
            on_timeout: None,
            clock: None,
        }
    }

    /// Deadline per call
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Strategy for late operations
    pub const fn strategy(&self) -> TimeoutStrategy {
        self.strategy
    }

    /// Outcomes of abandoned operations so far
    pub fn abandoned_stats(&self) -> AbandonedStats {
        AbandonedStats {
            abandoned: self.abandoned.abandoned.load(Ordering::Relaxed),
            completed: self.abandoned.completed.load(Ordering::Relaxed),
            panicked: self.abandoned.panicked.load(Ordering::Relaxed),
        }
    }

    /// Execute the operation under the deadline
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> ResilienceResult<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T, E>> + Send + 'static,
    {
        self.execute_with_cancellation(|_| operation()).await
    }

    /// Execute the operation, handing it a token cancelled at the deadline
    #[tracing::instrument(skip_all, fields(
        pattern = "timeout",
        timeout_ms = self.duration.as_millis(),
        strategy = ?self.strategy,
    ))]
    pub async fn execute_with_cancellation<T, E, F, Fut>(
        &self,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ResilienceResult<T, E>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let start = self.clock.now();
        let deadline = self.clock.sleep(self.duration);
        let operation = operation(token.clone());

        match self.strategy {
            TimeoutStrategy::Cooperative => {
                tokio::select! {
                    biased;
                    result = operation => result,
                    () = deadline => {
                        token.cancel();
                        Err(self.timed_out(start))
                    }
                }
            }
            TimeoutStrategy::Forced => {
                let mut handle = tokio::spawn(operation);
                tokio::select! {
                    biased;
                    joined = &mut handle => self.settle(joined, start),
                    () = deadline => {
                        token.cancel();
                        self.abandon(handle);
                        Err(self.timed_out(start))
                    }
                }
            }
        }
    }

    /// Run a blocking closure on the blocking pool, abandoning it at the deadline
    #[tracing::instrument(skip_all, fields(
        pattern = "timeout",
        timeout_ms = self.duration.as_millis(),
        strategy = "blocking",
    ))]
    pub async fn execute_blocking<T, E, F>(&self, operation: F) -> ResilienceResult<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let start = self.clock.now();
        let deadline = self.clock.sleep(self.duration);
        let mut handle = tokio::task::spawn_blocking(operation);

        tokio::select! {
            biased;
            joined = &mut handle => {
                self.settle(joined.map(|result| result.map_err(ResilienceError::Operation)), start)
            }
            () = deadline => {
                self.abandon(handle);
                Err(self.timed_out(start))
            }
        }
    }

    /// Outcome of a task that finished before the deadline
    ///
    /// A panic is resumed on the caller. A task cancelled by runtime shutdown
    /// yields `Timeout` but does not fire `on_timeout`.
    fn settle<T, E>(
        &self,
        joined: Result<ResilienceResult<T, E>, JoinError>,
        start: Instant,
    ) -> ResilienceResult<T, E> {
        match joined {
            Ok(result) => result,
            Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
            Err(_) => {
                let elapsed = self.clock.now().saturating_duration_since(start);
                debug!(
                    elapsed_ms = elapsed.as_millis(),
                    "operation task cancelled by runtime shutdown"
                );
                Err(ResilienceError::Timeout {
                    duration: self.duration,
                    elapsed,
                })
            }
        }
    }

    fn timed_out<E>(&self, start: Instant) -> ResilienceError<E> {
        let elapsed = self.clock.now().saturating_duration_since(start);
        warn!(
            elapsed_ms = elapsed.as_millis(),
            timeout_ms = self.duration.as_millis(),
            "operation timed out"
        );
        if let Some(on_timeout) = &self.on_timeout {
            on_timeout(elapsed);
        }
        ResilienceError::Timeout {
            duration: self.duration,
            elapsed,
        }
    }

    /// Hand a late task to a reaper that records how it ends
    fn abandon<R: Send + 'static>(&self, handle: JoinHandle<R>) {
        self.abandoned.abandoned.fetch_add(1, Ordering::Relaxed);
        let counters = Arc::clone(&self.abandoned);
        tokio::spawn(async move {
            match handle.await {
                Ok(_) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    debug!(pattern = "timeout", "abandoned operation finished, result discarded");
                }
                Err(error) if error.is_panic() => {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    warn!(pattern = "timeout", "abandoned operation panicked");
                }
                Err(_) => {}
            }
        });
    }
}

impl<T, E> Policy<T, E> for TimeoutPolicy
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

/// Builder for [`TimeoutPolicy`]
pub struct TimeoutPolicyBuilder {
    duration: Duration,
    strategy: TimeoutStrategy,
    on_timeout: Option<OnTimeout>,
    clock: Option<Arc<dyn Clock>>,
}

impl TimeoutPolicyBuilder {
    /// Strategy for late operations
    #[must_use]
    pub const fn strategy(mut self, strategy: TimeoutStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Observer called with the elapsed time when a call times out
    #[must_use]
    pub fn on_timeout<O>(mut self, observer: O) -> Self
    where
        O: Fn(Duration) + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(observer));
        self
    }

    /// Time source for the deadline; its `sleep` must race the operation
    #[must_use]
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Validate and build the policy
    pub fn build(self) -> ConfigResult<TimeoutPolicy> {
        if self.duration.is_zero() {
            return Err(ConfigError::validation("duration", "must be positive"));
        }
        Ok(TimeoutPolicy {
            duration: self.duration,
            strategy: self.strategy,
            on_timeout: self.on_timeout,
            clock: self.clock.unwrap_or_else(default_clock),
            abandoned: Arc::new(AbandonedCounters::default()),
        })
    }
}
