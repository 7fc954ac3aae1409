//! Retry with backoff
//!
//! A retry policy re-invokes the operation after a failure, waiting between
//! attempts according to a [`Backoff`] provider. Attempt numbers are 1-based:
//! attempt 1 is the initial call, and the delay slept after attempt `n` fails
//! is `backoff.delay(n)`. With [`Backoff::Exponential`] that is
//! `base * 2^(n-1)`, so the first retry waits exactly `base`.
//!
//! The last failure is propagated unchanged once retries are exhausted or the
//! predicate rejects it; there is no "retries exhausted" wrapper.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Clock, default_clock};
use crate::observability::{FailurePredicate, OnRetry};
use crate::{ConfigError, ConfigResult, Policy, ResilienceError, ResilienceResult};

/// Maps a 1-based attempt number to the delay before the next attempt
#[derive(Clone)]
pub enum Backoff {
    /// Same delay after every attempt
    Fixed(Duration),
    /// `step * attempt`, optionally capped
    Linear {
        /// Delay added per attempt
        step: Duration,
        /// Upper bound
        max: Option<Duration>,
    },
    /// `base * 2^(attempt-1)`, optionally capped
    Exponential {
        /// Delay after the first attempt
        base: Duration,
        /// Upper bound
        max: Option<Duration>,
    },
    /// Caller-provided function of the attempt number
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl Backoff {
    /// Uncapped exponential backoff starting at `base`
    #[must_use]
    pub const fn exponential(base: Duration) -> Self {
        Self::Exponential { base, max: None }
    }

    /// Backoff computed by `f(attempt)`
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Delay to sleep after `attempt` failed
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Fixed(delay) => *delay,
            Self::Linear { step, max } => cap(step.saturating_mul(attempt), *max),
            Self::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                cap(base.saturating_mul(factor), *max)
            }
            Self::Custom(f) => f(attempt),
        }
    }

    /// Check that the cap is not below the starting delay
    pub fn validate(&self) -> ConfigResult<()> {
        match self {
            Self::Linear {
                step: start,
                max: Some(max),
            }
            | Self::Exponential {
                base: start,
                max: Some(max),
            } if max < start => Err(ConfigError::validation(
                "max_delay",
                format!("{max:?} is below the initial delay {start:?}"),
            )),
            _ => Ok(()),
        }
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Fixed(_) => "fixed",
            Self::Linear { .. } => "linear",
            Self::Exponential { .. } => "exponential",
            Self::Custom(_) => "custom",
        }
    }
}

fn cap(delay: Duration, max: Option<Duration>) -> Duration {
    max.map_or(delay, |max| delay.min(max))
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Self::Linear { step, max } => f
                .debug_struct("Linear")
                .field("step", step)
                .field("max", max)
                .finish(),
            Self::Exponential { base, max } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("max", max)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Randomisation applied on top of the backoff delay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterPolicy {
    /// Use the computed delay exactly
    #[default]
    None,
    /// Uniform in `0..=delay`
    Full,
    /// `delay/2` plus uniform in `0..=delay/2`
    Equal,
}

impl JitterPolicy {
    /// Apply jitter to a delay
    #[must_use]
    pub fn apply(self, delay: Duration) -> Duration {
        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        match self {
            Self::None => delay,
            Self::Full => Duration::from_nanos(fastrand::u64(0..=nanos)),
            Self::Equal => {
                let half = nanos / 2;
                Duration::from_nanos(half + fastrand::u64(0..=half))
            }
        }
    }
}

/// Retry policy
///
/// Stateless between calls: every `execute` owns its own attempt counter, so
/// one policy can be shared by concurrent callers.
pub struct RetryPolicy<E> {
    max_attempts: u32,
    backoff: Backoff,
    jitter: JitterPolicy,
    retry_if: FailurePredicate<E>,
    on_retry: Option<OnRetry<E>>,
    clock: Arc<dyn Clock>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            jitter: self.jitter,
            retry_if: Arc::clone(&self.retry_if),
            on_retry: self.on_retry.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl<E: 'static> RetryPolicy<E> {
    /// Retry every failure except `CircuitOpen` up to `max_attempts` times
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
            jitter: JitterPolicy::None,
            retry_if: Arc::new(|error: &ResilienceError<E>| !error.is_circuit_open()),
            on_retry: None,
            clock: default_clock(),
        }
    }

    /// Start building a retry policy
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// Retries allowed after the initial attempt
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff provider
    pub const fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Execute the operation, retrying recognised failures
    #[tracing::instrument(skip_all, fields(
        pattern = "retry",
        max_attempts = self.max_attempts,
        backoff = self.backoff.name(),
    ))]
    pub async fn execute<T, F, Fut>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ResilienceResult<T, E>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempts = attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if attempt > self.max_attempts {
                warn!(
                    attempts = attempt,
                    kind = %error.kind(),
                    "retries exhausted, propagating last failure"
                );
                return Err(error);
            }

            if !(self.retry_if)(&error) {
                debug!(attempt, kind = %error.kind(), "failure is not retryable");
                return Err(error);
            }

            let delay = self.jitter.apply(self.backoff.delay(attempt));
            debug!(
                attempt,
                delay_ms = delay.as_millis(),
                kind = %error.kind(),
                "attempt failed, retrying"
            );
            if let Some(on_retry) = &self.on_retry {
                on_retry(&error, delay, attempt);
            }
            drop(error);

            self.clock.sleep(delay).await;
            attempt += 1;
        }
    }
}

impl<T, E> Policy<T, E> for RetryPolicy<E>
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

/// Builder for [`RetryPolicy`]
pub struct RetryPolicyBuilder<E> {
    max_attempts: u32,
    backoff: Backoff,
    jitter: JitterPolicy,
    retry_if: Option<FailurePredicate<E>>,
    on_retry: Option<OnRetry<E>>,
    clock: Option<Arc<dyn Clock>>,
}

impl<E: 'static> RetryPolicyBuilder<E> {
    fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_millis(100)),
            jitter: JitterPolicy::None,
            retry_if: None,
            on_retry: None,
            clock: None,
        }
    }

    /// Retries allowed after the initial attempt
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay provider
    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Jitter applied after the backoff provider
    #[must_use]
    pub const fn jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Retry only failures matching `predicate`
    #[must_use]
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ResilienceError<E>) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    /// Retry only the operation's own failures matching `predicate`
    #[must_use]
    pub fn retry_if_operation<P>(self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_if(move |error| error.operation_error().is_some_and(&predicate))
    }

    /// Observer called before each backoff sleep
    #[must_use]
    pub fn on_retry<O>(mut self, observer: O) -> Self
    where
        O: Fn(&ResilienceError<E>, Duration, u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Time source used for backoff sleeps
    #[must_use]
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Build the policy
    pub fn build(self) -> ConfigResult<RetryPolicy<E>> {
        self.backoff.validate()?;

        let mut policy = RetryPolicy::new(self.max_attempts, self.backoff);
        policy.jitter = self.jitter;
        policy.on_retry = self.on_retry;
        if let Some(retry_if) = self.retry_if {
            policy.retry_if = retry_if;
        }
        if let Some(clock) = self.clock {
            policy.clock = clock;
        }
        Ok(policy)
    }
}
