//! Observer hooks for policy events
//!
//! Observers run synchronously on the task that triggered the event, after any
//! internal lock has been released. They are purely observational: their
//! return value is ignored and they cannot change the outcome of a call. A
//! panicking observer is a programming error and unwinds through `execute`.

use std::sync::Arc;
use std::time::Duration;

use crate::ResilienceError;

/// Called before sleeping between attempts: `(failure, delay, attempt)`
pub type OnRetry<E> = Arc<dyn Fn(&ResilienceError<E>, Duration, u32) + Send + Sync>;

/// Called when the breaker opens: `(last_failure, break_duration)`
pub type OnBreak<E> = Arc<dyn Fn(&ResilienceError<E>, Duration) + Send + Sync>;

/// Called on breaker state changes that carry no payload
/// (half-open trial admitted, breaker closed again)
pub type OnTransition = Arc<dyn Fn() + Send + Sync>;

/// Called when a call exceeds its deadline: `(elapsed)`
pub type OnTimeout = Arc<dyn Fn(Duration) + Send + Sync>;

/// Called when a fallback value replaces a failure
pub type OnFallback<E> = Arc<dyn Fn(&ResilienceError<E>) + Send + Sync>;

/// Predicate over failures, used by retry, breaker and fallback
pub type FailurePredicate<E> = Arc<dyn Fn(&ResilienceError<E>) -> bool + Send + Sync>;
