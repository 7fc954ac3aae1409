//! Fallback values for recognised failures
//!
//! A fallback only swallows failures its trigger predicate accepts. There is
//! no default trigger: callers either name the failures to handle or opt in
//! to [`handle_all`](FallbackPolicyBuilder::handle_all) explicitly.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info};

use crate::observability::{FailurePredicate, OnFallback};
use crate::{ConfigError, ConfigResult, FailureKind, Policy, ResilienceError, ResilienceResult};

/// Source of substitute values
pub trait FallbackStrategy<T, E>: Send + Sync {
    /// Produce the substitute for `error`
    fn fallback(&self, error: &ResilienceError<E>) -> T;
}

/// Returns a clone of a fixed value
#[derive(Debug, Clone)]
pub struct ValueFallback<T> {
    value: T,
}

impl<T> ValueFallback<T> {
    /// Create new value fallback
    pub const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Clone + Send + Sync, E> FallbackStrategy<T, E> for ValueFallback<T> {
    fn fallback(&self, _error: &ResilienceError<E>) -> T {
        self.value.clone()
    }
}

/// Computes the substitute from the failure
pub struct FunctionFallback<F> {
    function: F,
}

impl<F> FunctionFallback<F> {
    /// Create new function fallback
    pub const fn new(function: F) -> Self {
        Self { function }
    }
}

impl<T, E, F> FallbackStrategy<T, E> for FunctionFallback<F>
where
    F: Fn(&ResilienceError<E>) -> T + Send + Sync,
{
    fn fallback(&self, error: &ResilienceError<E>) -> T {
        (self.function)(error)
    }
}

/// Fallback policy
pub struct FallbackPolicy<T, E> {
    trigger: FailurePredicate<E>,
    strategy: Arc<dyn FallbackStrategy<T, E>>,
    on_fallback: Option<OnFallback<E>>,
}

impl<T, E> Clone for FallbackPolicy<T, E> {
    fn clone(&self) -> Self {
        Self {
            trigger: Arc::clone(&self.trigger),
            strategy: Arc::clone(&self.strategy),
            on_fallback: self.on_fallback.clone(),
        }
    }
}

impl<T, E> fmt::Debug for FallbackPolicy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackPolicy").finish_non_exhaustive()
    }
}

impl<T: 'static, E: 'static> FallbackPolicy<T, E> {
    /// Start building a fallback policy
    pub fn builder() -> FallbackPolicyBuilder<T, E> {
        FallbackPolicyBuilder {
            trigger: None,
            strategy: None,
            on_fallback: None,
        }
    }

    /// Execute the operation, substituting the fallback for triggering failures
    #[tracing::instrument(skip_all, fields(pattern = "fallback"))]
    pub async fn execute<F, Fut>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T, E>>,
    {
        match operation().await {
            Ok(value) => Ok(value),
            Err(error) if (self.trigger)(&error) => {
                info!(kind = %error.kind(), "substituting fallback value");
                if let Some(on_fallback) = &self.on_fallback {
                    on_fallback(&error);
                }
                Ok(self.strategy.fallback(&error))
            }
            Err(error) => {
                debug!(kind = %error.kind(), "failure does not trigger fallback");
                Err(error)
            }
        }
    }
}

impl<T, E> Policy<T, E> for FallbackPolicy<T, E>
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

/// Builder for [`FallbackPolicy`]
pub struct FallbackPolicyBuilder<T, E> {
    trigger: Option<FailurePredicate<E>>,
    strategy: Option<Arc<dyn FallbackStrategy<T, E>>>,
    on_fallback: Option<OnFallback<E>>,
}

impl<T: 'static, E: 'static> FallbackPolicyBuilder<T, E> {
    /// Substitute failures matching `predicate`
    #[must_use]
    pub fn handle<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ResilienceError<E>) -> bool + Send + Sync + 'static,
    {
        self.trigger = Some(Arc::new(predicate));
        self
    }

    /// Substitute failures of the given kinds
    #[must_use]
    pub fn handle_kinds(self, kinds: &[FailureKind]) -> Self {
        let kinds = kinds.to_vec();
        self.handle(move |error| kinds.contains(&error.kind()))
    }

    /// Substitute every failure
    #[must_use]
    pub fn handle_all(self) -> Self {
        self.handle(|_| true)
    }

    /// Return a clone of `value`
    #[must_use]
    pub fn value(self, value: T) -> Self
    where
        T: Clone + Send + Sync,
    {
        self.strategy(ValueFallback::new(value))
    }

    /// Compute the substitute from the failure
    #[must_use]
    pub fn with<F>(self, function: F) -> Self
    where
        F: Fn(&ResilienceError<E>) -> T + Send + Sync + 'static,
    {
        self.strategy(FunctionFallback::new(function))
    }

    /// Use a custom strategy
    #[must_use]
    pub fn strategy<S>(mut self, strategy: S) -> Self
    where
        S: FallbackStrategy<T, E> + 'static,
    {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    /// Observer called with the swallowed failure
    #[must_use]
    pub fn on_fallback<O>(mut self, observer: O) -> Self
    where
        O: Fn(&ResilienceError<E>) + Send + Sync + 'static,
    {
        self.on_fallback = Some(Arc::new(observer));
        self
    }

    /// Build the policy; both a trigger and a strategy are required
    pub fn build(self) -> ConfigResult<FallbackPolicy<T, E>> {
        let trigger = self.trigger.ok_or(ConfigError::missing("trigger"))?;
        let strategy = self.strategy.ok_or(ConfigError::missing("fallback"))?;
        Ok(FallbackPolicy {
            trigger,
            strategy,
            on_fallback: self.on_fallback,
        })
    }
}
