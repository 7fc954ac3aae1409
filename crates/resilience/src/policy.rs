//! Policy trait and composition
//!
//! A policy decorates a call to an operation. [`Compose`] is the only
//! combinator: `Compose::new(outer, inner).execute(op)` runs
//! `outer.execute(|| inner.execute(op))`. Composition is associative but not
//! commutative, the order of layers changes what each layer observes.
//!
//! The recommended order for outbound calls, outermost first:
//!
//! ```text
//! Fallback        substitutes a value for recognised failures
//!   Retry         re-invokes everything below it
//!     Breaker     sees every individual attempt, fails fast when open
//!       Timeout   bounds each attempt
//!         operation
//! ```
//!
//! With the breaker inside the retry loop the breaker counts each attempt, and
//! once it opens the retry loop stops on the first `CircuitOpen` (not retried
//! by default). Putting the breaker outside retry instead makes the breaker see
//! a single outcome per logical call, the final one after retries.
//!
//! Keep the timeout innermost. A forced timeout runs everything below it on a
//! task it abandons at the deadline, so observers of layers inside it may run
//! after the caller has already returned. A panic from such an observer is
//! counted in [`AbandonedStats`](crate::AbandonedStats) instead of unwinding
//! through `execute`.

use std::future::Future;
use std::sync::Arc;

use crate::ResilienceResult;

/// A resilience layer that can execute an operation
///
/// The operation is a factory of futures so that layers such as retry can
/// invoke it more than once. Operations must be `'static`: forced timeouts
/// move the operation onto its own task.
pub trait Policy<T, E>: Send + Sync {
    /// Execute `operation` under this policy
    fn execute<F, Fut>(&self, operation: F) -> impl Future<Output = ResilienceResult<T, E>> + Send
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResilienceResult<T, E>> + Send + 'static;
}

/// Two policies chained so that `outer` wraps `inner`
#[derive(Debug, Clone)]
pub struct Compose<O, I> {
    outer: O,
    inner: I,
}

impl<O, I> Compose<O, I> {
    /// Chain `outer` around `inner`
    pub const fn new(outer: O, inner: I) -> Self {
        Self { outer, inner }
    }

    /// The wrapping layer
    pub const fn outer(&self) -> &O {
        &self.outer
    }

    /// The wrapped layer
    pub const fn inner(&self) -> &I {
        &self.inner
    }
}

/// Chain `outer` around `inner`
pub const fn compose<O, I>(outer: O, inner: I) -> Compose<O, I> {
    Compose::new(outer, inner)
}

impl<T, E, O, I> Policy<T, E> for Compose<O, I>
where
    T: Send + 'static,
    E: Send + 'static,
    O: Policy<T, E>,
    I: Policy<T, E> + Clone + 'static,
{
    fn execute<F, Fut>(&self, operation: F) -> impl Future<Output = ResilienceResult<T, E>> + Send
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResilienceResult<T, E>> + Send + 'static,
    {
        let inner = self.inner.clone();
        let operation = Arc::new(operation);
        self.outer.execute(move || {
            let inner = inner.clone();
            let operation = Arc::clone(&operation);
            async move { inner.execute(move || operation()).await }
        })
    }
}

/// Layer that calls the operation directly
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl<T, E> Policy<T, E> for PassThrough
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn execute<F, Fut>(&self, operation: F) -> impl Future<Output = ResilienceResult<T, E>> + Send
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResilienceResult<T, E>> + Send + 'static,
    {
        operation()
    }
}

/// An absent layer behaves like [`PassThrough`]
impl<T, E, P> Policy<T, E> for Option<P>
where
    T: Send + 'static,
    E: Send + 'static,
    P: Policy<T, E>,
{
    fn execute<F, Fut>(&self, operation: F) -> impl Future<Output = ResilienceResult<T, E>> + Send
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResilienceResult<T, E>> + Send + 'static,
    {
        async move {
            match self {
                Some(policy) => policy.execute(operation).await,
                None => operation().await,
            }
        }
    }
}

/// Fluent composition for any policy value
pub trait PolicyExt: Sized {
    /// Wrap `inner` with `self` as the outer layer
    fn wrap<I>(self, inner: I) -> Compose<Self, I> {
        Compose::new(self, inner)
    }
}

impl<P: Clone + Send + Sync + 'static> PolicyExt for P {}
