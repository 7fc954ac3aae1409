//! Resilience patterns

pub mod circuit_breaker;
pub mod fallback;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerStats, CircuitState};
pub use fallback::{
    FallbackPolicy, FallbackPolicyBuilder, FallbackStrategy, FunctionFallback, ValueFallback,
};
pub use retry::{Backoff, JitterPolicy, RetryPolicy, RetryPolicyBuilder};
pub use timeout::{AbandonedStats, TimeoutPolicy, TimeoutPolicyBuilder, TimeoutStrategy};
