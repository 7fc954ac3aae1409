//! # Rampart Resilience
//!
//! Composable resilience policies for calls to unreliable dependencies.
//!
//! ## Features
//!
//! - **Retry**: re-invoke failed operations with pluggable backoff and jitter
//! - **Circuit Breaker**: stop calling a failing dependency for a cooldown period
//! - **Timeout**: cooperative or forced deadlines with cancellation tokens
//! - **Fallback**: substitute values for recognised failures only
//! - **Composition**: nest any policies with [`Compose`] / [`PolicyExt::wrap`]
//!
//! ## Quick Start
//!
//! ```rust
//! use rampart_resilience::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let retry = RetryPolicy::<String>::builder()
//!     .max_attempts(3)
//!     .backoff(Backoff::exponential(Duration::from_millis(10)))
//!     .build()?;
//! let breaker = CircuitBreaker::<String>::new(3, Duration::from_secs(5))?;
//! let timeout = TimeoutPolicy::new(Duration::from_secs(2))?;
//!
//! // Every retry attempt passes the breaker and is bounded by the timeout
//! let pipeline = retry.wrap(breaker.wrap(timeout));
//!
//! let value: u32 = pipeline.execute(|| async { Ok(42) }).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ## Failures
//!
//! The operation's own failure travels as [`ResilienceError::Operation`] and
//! is never re-wrapped. Policies add two kinds of their own:
//! [`ResilienceError::CircuitOpen`] and [`ResilienceError::Timeout`].

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod clock;
pub mod config;
pub mod error;
pub mod helper;
pub mod observability;
pub mod patterns;
pub mod policy;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{
    BackoffKind, CircuitBreakerConfig, Pipeline, ResilienceConfig, RetryConfig, TimeoutConfig,
};
pub use error::{ConfigError, ConfigResult, FailureKind, ResilienceError, ResilienceResult};
pub use helper::RetryHelper;
pub use patterns::{
    AbandonedStats, Backoff, CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerStats,
    CircuitState, FallbackPolicy, FallbackPolicyBuilder, FallbackStrategy, FunctionFallback,
    JitterPolicy, RetryPolicy, RetryPolicyBuilder, TimeoutPolicy, TimeoutPolicyBuilder,
    TimeoutStrategy, ValueFallback,
};
pub use policy::{Compose, PassThrough, Policy, PolicyExt, compose};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        Backoff, CircuitBreaker, FallbackPolicy, Policy, PolicyExt, ResilienceError,
        ResilienceResult, RetryHelper, RetryPolicy, TimeoutPolicy, TimeoutStrategy,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
