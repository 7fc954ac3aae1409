//! Error types for resilience operations
//!
//! Every policy speaks [`ResilienceError<E>`], where `E` is the failure type of
//! the protected dependency. Policies resolve a failure (retry succeeds, a
//! fallback substitutes a value) or hand it upward untouched: an
//! [`Operation`](ResilienceError::Operation) failure raised by the dependency
//! reaches the caller exactly as it was produced.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Failure produced by a protected operation or by a policy around it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError<E> {
    /// The wrapped operation's own failure
    #[error("{0}")]
    Operation(E),

    /// Circuit breaker rejected the call without invoking the operation
    #[error("circuit breaker is open{}", retry_after_suffix(.retry_after))]
    CircuitOpen {
        /// Time left until the breaker admits a trial call, when known
        retry_after: Option<Duration>,
    },

    /// The operation did not finish before its deadline
    #[error("operation timed out after {elapsed:?} (limit {duration:?})")]
    Timeout {
        /// Configured deadline
        duration: Duration,
        /// Time actually spent waiting
        elapsed: Duration,
    },
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|duration| format!(" (retry after {duration:?})"))
        .unwrap_or_default()
}

/// Failure kind, used by predicates that only care about the category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Failure raised by the operation itself
    Transient,
    /// Rejected by an open circuit
    CircuitOpen,
    /// Deadline exceeded
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl<E> ResilienceError<E> {
    /// Classify the failure
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Operation(_) => FailureKind::Transient,
            Self::CircuitOpen { .. } => FailureKind::CircuitOpen,
            Self::Timeout { .. } => FailureKind::Timeout,
        }
    }

    /// Check if this is the operation's own failure
    pub const fn is_operation(&self) -> bool {
        matches!(self, Self::Operation(_))
    }

    /// Check if the call was rejected by an open circuit
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Check if the call exceeded its deadline
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Borrow the operation's failure, if this is one
    pub const fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(error) => Some(error),
            _ => None,
        }
    }

    /// Take the operation's failure, if this is one
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(error) => Some(error),
            _ => None,
        }
    }

    /// Hint for when a rejected call may succeed
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Map the operation's failure type, leaving policy failures untouched
    pub fn map_operation<F, U>(self, f: F) -> ResilienceError<U>
    where
        F: FnOnce(E) -> U,
    {
        match self {
            Self::Operation(error) => ResilienceError::Operation(f(error)),
            Self::CircuitOpen { retry_after } => ResilienceError::CircuitOpen { retry_after },
            Self::Timeout { duration, elapsed } => ResilienceError::Timeout { duration, elapsed },
        }
    }
}

/// Invalid policy configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value outside its valid range
    #[error("invalid `{field}`: {message}")]
    Validation {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// A required field was never set
    #[error("missing required `{field}`")]
    Missing {
        /// Field name
        field: &'static str,
    },
}

impl ConfigError {
    /// Create a validation error
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Create a missing-field error
    pub const fn missing(field: &'static str) -> Self {
        Self::Missing { field }
    }
}

/// Result type for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;
