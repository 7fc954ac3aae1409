//! Serializable policy configuration
//!
//! Each config mirrors the construction parameters of one policy, uses
//! human-readable durations (`"500ms"`, `"5s"`) and validates before it is
//! turned into a builder. Builders are returned rather than finished policies
//! so callers can still attach predicates, observers and a clock.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::patterns::{
    Backoff, CircuitBreaker, CircuitBreakerBuilder, JitterPolicy, RetryPolicy, RetryPolicyBuilder,
    TimeoutPolicy, TimeoutPolicyBuilder, TimeoutStrategy,
};
use crate::policy::Compose;
use crate::{ConfigError, ConfigResult};

/// Shape of the backoff curve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Constant delay
    Fixed,
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt-1)`
    #[default]
    Exponential,
}

/// Retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Backoff curve
    pub backoff: BackoffKind,
    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Option<Duration>,
    /// Randomisation on top of the curve
    pub jitter: JitterPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff: BackoffKind::Exponential,
            max_delay: None,
            jitter: JitterPolicy::None,
        }
    }
}

impl RetryConfig {
    /// Check the settings
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(max_delay) = self.max_delay
            && max_delay < self.base_delay
        {
            return Err(ConfigError::validation(
                "max_delay",
                format!("{max_delay:?} is below base_delay {:?}", self.base_delay),
            ));
        }
        Ok(())
    }

    /// Backoff provider described by these settings
    pub fn backoff(&self) -> Backoff {
        match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed(self.base_delay),
            BackoffKind::Linear => Backoff::Linear {
                step: self.base_delay,
                max: self.max_delay,
            },
            BackoffKind::Exponential => Backoff::Exponential {
                base: self.base_delay,
                max: self.max_delay,
            },
        }
    }

    /// Validated builder preloaded with these settings
    pub fn builder<E: 'static>(&self) -> ConfigResult<RetryPolicyBuilder<E>> {
        self.validate()?;
        Ok(RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .backoff(self.backoff())
            .jitter(self.jitter))
    }

    /// Build a retry policy with the default predicate
    pub fn build<E: 'static>(&self) -> ConfigResult<RetryPolicy<E>> {
        self.builder()?.build()
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open
    #[serde(with = "humantime_serde")]
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Check the settings
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::validation(
                "failure_threshold",
                "must be at least 1",
            ));
        }
        if self.break_duration.is_zero() {
            return Err(ConfigError::validation("break_duration", "must be positive"));
        }
        Ok(())
    }

    /// Validated builder preloaded with these settings
    pub fn builder<E: 'static>(&self) -> ConfigResult<CircuitBreakerBuilder<E>> {
        self.validate()?;
        Ok(CircuitBreaker::builder()
            .failure_threshold(self.failure_threshold)
            .break_duration(self.break_duration))
    }

    /// Build a breaker counting every failure
    pub fn build<E: 'static>(&self) -> ConfigResult<CircuitBreaker<E>> {
        self.builder()?.build()
    }
}

/// Timeout settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Deadline per call
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// What happens to late operations
    pub strategy: TimeoutStrategy,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
            strategy: TimeoutStrategy::Cooperative,
        }
    }
}

impl TimeoutConfig {
    /// Check the settings
    pub fn validate(&self) -> ConfigResult<()> {
        if self.duration.is_zero() {
            return Err(ConfigError::validation("duration", "must be positive"));
        }
        Ok(())
    }

    /// Validated builder preloaded with these settings
    pub fn builder(&self) -> ConfigResult<TimeoutPolicyBuilder> {
        self.validate()?;
        Ok(TimeoutPolicy::builder(self.duration).strategy(self.strategy))
    }

    /// Build a timeout policy
    pub fn build(&self) -> ConfigResult<TimeoutPolicy> {
        self.builder()?.build()
    }
}

/// Standard pipeline: retry around breaker around timeout
pub type Pipeline<E> =
    Compose<Option<RetryPolicy<E>>, Compose<Option<CircuitBreaker<E>>, Option<TimeoutPolicy>>>;

/// Settings for a full pipeline; absent sections become pass-through layers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceConfig {
    /// Retry layer
    pub retry: Option<RetryConfig>,
    /// Circuit breaker layer
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Timeout layer
    pub timeout: Option<TimeoutConfig>,
}

impl ResilienceConfig {
    /// Check every present section
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        if let Some(timeout) = &self.timeout {
            timeout.validate()?;
        }
        Ok(())
    }

    /// Build `Retry(CircuitBreaker(Timeout(op)))` from the present sections
    pub fn pipeline<E: 'static>(&self) -> ConfigResult<Pipeline<E>> {
        let retry = self.retry.as_ref().map(RetryConfig::build::<E>).transpose()?;
        let breaker = self
            .circuit_breaker
            .as_ref()
            .map(CircuitBreakerConfig::build::<E>)
            .transpose()?;
        let timeout = self.timeout.as_ref().map(TimeoutConfig::build).transpose()?;
        Ok(Compose::new(retry, Compose::new(breaker, timeout)))
    }
}
