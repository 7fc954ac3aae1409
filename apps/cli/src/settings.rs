//! Layered scenario settings
//!
//! Built-in defaults, then an optional TOML file, then `RAMPART_*`
//! environment variables (`__` separates nested keys, e.g.
//! `RAMPART_DATABASE__CIRCUIT_BREAKER__FAILURE_THRESHOLD=2`).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, ensure};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use rampart_resilience::{
    BackoffKind, CircuitBreakerConfig, RetryConfig, TimeoutConfig, TimeoutStrategy,
};
use serde::{Deserialize, Serialize};

/// Settings for every scenario
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub api: ApiSettings,
    pub database: DatabaseSettings,
    pub queue: QueueSettings,
    pub notify: NotifySettings,
}

/// External API called through retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiSettings {
    pub retry: RetryConfig,
    /// Calls that fail before the service answers
    pub failures_before_success: u32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            // 2s, 4s, 8s
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_secs(2),
                backoff: BackoffKind::Exponential,
                ..RetryConfig::default()
            },
            failures_before_success: 2,
        }
    }
}

/// Flaky database behind retry and a circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSettings {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Logical calls made by the scenario
    pub calls: u32,
    /// Pause between logical calls
    #[serde(with = "humantime_serde")]
    pub call_interval: Duration,
    /// Probability that a query fails
    pub failure_rate: f64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            retry: RetryConfig {
                max_attempts: 2,
                base_delay: Duration::from_millis(500),
                backoff: BackoffKind::Fixed,
                ..RetryConfig::default()
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                break_duration: Duration::from_secs(5),
            },
            calls: 8,
            call_interval: Duration::from_millis(700),
            failure_rate: 0.7,
        }
    }
}

/// Slow queue bounded by a timeout, with a local fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSettings {
    pub timeout: TimeoutConfig,
    /// Messages sent by the scenario
    pub messages: u32,
    #[serde(with = "humantime_serde")]
    pub min_send_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_send_delay: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            timeout: TimeoutConfig {
                duration: Duration::from_secs(2),
                strategy: TimeoutStrategy::Forced,
            },
            messages: 3,
            min_send_delay: Duration::from_millis(500),
            max_send_delay: Duration::from_secs(3),
        }
    }
}

/// File read and push send through the retry helper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifySettings {
    pub retry_count: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    pub payload_path: String,
    pub device_id: String,
    /// Reads that fail with an I/O error before the payload is returned
    pub file_failures: u32,
    /// Sends that fail with a network error before the push goes out
    pub send_failures: u32,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            retry_count: 5,
            initial_delay: Duration::from_millis(500),
            payload_path: "notification.json".to_string(),
            device_id: "device-123".to_string(),
            file_failures: 3,
            send_failures: 2,
        }
    }
}

impl Settings {
    /// Merge defaults, the optional file and the environment
    pub fn load(config: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = config {
            ensure!(path.exists(), "config file {} not found", path.display());
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("RAMPART_").split("__"))
            .extract()
            .context("invalid configuration")
    }

    /// Check every section
    pub fn validate(&self) -> anyhow::Result<()> {
        self.api.retry.validate().context("api.retry")?;
        self.database.retry.validate().context("database.retry")?;
        self.database
            .circuit_breaker
            .validate()
            .context("database.circuit_breaker")?;
        ensure!(
            (0.0..=1.0).contains(&self.database.failure_rate),
            "database.failure_rate must be within 0.0..=1.0, got {}",
            self.database.failure_rate
        );
        self.queue.timeout.validate().context("queue.timeout")?;
        ensure!(
            self.queue.min_send_delay <= self.queue.max_send_delay,
            "queue.min_send_delay {:?} exceeds queue.max_send_delay {:?}",
            self.queue.min_send_delay,
            self.queue.max_send_delay
        );
        Ok(())
    }

    /// Multiply every duration by `factor`
    #[must_use]
    pub fn scaled(mut self, factor: f64) -> Self {
        let scale = |duration: Duration| {
            Duration::try_from_secs_f64(duration.as_secs_f64() * factor).unwrap_or(Duration::MAX)
        };
        let scale_retry = |retry: &mut RetryConfig| {
            retry.base_delay = scale(retry.base_delay);
            retry.max_delay = retry.max_delay.map(scale);
        };

        scale_retry(&mut self.api.retry);
        scale_retry(&mut self.database.retry);
        self.database.circuit_breaker.break_duration =
            scale(self.database.circuit_breaker.break_duration);
        self.database.call_interval = scale(self.database.call_interval);
        self.queue.timeout.duration = scale(self.queue.timeout.duration);
        self.queue.min_send_delay = scale(self.queue.min_send_delay);
        self.queue.max_send_delay = scale(self.queue.max_send_delay);
        self.notify.initial_delay = scale(self.notify.initial_delay);
        self
    }
}
