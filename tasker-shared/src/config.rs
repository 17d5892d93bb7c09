//! # Configuration
//!
//! One aggregate `TaskerConfig`, loaded by layering a TOML file under
//! defaults and an environment overlay (`TASKER_` prefix, `__` as the
//! nesting separator), using the `config` crate the way every component
//! in this workspace expects its settings to arrive. Durations are stored
//! as plain seconds/millis on the wire and converted to `Duration` in
//! accessor methods, since TOML and environment variables don't carry a
//! native duration type.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::resilience::{CircuitBreakerConfig, KillSwitchConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_fraction: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            multiplier: 2.0,
            jitter_fraction: 0.2,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry attempt `attempt` (1-indexed), full-jittered
    /// within `[0, computed_delay]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms as f64 * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay_ms as f64);
        let jitter_floor = capped * (1.0 - self.jitter_fraction);
        let jittered = jitter_floor + fastrand::f64() * (capped - jitter_floor);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub default_capacity: u32,
    pub default_refill_per_second: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_capacity: 100,
            default_refill_per_second: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionLockConfig {
    pub default_lease_seconds: u64,
}

impl Default for PartitionLockConfig {
    fn default() -> Self {
        Self {
            default_lease_seconds: 30,
        }
    }
}

impl PartitionLockConfig {
    pub fn default_lease(&self) -> Duration {
        Duration::from_secs(self.default_lease_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub worker_queue_prefix: String,
    pub delayed_ready_queue: String,
    pub dead_letter_queue: String,
    pub prefetch: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            worker_queue_prefix: "worker".to_string(),
            delayed_ready_queue: "delayed_ready".to_string(),
            dead_letter_queue: "dead_letter".to_string(),
            prefetch: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub shutdown_grace_period_seconds: u64,
    pub heartbeat_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus(),
            shutdown_grace_period_seconds: 30,
            heartbeat_interval_seconds: 10,
        }
    }
}

impl WorkerConfig {
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayedDispatchConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for DelayedDispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            batch_size: 100,
        }
    }
}

impl DelayedDispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// TOML/env-facing mirror of [`CircuitBreakerConfig`], whose `timeout`
/// field is a `std::time::Duration` rather than a plain integer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_seconds: 30,
            success_threshold: 2,
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(value: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: value.failure_threshold,
            timeout: Duration::from_secs(value.timeout_seconds),
            success_threshold: value.success_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KillSwitchSettings {
    pub tracking_window_seconds: u64,
    pub activation_threshold: usize,
    pub trip_threshold: f64,
}

impl Default for KillSwitchSettings {
    fn default() -> Self {
        Self {
            tracking_window_seconds: 60,
            activation_threshold: 20,
            trip_threshold: 0.5,
        }
    }
}

impl From<&KillSwitchSettings> for KillSwitchConfig {
    fn from(value: &KillSwitchSettings) -> Self {
        Self {
            tracking_window: Duration::from_secs(value.tracking_window_seconds),
            activation_threshold: value.activation_threshold,
            trip_threshold: value.trip_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TaskerConfig {
    pub backoff: BackoffConfig,
    pub rate_limiter: RateLimiterConfig,
    pub partition_lock: PartitionLockConfig,
    pub broker: BrokerConfig,
    pub worker: WorkerConfig,
    pub delayed_dispatch: DelayedDispatchConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub kill_switch: KillSwitchSettings,
}

impl TaskerConfig {
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::from(&self.circuit_breaker)
    }

    pub fn kill_switch_config(&self) -> KillSwitchConfig {
        KillSwitchConfig::from(&self.kill_switch)
    }

    /// Loads configuration by layering, lowest precedence first: compiled
    /// defaults, an optional TOML file at `path`, then `TASKER_`-prefixed
    /// environment variables (`TASKER_WORKER__CONCURRENCY=8` sets
    /// `worker.concurrency`).
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let defaults = Config::try_from(&TaskerConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("TASKER")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
