//! # Circuit Breaker (C13a)
//!
//! Per-key closed/open/half-open gate. Trips after `failure_threshold`
//! consecutive failures; once open, no call is admitted until `timeout`
//! has elapsed, at which point exactly one probe is admitted
//! (transitioning to half-open); `success_threshold` consecutive successes
//! in half-open close the circuit, and any failure in half-open reopens it
//! (spec §4.13, §8 boundary behavior "a tripped breaker admits exactly one
//! probe after `open_duration`").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::resilience::{CircuitBreakerBehavior, CircuitBreakerMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Mutable bookkeeping behind the atomics/mutex split: state transitions
/// and the half-open probe gate need a lock; call counters are tracked
/// separately via atomics so the hot path (`should_allow`) stays lock-light.
#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    /// Set once a half-open probe has been admitted, so only one call at a
    /// time tests recovery.
    half_open_probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    half_open_calls: AtomicU64,
    total_duration_micros: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
                half_open_probe_in_flight: false,
            }),
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            half_open_calls: AtomicU64::new(0),
            total_duration_micros: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).state
    }

    /// Checks whether a call may proceed, lazily transitioning Open →
    /// HalfOpen once `timeout` has elapsed and admitting exactly one probe.
    pub fn should_allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !inner.half_open_probe_in_flight,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
                if elapsed >= self.config.timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_probe_in_flight = true;
                    info!(circuit_breaker = %self.name, "circuit breaker transitioning to half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success_manual(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.consecutive_failures = 0;
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.half_open_probe_in_flight = false;
                inner.half_open_successes += 1;
                self.half_open_calls.fetch_add(1, Ordering::Relaxed);
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    info!(circuit_breaker = %self.name, "circuit breaker closed after recovery");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure_manual(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    info!(
                        circuit_breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_probe_in_flight = false;
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_failures = self.config.failure_threshold;
                info!(circuit_breaker = %self.name, "circuit breaker reopened after half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn force_open(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
    }

    pub fn force_closed(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.opened_at = None;
        inner.half_open_probe_in_flight = false;
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let success_count = self.success_count.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let total_duration = Duration::from_micros(self.total_duration_micros.load(Ordering::Relaxed));

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            consecutive_failures: inner.consecutive_failures as u64,
            half_open_calls: self.half_open_calls.load(Ordering::Relaxed),
            total_duration,
            current_state: inner.state,
            failure_rate: if total_calls > 0 {
                failure_count as f64 / total_calls as f64
            } else {
                0.0
            },
            success_rate: if total_calls > 0 {
                success_count as f64 / total_calls as f64
            } else {
                0.0
            },
            average_duration: if total_calls > 0 {
                total_duration / total_calls as u32
            } else {
                Duration::ZERO
            },
        }
    }
}

impl CircuitBreakerBehavior for CircuitBreaker {
    fn name(&self) -> &str {
        self.name()
    }

    fn state(&self) -> CircuitState {
        self.state()
    }

    fn should_allow(&self) -> bool {
        self.should_allow()
    }

    fn record_success(&self, duration: Duration) {
        self.record_success_manual(duration);
    }

    fn record_failure(&self, duration: Duration) {
        self.record_failure_manual(duration);
    }

    fn is_healthy(&self) -> bool {
        self.is_healthy()
    }

    fn force_open(&self) {
        self.force_open();
    }

    fn force_closed(&self) {
        self.force_closed();
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        self.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let breaker = CircuitBreaker::new("test".to_string(), CircuitBreakerConfig::default());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.should_allow());
    }

    #[test]
    fn opens_after_threshold_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            timeout: Duration::from_secs(60),
            success_threshold: 2,
        };
        let breaker = CircuitBreaker::new("test".to_string(), config);

        breaker.record_failure_manual(Duration::ZERO);
        breaker.record_failure_manual(Duration::ZERO);
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure_manual(Duration::ZERO);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.should_allow());
    }

    #[test]
    fn half_open_admits_single_probe_after_timeout() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_millis(0),
            success_threshold: 2,
        };
        let breaker = CircuitBreaker::new("test".to_string(), config);

        breaker.record_failure_manual(Duration::ZERO);
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(breaker.should_allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // A second concurrent call must not get another probe.
        assert!(!breaker.should_allow());
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_millis(0),
            success_threshold: 2,
        };
        let breaker = CircuitBreaker::new("test".to_string(), config);

        breaker.record_failure_manual(Duration::ZERO);
        assert!(breaker.should_allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success_manual(Duration::ZERO);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(breaker.should_allow());
        breaker.record_success_manual(Duration::ZERO);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_millis(0),
            success_threshold: 2,
        };
        let breaker = CircuitBreaker::new("test".to_string(), config);

        breaker.record_failure_manual(Duration::ZERO);
        assert!(breaker.should_allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure_manual(Duration::ZERO);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn force_operations() {
        let breaker = CircuitBreaker::new("test".to_string(), CircuitBreakerConfig::default());
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.force_closed();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
