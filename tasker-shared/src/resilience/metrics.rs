//! # Circuit Breaker Metrics
//!
//! Observability snapshot for a circuit breaker instance: call counts,
//! rates, durations, enough to drive health reporting and alerting without
//! reaching into the breaker's internal atomics.

use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u64,
    pub half_open_calls: u64,
    pub total_duration: Duration,
    pub current_state: CircuitState,
    /// 0.0 to 1.0.
    pub failure_rate: f64,
    /// 0.0 to 1.0.
    pub success_rate: f64,
    pub average_duration: Duration,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            half_open_calls: 0,
            total_duration: Duration::ZERO,
            current_state: CircuitState::Closed,
            failure_rate: 0.0,
            success_rate: 0.0,
            average_duration: Duration::ZERO,
        }
    }

    pub fn calls_per_second(&self) -> f64 {
        if self.total_duration.is_zero() {
            return 0.0;
        }
        self.total_calls as f64 / self.total_duration.as_secs_f64()
    }

    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing system health",
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Success: {:.1}% | Failures: {} | Avg Duration: {:.2}ms",
            self.state_description(),
            self.total_calls,
            self.success_rate * 100.0,
            self.failure_count,
            self.average_duration.as_millis()
        )
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Collector hook for integration with a monitoring system. Kept separate
/// from `CircuitBreakerMetrics` itself so the breaker never depends on a
/// specific exporter.
pub trait MetricsCollector: Send + Sync + std::fmt::Debug {
    fn record_circuit_breaker_metrics(&self, name: &str, metrics: &CircuitBreakerMetrics);

    fn record_state_transition(&self, name: &str, from: CircuitState, to: CircuitState);

    fn record_operation_timing(&self, name: &str, duration: Duration, success: bool);
}

/// Collector that forwards everything to structured logs via `tracing`.
/// The default when no dedicated metrics backend is wired up.
#[derive(Debug, Default)]
pub struct TracingMetricsCollector;

impl MetricsCollector for TracingMetricsCollector {
    fn record_circuit_breaker_metrics(&self, name: &str, metrics: &CircuitBreakerMetrics) {
        tracing::info!(
            circuit_breaker = name,
            total_calls = metrics.total_calls,
            success_count = metrics.success_count,
            failure_count = metrics.failure_count,
            failure_rate = metrics.failure_rate,
            state = ?metrics.current_state,
            "circuit breaker metrics"
        );
    }

    fn record_state_transition(&self, name: &str, from: CircuitState, to: CircuitState) {
        tracing::info!(
            circuit_breaker = name,
            from_state = ?from,
            to_state = ?to,
            "circuit breaker state transition"
        );
    }

    fn record_operation_timing(&self, name: &str, duration: Duration, success: bool) {
        tracing::debug!(
            circuit_breaker = name,
            duration_ms = duration.as_millis(),
            success = success,
            "operation timing"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_is_healthy() {
        let metrics = CircuitBreakerMetrics::new();
        assert_eq!(metrics.total_calls, 0);
        assert_eq!(metrics.current_state, CircuitState::Closed);
        assert!(metrics.is_healthy());
    }

    #[test]
    fn health_follows_state_and_failure_rate() {
        let mut metrics = CircuitBreakerMetrics::new();

        metrics.current_state = CircuitState::Closed;
        metrics.failure_rate = 0.05;
        assert!(metrics.is_healthy());

        metrics.failure_rate = 0.15;
        assert!(!metrics.is_healthy());

        metrics.current_state = CircuitState::Open;
        metrics.failure_rate = 0.0;
        assert!(!metrics.is_healthy());

        metrics.current_state = CircuitState::HalfOpen;
        assert!(metrics.is_healthy());
    }
}
