//! Resilience primitives: per-task-kind circuit breakers and a process-wide
//! kill switch, plus the metrics types both report through.

mod behavior;
mod circuit_breaker;
mod kill_switch;
mod metrics;

pub use behavior::CircuitBreakerBehavior;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use kill_switch::{KillSwitch, KillSwitchConfig, KillSwitchState};
pub use metrics::{CircuitBreakerMetrics, MetricsCollector, TracingMetricsCollector};
