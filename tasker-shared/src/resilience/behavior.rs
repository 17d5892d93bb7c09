//! # Circuit Breaker Behavior Trait
//!
//! Unifies every circuit breaker implementation in the system (the generic
//! per-task-kind breaker, the kill switch's internal accounting) behind one
//! interface, so health reporting and metrics collection can work with
//! `&dyn CircuitBreakerBehavior` without knowing the concrete type.
//!
//! The trait is object-safe (`Send + Sync + Debug`); concrete types are
//! preferred in hot paths for zero-cost dispatch.

use crate::resilience::{CircuitBreakerMetrics, CircuitState};
use std::time::Duration;

/// Unified interface for all circuit breaker implementations.
pub trait CircuitBreakerBehavior: Send + Sync + std::fmt::Debug {
    /// Name of the component this breaker protects.
    fn name(&self) -> &str;

    fn state(&self) -> CircuitState;

    /// Whether the circuit currently allows the next call. `true` for
    /// Closed, `true` for HalfOpen (limited), and `true` for Open only once
    /// the recovery timeout has elapsed (transitioning to HalfOpen).
    fn should_allow(&self) -> bool;

    fn record_success(&self, duration: Duration);

    fn record_failure(&self, duration: Duration);

    fn is_healthy(&self) -> bool;

    /// Force the circuit open (emergency kill switch).
    fn force_open(&self);

    /// Force the circuit closed (emergency recovery).
    fn force_closed(&self);

    fn metrics(&self) -> CircuitBreakerMetrics;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time proof that `CircuitBreakerBehavior` is object-safe.
    fn _assert_object_safe(_: &dyn CircuitBreakerBehavior) {}
}
