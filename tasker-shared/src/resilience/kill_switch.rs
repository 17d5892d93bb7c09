//! # Kill Switch (C13b)
//!
//! Global emergency brake, distinct from the per-task-kind circuit breaker:
//! it tracks a rolling window of outcomes across the whole worker process
//! and trips when the aggregate failure rate crosses a threshold, not when
//! any single task kind is unhealthy. Meant to catch systemic failure
//! (database down, broker unreachable) that individual breakers, scoped to
//! one task kind, would each absorb independently without ever tripping.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSwitchState {
    Ready,
    Tracking,
    Tripped,
}

#[derive(Debug, Clone)]
pub struct KillSwitchConfig {
    /// How long a sample stays in the tracking window before it's pruned.
    pub tracking_window: Duration,
    /// Minimum samples collected before the failure rate is evaluated.
    pub activation_threshold: usize,
    /// Failure rate (0.0-1.0) at or above which the switch trips.
    pub trip_threshold: f64,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            tracking_window: Duration::from_secs(60),
            activation_threshold: 20,
            trip_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    success: bool,
}

#[derive(Debug)]
struct Inner {
    samples: VecDeque<Sample>,
    tripped: bool,
}

/// Process-wide kill switch. One instance shared via `Arc` across the
/// worker loop and every executor task.
#[derive(Debug)]
pub struct KillSwitch {
    config: KillSwitchConfig,
    inner: Mutex<Inner>,
}

impl KillSwitch {
    pub fn new(config: KillSwitchConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                samples: VecDeque::new(),
                tripped: false,
            }),
        }
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        let window = self.config.tracking_window;
        while let Some(front) = inner.samples.front() {
            if now.duration_since(front.at) > window {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&self, success: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.prune(&mut inner, now);
        inner.samples.push_back(Sample { at: now, success });

        if inner.samples.len() < self.config.activation_threshold {
            return;
        }

        let failures = inner.samples.iter().filter(|s| !s.success).count();
        let failure_rate = failures as f64 / inner.samples.len() as f64;

        if failure_rate >= self.config.trip_threshold {
            inner.tripped = true;
        }
    }

    pub fn record_success(&self) {
        self.record(true);
    }

    pub fn record_failure(&self) {
        self.record(false);
    }

    pub fn state(&self) -> KillSwitchState {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.prune(&mut inner, Instant::now());
        if inner.tripped {
            KillSwitchState::Tripped
        } else if inner.samples.is_empty() {
            KillSwitchState::Ready
        } else {
            KillSwitchState::Tracking
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.state() == KillSwitchState::Tripped
    }

    /// Clears the tripped flag and discards all tracked samples. Intended
    /// for an operator action (admin endpoint or signal) once the
    /// underlying incident is resolved.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.samples.clear();
        inner.tripped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_with_no_samples() {
        let switch = KillSwitch::new(KillSwitchConfig::default());
        assert_eq!(switch.state(), KillSwitchState::Ready);
        assert!(!switch.is_tripped());
    }

    #[test]
    fn tracking_before_activation_threshold() {
        let config = KillSwitchConfig {
            activation_threshold: 10,
            ..KillSwitchConfig::default()
        };
        let switch = KillSwitch::new(config);
        for _ in 0..5 {
            switch.record_failure();
        }
        assert_eq!(switch.state(), KillSwitchState::Tracking);
        assert!(!switch.is_tripped());
    }

    #[test]
    fn trips_once_failure_rate_crosses_threshold() {
        let config = KillSwitchConfig {
            activation_threshold: 10,
            trip_threshold: 0.5,
            ..KillSwitchConfig::default()
        };
        let switch = KillSwitch::new(config);
        for _ in 0..6 {
            switch.record_failure();
        }
        for _ in 0..4 {
            switch.record_success();
        }
        assert!(switch.is_tripped());
    }

    #[test]
    fn stays_ready_when_failures_stay_below_threshold() {
        let config = KillSwitchConfig {
            activation_threshold: 10,
            trip_threshold: 0.5,
            ..KillSwitchConfig::default()
        };
        let switch = KillSwitch::new(config);
        for _ in 0..2 {
            switch.record_failure();
        }
        for _ in 0..8 {
            switch.record_success();
        }
        assert!(!switch.is_tripped());
    }

    #[test]
    fn reset_clears_tripped_state() {
        let config = KillSwitchConfig {
            activation_threshold: 2,
            trip_threshold: 0.5,
            ..KillSwitchConfig::default()
        };
        let switch = KillSwitch::new(config);
        switch.record_failure();
        switch.record_failure();
        assert!(switch.is_tripped());
        switch.reset();
        assert_eq!(switch.state(), KillSwitchState::Ready);
    }
}
