//! # Clock Injection
//!
//! Every store contract that compares a record against "now" (expiry,
//! retention, delivery time) takes a [`Clock`] instead of calling
//! `Utc::now()` directly, so cleanup/expiry behavior is deterministic under
//! test. Production code uses [`SystemClock`], which is also the `Default`.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Anything that can report the current instant.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Shared handle to a clock, convenient for store constructors.
pub type SharedClock = Arc<dyn Clock>;

/// Build the default production clock handle.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// A fixed clock for deterministic time-based tests. Not gated behind
/// `#[cfg(test)]` so downstream crates can use it in their own test suites.
#[derive(Debug, Clone)]
pub struct FixedClock {
    instant: std::sync::Arc<std::sync::Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: std::sync::Arc::new(std::sync::Mutex::new(instant)),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut guard = self.instant.lock().unwrap();
        *guard += duration;
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.instant.lock().unwrap() = instant;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock().unwrap()
    }
}
