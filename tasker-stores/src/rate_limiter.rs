//! # Rate Limiter (C5)
//!
//! Per-key sliding window. A denied acquire never counts against
//! `max_retries` — callers translate it into a `Retry` result with
//! `do_not_increment_retries=true`.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tasker_shared::clock::SharedClock;
use tasker_shared::error::TaskerError;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub limit: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct AcquireOutcome {
    pub allowed: bool,
    /// Set when `allowed=false`: how long until the oldest sample in the
    /// window ages out and a new permit frees up.
    pub retry_after: Option<Duration>,
}

#[async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    async fn try_acquire(&self, key: &str, rule: RateLimitRule) -> Result<AcquireOutcome, TaskerError>;
}

#[derive(Debug)]
struct Window {
    samples: Vec<chrono::DateTime<chrono::Utc>>,
}

/// Sliding-window limiter keyed by an arbitrary string (typically a task
/// name). Each key maintains its own timestamp list, pruned to the
/// configured window on every acquire.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    windows: DashMap<String, Window>,
    clock: SharedClock,
}

impl SlidingWindowRateLimiter {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowRateLimiter {
    async fn try_acquire(&self, key: &str, rule: RateLimitRule) -> Result<AcquireOutcome, TaskerError> {
        let now = self.clock.now();
        let window_start = now - chrono::Duration::from_std(rule.window).unwrap_or(chrono::Duration::zero());

        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            samples: Vec::new(),
        });
        entry.samples.retain(|ts| *ts > window_start);

        if entry.samples.len() < rule.limit as usize {
            entry.samples.push(now);
            return Ok(AcquireOutcome {
                allowed: true,
                retry_after: None,
            });
        }

        let oldest = entry.samples.first().copied().unwrap_or(now);
        let retry_after = (oldest + chrono::Duration::from_std(rule.window).unwrap_or(chrono::Duration::zero()) - now)
            .to_std()
            .unwrap_or(Duration::ZERO);

        Ok(AcquireOutcome {
            allowed: false,
            retry_after: Some(retry_after),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasker_shared::clock::{system_clock, FixedClock};
    use std::sync::Arc;

    #[tokio::test]
    async fn admits_up_to_limit_then_denies() {
        let limiter = SlidingWindowRateLimiter::new(system_clock());
        let rule = RateLimitRule {
            limit: 2,
            window: Duration::from_secs(60),
        };

        assert!(limiter.try_acquire("k", rule).await.unwrap().allowed);
        assert!(limiter.try_acquire("k", rule).await.unwrap().allowed);

        let denied = limiter.try_acquire("k", rule).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.retry_after.is_some());
    }

    #[tokio::test]
    async fn window_slides_with_clock() {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let limiter = SlidingWindowRateLimiter::new(clock.clone());
        let rule = RateLimitRule {
            limit: 1,
            window: Duration::from_secs(10),
        };

        assert!(limiter.try_acquire("k", rule).await.unwrap().allowed);
        assert!(!limiter.try_acquire("k", rule).await.unwrap().allowed);

        clock.advance(chrono::Duration::seconds(11));
        assert!(limiter.try_acquire("k", rule).await.unwrap().allowed);
    }
}
