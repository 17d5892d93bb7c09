//! # Execution Tracker (C7)
//!
//! Single-flight guard keyed by `task_name` (or `task_name:key` when the
//! caller supplies a dedup key). `TryStart` is the only writer for a given
//! key; concurrent callers race on the same `DashMap` entry so at most one
//! observes `true`.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tasker_shared::clock::SharedClock;
use tasker_shared::error::TaskerError;
use tasker_shared::wire::ExecutionRecord;

fn tracker_key(task_name: &str, key: Option<&str>) -> String {
    match key {
        Some(key) => format!("{task_name}:{key}"),
        None => task_name.to_string(),
    }
}

#[async_trait]
pub trait ExecutionTracker: Send + Sync + std::fmt::Debug {
    async fn try_start(
        &self,
        task_name: &str,
        task_id: &str,
        key: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<bool, TaskerError>;

    async fn stop(&self, task_name: &str, task_id: &str, key: Option<&str>) -> Result<(), TaskerError>;

    /// Discards expired records. Intended to be called periodically by a
    /// background sweep rather than on the hot path.
    async fn sweep_expired(&self) -> Result<usize, TaskerError>;
}

#[derive(Debug)]
pub struct InMemoryExecutionTracker {
    records: DashMap<String, ExecutionRecord>,
    clock: SharedClock,
    default_timeout: Duration,
}

impl InMemoryExecutionTracker {
    pub fn new(clock: SharedClock, default_timeout: Duration) -> Self {
        Self {
            records: DashMap::new(),
            clock,
            default_timeout,
        }
    }
}

#[async_trait]
impl ExecutionTracker for InMemoryExecutionTracker {
    async fn try_start(
        &self,
        task_name: &str,
        task_id: &str,
        key: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<bool, TaskerError> {
        let now = self.clock.now();
        let lookup_key = tracker_key(task_name, key);
        let lease = timeout.unwrap_or(self.default_timeout);
        let expires_at = now + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero());

        let mut started = false;
        self.records
            .entry(lookup_key)
            .and_modify(|existing| {
                if existing.expires_at <= now {
                    existing.task_id = task_id.to_string();
                    existing.started_at = now;
                    existing.expires_at = expires_at;
                    started = true;
                }
            })
            .or_insert_with(|| {
                started = true;
                ExecutionRecord {
                    task_id: task_id.to_string(),
                    started_at: now,
                    expires_at,
                }
            });

        Ok(started)
    }

    async fn stop(&self, task_name: &str, task_id: &str, key: Option<&str>) -> Result<(), TaskerError> {
        let lookup_key = tracker_key(task_name, key);
        self.records.remove_if(&lookup_key, |_, record| record.task_id == task_id);
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<usize, TaskerError> {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at > now);
        Ok(before - self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tasker_shared::clock::FixedClock;

    #[tokio::test]
    async fn single_flight_rejects_concurrent_start() {
        let tracker = InMemoryExecutionTracker::new(Arc::new(FixedClock::new(chrono::Utc::now())), Duration::from_secs(30));
        assert!(tracker.try_start("email.send", "t1", None, None).await.unwrap());
        assert!(!tracker.try_start("email.send", "t2", None, None).await.unwrap());
    }

    #[tokio::test]
    async fn stop_only_removes_matching_task_id() {
        let tracker = InMemoryExecutionTracker::new(Arc::new(FixedClock::new(chrono::Utc::now())), Duration::from_secs(30));
        tracker.try_start("email.send", "t1", None, None).await.unwrap();

        tracker.stop("email.send", "wrong-id", None).await.unwrap();
        assert!(!tracker.try_start("email.send", "t2", None, None).await.unwrap());

        tracker.stop("email.send", "t1", None).await.unwrap();
        assert!(tracker.try_start("email.send", "t2", None, None).await.unwrap());
    }

    #[tokio::test]
    async fn expired_record_allows_restart() {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let tracker = InMemoryExecutionTracker::new(clock.clone(), Duration::from_secs(1));
        tracker.try_start("email.send", "t1", None, None).await.unwrap();

        clock.advance(chrono::Duration::seconds(2));
        assert!(tracker.try_start("email.send", "t2", None, None).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_discards_expired_only() {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let tracker = InMemoryExecutionTracker::new(clock.clone(), Duration::from_secs(1));
        tracker.try_start("a", "t1", None, None).await.unwrap();
        tracker
            .try_start("b", "t2", None, Some(Duration::from_secs(100)))
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(2));
        let swept = tracker.sweep_expired().await.unwrap();
        assert_eq!(swept, 1);
    }
}
