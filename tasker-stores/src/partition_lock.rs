//! # Partition Lock Store (C6)
//!
//! Conditional-upsert lease: acquire succeeds if no row exists, the row is
//! expired, or the row is already held by the same holder (re-entrant
//! extend-on-acquire). Any other case is rejected so only one task id
//! holds a given partition key at a time.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tasker_shared::clock::SharedClock;
use tasker_shared::error::TaskerError;
use tasker_shared::wire::PartitionLock;

#[async_trait]
pub trait PartitionLockStore: Send + Sync + std::fmt::Debug {
    async fn try_acquire(
        &self,
        partition_key: &str,
        holder_task_id: &str,
        lease: Duration,
    ) -> Result<bool, TaskerError>;

    async fn release(&self, partition_key: &str, holder_task_id: &str) -> Result<(), TaskerError>;

    async fn is_locked(&self, partition_key: &str) -> Result<bool, TaskerError>;

    async fn get_lock_holder(&self, partition_key: &str) -> Result<Option<String>, TaskerError>;

    async fn extend(&self, partition_key: &str, holder_task_id: &str, lease: Duration) -> Result<bool, TaskerError>;
}

#[derive(Debug)]
pub struct InMemoryPartitionLockStore {
    locks: DashMap<String, PartitionLock>,
    clock: SharedClock,
}

impl InMemoryPartitionLockStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            locks: DashMap::new(),
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[async_trait]
impl PartitionLockStore for InMemoryPartitionLockStore {
    async fn try_acquire(
        &self,
        partition_key: &str,
        holder_task_id: &str,
        lease: Duration,
    ) -> Result<bool, TaskerError> {
        let now = self.now();
        let expires_at = now + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero());

        let mut acquired = false;
        self.locks
            .entry(partition_key.to_string())
            .and_modify(|existing| {
                if existing.is_expired(now) || existing.task_id == holder_task_id {
                    existing.task_id = holder_task_id.to_string();
                    existing.acquired_at = now;
                    existing.expires_at = expires_at;
                    acquired = true;
                }
            })
            .or_insert_with(|| {
                acquired = true;
                PartitionLock {
                    partition_key: partition_key.to_string(),
                    task_id: holder_task_id.to_string(),
                    acquired_at: now,
                    expires_at,
                }
            });

        Ok(acquired)
    }

    async fn release(&self, partition_key: &str, holder_task_id: &str) -> Result<(), TaskerError> {
        self.locks.remove_if(partition_key, |_, lock| lock.task_id == holder_task_id);
        Ok(())
    }

    async fn is_locked(&self, partition_key: &str) -> Result<bool, TaskerError> {
        let now = self.now();
        Ok(self.locks.get(partition_key).is_some_and(|l| !l.is_expired(now)))
    }

    async fn get_lock_holder(&self, partition_key: &str) -> Result<Option<String>, TaskerError> {
        let now = self.now();
        Ok(self
            .locks
            .get(partition_key)
            .filter(|l| !l.is_expired(now))
            .map(|l| l.task_id.clone()))
    }

    async fn extend(&self, partition_key: &str, holder_task_id: &str, lease: Duration) -> Result<bool, TaskerError> {
        let now = self.now();
        let mut extended = false;
        if let Some(mut lock) = self.locks.get_mut(partition_key) {
            if lock.task_id == holder_task_id && !lock.is_expired(now) {
                lock.expires_at = now + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero());
                extended = true;
            }
        }
        Ok(extended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tasker_shared::clock::FixedClock;

    #[tokio::test]
    async fn acquire_release_roundtrip() {
        let store = InMemoryPartitionLockStore::new(Arc::new(FixedClock::new(Utc::now())));
        assert!(store.try_acquire("p1", "task-a", Duration::from_secs(30)).await.unwrap());
        assert!(!store.try_acquire("p1", "task-b", Duration::from_secs(30)).await.unwrap());

        store.release("p1", "task-a").await.unwrap();
        assert!(store.try_acquire("p1", "task-b", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_is_taken_over() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryPartitionLockStore::new(clock.clone());
        assert!(store.try_acquire("p1", "task-a", Duration::from_secs(1)).await.unwrap());

        clock.advance(chrono::Duration::seconds(2));
        assert!(store.try_acquire("p1", "task-b", Duration::from_secs(30)).await.unwrap());
        assert_eq!(store.get_lock_holder("p1").await.unwrap(), Some("task-b".to_string()));
    }

    #[tokio::test]
    async fn same_holder_can_reacquire() {
        let store = InMemoryPartitionLockStore::new(Arc::new(FixedClock::new(Utc::now())));
        assert!(store.try_acquire("p1", "task-a", Duration::from_secs(30)).await.unwrap());
        assert!(store.try_acquire("p1", "task-a", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn extend_only_succeeds_for_current_holder() {
        let store = InMemoryPartitionLockStore::new(Arc::new(FixedClock::new(Utc::now())));
        store.try_acquire("p1", "task-a", Duration::from_secs(30)).await.unwrap();

        assert!(!store.extend("p1", "task-b", Duration::from_secs(30)).await.unwrap());
        assert!(store.extend("p1", "task-a", Duration::from_secs(60)).await.unwrap());
    }
}
