//! # Revocation Store (C4, distributed half)
//!
//! The orchestration-side `RevocationManager` owns the local
//! registry/cancellation-handle bookkeeping; this store is the durable,
//! shareable record of which task ids have been revoked, consulted on
//! startup and on every new revoke event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tasker_shared::clock::SharedClock;
use tasker_shared::error::TaskerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationMode {
    /// Cancellation callbacks run synchronously on the revoking caller.
    Immediate,
    /// Cancellation is scheduled, letting the current computation yield first.
    Graceful,
}

#[derive(Debug, Clone)]
pub struct RevocationRecord {
    pub task_id: String,
    pub terminate: bool,
    pub mode: TerminationMode,
    pub revoked_at: DateTime<Utc>,
}

#[async_trait]
pub trait RevocationStore: Send + Sync + std::fmt::Debug {
    async fn revoke(&self, task_ids: &[String], terminate: bool, mode: TerminationMode) -> Result<(), TaskerError>;

    async fn is_revoked(&self, task_id: &str) -> Result<bool, TaskerError>;

    async fn get(&self, task_id: &str) -> Result<Option<RevocationRecord>, TaskerError>;

    /// All revocations known at the moment of the call, used to seed a
    /// worker's pending-revocations map on startup.
    async fn load_all(&self) -> Result<Vec<RevocationRecord>, TaskerError>;
}

#[derive(Debug)]
pub struct InMemoryRevocationStore {
    records: DashMap<String, RevocationRecord>,
    clock: SharedClock,
}

impl InMemoryRevocationStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn revoke(&self, task_ids: &[String], terminate: bool, mode: TerminationMode) -> Result<(), TaskerError> {
        let revoked_at = self.clock.now();
        for task_id in task_ids {
            self.records.insert(
                task_id.clone(),
                RevocationRecord {
                    task_id: task_id.clone(),
                    terminate,
                    mode,
                    revoked_at,
                },
            );
        }
        Ok(())
    }

    async fn is_revoked(&self, task_id: &str) -> Result<bool, TaskerError> {
        Ok(self.records.contains_key(task_id))
    }

    async fn get(&self, task_id: &str) -> Result<Option<RevocationRecord>, TaskerError> {
        Ok(self.records.get(task_id).map(|r| r.clone()))
    }

    async fn load_all(&self) -> Result<Vec<RevocationRecord>, TaskerError> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasker_shared::clock::system_clock;

    #[tokio::test]
    async fn revoke_then_query() {
        let store = InMemoryRevocationStore::new(system_clock());
        assert!(!store.is_revoked("t1").await.unwrap());

        store
            .revoke(&["t1".to_string()], true, TerminationMode::Immediate)
            .await
            .unwrap();

        assert!(store.is_revoked("t1").await.unwrap());
        let record = store.get("t1").await.unwrap().unwrap();
        assert!(record.terminate);
        assert_eq!(record.mode, TerminationMode::Immediate);
    }

    #[tokio::test]
    async fn load_all_seeds_pending_revocations() {
        let store = InMemoryRevocationStore::new(system_clock());
        store
            .revoke(&["t1".to_string(), "t2".to_string()], false, TerminationMode::Graceful)
            .await
            .unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
