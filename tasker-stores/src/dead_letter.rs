//! # Dead-Letter Store (C11)
//!
//! Terminal parking lot for messages the executor gives up on. `requeue`
//! is defined as delete-and-let-the-caller-republish: this store never
//! talks to a broker directly.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tasker_shared::clock::SharedClock;
use tasker_shared::error::TaskerError;
use tasker_shared::wire::DeadLetterMessage;

#[async_trait]
pub trait DeadLetterStore: Send + Sync + std::fmt::Debug {
    async fn store(&self, message: DeadLetterMessage) -> Result<(), TaskerError>;

    async fn get_all(&self, limit: usize, offset: usize) -> Result<Vec<DeadLetterMessage>, TaskerError>;

    async fn get(&self, id: &str) -> Result<Option<DeadLetterMessage>, TaskerError>;

    /// Deletes the row; the caller is responsible for republishing to the broker.
    async fn requeue(&self, id: &str) -> Result<Option<DeadLetterMessage>, TaskerError>;

    async fn delete(&self, id: &str) -> Result<(), TaskerError>;

    async fn purge(&self) -> Result<usize, TaskerError>;

    async fn cleanup_expired(&self) -> Result<usize, TaskerError>;

    async fn get_count(&self) -> Result<usize, TaskerError>;
}

#[derive(Debug)]
pub struct InMemoryDeadLetterStore {
    rows: DashMap<String, DeadLetterMessage>,
    clock: SharedClock,
}

impl InMemoryDeadLetterStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            rows: DashMap::new(),
            clock,
        }
    }

    fn is_live(&self, message: &DeadLetterMessage) -> bool {
        message.expires_at > self.clock.now()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn store(&self, message: DeadLetterMessage) -> Result<(), TaskerError> {
        self.rows.insert(message.id.clone(), message);
        Ok(())
    }

    async fn get_all(&self, limit: usize, offset: usize) -> Result<Vec<DeadLetterMessage>, TaskerError> {
        let mut live: Vec<DeadLetterMessage> = self
            .rows
            .iter()
            .filter(|entry| self.is_live(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        live.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(live.into_iter().skip(offset).take(limit).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<DeadLetterMessage>, TaskerError> {
        Ok(self.rows.get(id).filter(|m| self.is_live(m)).map(|m| m.clone()))
    }

    async fn requeue(&self, id: &str) -> Result<Option<DeadLetterMessage>, TaskerError> {
        Ok(self.rows.remove(id).map(|(_, message)| message))
    }

    async fn delete(&self, id: &str) -> Result<(), TaskerError> {
        self.rows.remove(id);
        Ok(())
    }

    async fn purge(&self) -> Result<usize, TaskerError> {
        let count = self.rows.len();
        self.rows.clear();
        Ok(count)
    }

    async fn cleanup_expired(&self) -> Result<usize, TaskerError> {
        let now = self.clock.now();
        let before = self.rows.len();
        self.rows.retain(|_, message| message.expires_at > now);
        Ok(before - self.rows.len())
    }

    async fn get_count(&self) -> Result<usize, TaskerError> {
        let now = self.clock.now();
        Ok(self.rows.iter().filter(|entry| entry.expires_at > now).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tasker_shared::clock::FixedClock;
    use tasker_shared::wire::DeadLetterReason;

    fn message(id: &str, expires_at: chrono::DateTime<Utc>) -> DeadLetterMessage {
        DeadLetterMessage {
            id: id.to_string(),
            task_id: "t1".to_string(),
            task_name: "demo.task".to_string(),
            queue: "worker_default_queue".to_string(),
            reason: DeadLetterReason::Failed,
            original_message: Vec::new(),
            exception: None,
            retry_count: 0,
            timestamp: Utc::now(),
            expires_at,
            worker: None,
        }
    }

    #[tokio::test]
    async fn get_all_orders_by_timestamp_desc_and_skips_expired() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryDeadLetterStore::new(clock.clone());
        store.store(message("a", clock.now() + chrono::Duration::seconds(60))).await.unwrap();
        store.store(message("b", clock.now() - chrono::Duration::seconds(1))).await.unwrap();

        let all = store.get_all(10, 0).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "a");
    }

    #[tokio::test]
    async fn requeue_deletes_the_row() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryDeadLetterStore::new(clock.clone());
        store.store(message("a", clock.now() + chrono::Duration::seconds(60))).await.unwrap();

        let requeued = store.requeue("a").await.unwrap();
        assert!(requeued.is_some());
        assert_eq!(store.get_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cleanup_expired_removes_stale_rows() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryDeadLetterStore::new(clock.clone());
        store.store(message("a", clock.now() - chrono::Duration::seconds(1))).await.unwrap();
        store.store(message("b", clock.now() + chrono::Duration::seconds(60))).await.unwrap();

        let removed = store.cleanup_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_count().await.unwrap(), 1);
    }
}
