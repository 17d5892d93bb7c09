//! # Delayed-Message Store (C8)
//!
//! Holds ETA/countdown-scheduled messages until due. `get_due_messages`
//! atomically removes each row it yields so two dispatchers draining the
//! same store concurrently never both deliver the same message.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tasker_shared::error::TaskerError;
use tasker_shared::wire::{DelayedMessage, TaskMessage};

#[async_trait]
pub trait DelayedMessageStore: Send + Sync + std::fmt::Debug {
    /// Replaces any existing row for the same `task_id`.
    async fn add_async(&self, message: TaskMessage, delivery_time: DateTime<Utc>) -> Result<(), TaskerError>;

    async fn get_due_messages(&self, now: DateTime<Utc>) -> Result<Vec<DelayedMessage>, TaskerError>;

    async fn get_next_delivery_time(&self) -> Result<Option<DateTime<Utc>>, TaskerError>;

    async fn remove(&self, task_id: &str) -> Result<bool, TaskerError>;

    async fn get_pending_count(&self) -> Result<usize, TaskerError>;
}

#[derive(Debug, Default)]
pub struct InMemoryDelayedMessageStore {
    rows: DashMap<String, DelayedMessage>,
}

impl InMemoryDelayedMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DelayedMessageStore for InMemoryDelayedMessageStore {
    async fn add_async(&self, message: TaskMessage, delivery_time: DateTime<Utc>) -> Result<(), TaskerError> {
        let task_id = message.id.clone();
        self.rows.insert(
            task_id.clone(),
            DelayedMessage {
                task_id,
                message,
                delivery_time,
            },
        );
        Ok(())
    }

    async fn get_due_messages(&self, now: DateTime<Utc>) -> Result<Vec<DelayedMessage>, TaskerError> {
        let due_ids: Vec<String> = self
            .rows
            .iter()
            .filter(|entry| entry.delivery_time <= now)
            .map(|entry| entry.task_id.clone())
            .collect();

        let mut due = Vec::with_capacity(due_ids.len());
        for task_id in due_ids {
            if let Some((_, record)) = self.rows.remove(&task_id) {
                due.push(record);
            }
        }
        due.sort_by_key(|r| r.delivery_time);
        Ok(due)
    }

    async fn get_next_delivery_time(&self) -> Result<Option<DateTime<Utc>>, TaskerError> {
        Ok(self.rows.iter().map(|entry| entry.delivery_time).min())
    }

    async fn remove(&self, task_id: &str) -> Result<bool, TaskerError> {
        Ok(self.rows.remove(task_id).is_some())
    }

    async fn get_pending_count(&self) -> Result<usize, TaskerError> {
        Ok(self.rows.len())
    }
}
