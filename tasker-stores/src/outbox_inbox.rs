//! # Outbox / Inbox (C9)
//!
//! Outbox gives a transactional-style publish queue with a server-assigned
//! monotonic `sequence_number`; inbox gives idempotency for consumers that
//! might see the same message more than once.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tasker_shared::clock::SharedClock;
use tasker_shared::error::TaskerError;
use tasker_shared::wire::{OutboxMessage, OutboxStatus, TaskMessage, OUTBOX_MAX_ATTEMPTS};

#[async_trait]
pub trait OutboxStore: Send + Sync + std::fmt::Debug {
    async fn store(&self, task_message: TaskMessage) -> Result<OutboxMessage, TaskerError>;

    async fn get_pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, TaskerError>;

    async fn mark_dispatched(&self, id: &str) -> Result<(), TaskerError>;

    async fn mark_failed(&self, id: &str, error: &str) -> Result<(), TaskerError>;

    async fn cleanup_older_than(&self, age: ChronoDuration) -> Result<usize, TaskerError>;
}

#[derive(Debug)]
pub struct InMemoryOutboxStore {
    rows: DashMap<String, OutboxMessage>,
    next_sequence: AtomicU64,
    clock: SharedClock,
}

impl InMemoryOutboxStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            rows: DashMap::new(),
            next_sequence: AtomicU64::new(1),
            clock,
        }
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn store(&self, task_message: TaskMessage) -> Result<OutboxMessage, TaskerError> {
        let id = uuid::Uuid::new_v4().to_string();
        let sequence_number = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let row = OutboxMessage::new(id.clone(), task_message, sequence_number, self.clock.now());
        self.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn get_pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, TaskerError> {
        let mut pending: Vec<OutboxMessage> = self
            .rows
            .iter()
            .filter(|entry| entry.status == OutboxStatus::Pending)
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by_key(|m| m.sequence_number);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_dispatched(&self, id: &str) -> Result<(), TaskerError> {
        if let Some(mut row) = self.rows.get_mut(id) {
            row.status = OutboxStatus::Dispatched;
            row.dispatched_at = Some(self.clock.now());
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<(), TaskerError> {
        if let Some(mut row) = self.rows.get_mut(id) {
            row.attempts += 1;
            row.last_error = Some(error.to_string());
            if row.attempts >= OUTBOX_MAX_ATTEMPTS {
                row.status = OutboxStatus::Failed;
            }
        }
        Ok(())
    }

    async fn cleanup_older_than(&self, age: ChronoDuration) -> Result<usize, TaskerError> {
        let cutoff = self.clock.now() - age;
        let before = self.rows.len();
        self.rows.retain(|_, row| {
            !(row.status == OutboxStatus::Dispatched && row.dispatched_at.is_some_and(|d| d < cutoff))
        });
        Ok(before - self.rows.len())
    }
}

#[async_trait]
pub trait InboxStore: Send + Sync + std::fmt::Debug {
    async fn is_processed(&self, message_id: &str) -> Result<bool, TaskerError>;

    async fn mark_processed(&self, message_id: &str) -> Result<(), TaskerError>;
}

#[derive(Debug)]
pub struct InMemoryInboxStore {
    processed: DashMap<String, DateTime<Utc>>,
    clock: SharedClock,
}

impl InMemoryInboxStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            processed: DashMap::new(),
            clock,
        }
    }
}

#[async_trait]
impl InboxStore for InMemoryInboxStore {
    async fn is_processed(&self, message_id: &str) -> Result<bool, TaskerError> {
        Ok(self.processed.contains_key(message_id))
    }

    async fn mark_processed(&self, message_id: &str) -> Result<(), TaskerError> {
        self.processed.insert(message_id.to_string(), self.clock.now());
        Ok(())
    }
}
