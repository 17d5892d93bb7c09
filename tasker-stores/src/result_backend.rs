//! # Result Backend (C3)
//!
//! Stores task results and states keyed by `task_id`, with TTL expiry and
//! a local rendezvous so a caller awaiting a result doesn't have to poll
//! as soon as the owning worker's `StoreResult` lands in the same process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use dashmap::DashMap;
use tasker_shared::clock::SharedClock;
use tasker_shared::error::TaskerError;
use tasker_shared::wire::{TaskResult, TaskState};
use tokio::sync::Notify;
use tokio::time::timeout as tokio_timeout;

#[async_trait]
pub trait ResultBackend: Send + Sync + std::fmt::Debug {
    async fn store_result(
        &self,
        result: TaskResult,
        expiry: Option<chrono::Duration>,
    ) -> Result<(), TaskerError>;

    async fn get_result(&self, task_id: &str) -> Result<Option<TaskResult>, TaskerError>;

    /// Blocks (without busy-polling the caller's task) until a terminal
    /// result is available or `timeout` elapses.
    async fn wait_for_result(
        &self,
        task_id: &str,
        timeout: Option<StdDuration>,
    ) -> Result<TaskResult, TaskerError>;

    async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), TaskerError>;

    async fn get_state(&self, task_id: &str) -> Result<Option<TaskState>, TaskerError>;
}

#[derive(Debug)]
struct Entry {
    result: TaskResult,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// In-memory reference implementation. Waiters are woken by a per-task-id
/// `Notify`, registered lazily and removed once no longer needed; polling
/// at `poll_interval` covers the window between notify registration and a
/// concurrent `store_result` as well as cross-process completion when this
/// backend is embedded as a local cache in front of a shared store.
#[derive(Debug)]
pub struct InMemoryResultBackend {
    entries: DashMap<String, Entry>,
    waiters: DashMap<String, Arc<Notify>>,
    clock: SharedClock,
    poll_interval: StdDuration,
}

impl InMemoryResultBackend {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            waiters: DashMap::new(),
            clock,
            poll_interval: StdDuration::from_millis(50),
        }
    }

    pub fn with_poll_interval(mut self, interval: StdDuration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn is_live(&self, entry: &Entry) -> bool {
        match entry.expires_at {
            Some(expires_at) => expires_at > self.clock.now(),
            None => true,
        }
    }

    fn notify_for(&self, task_id: &str) -> Arc<Notify> {
        self.waiters
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

#[async_trait]
impl ResultBackend for InMemoryResultBackend {
    async fn store_result(
        &self,
        result: TaskResult,
        expiry: Option<chrono::Duration>,
    ) -> Result<(), TaskerError> {
        let task_id = result.task_id.clone();
        let expires_at = expiry.map(|d| self.clock.now() + d);

        let should_insert = match self.entries.get(&task_id) {
            Some(existing) => TaskResult::may_overwrite(Some(&existing.result), &result),
            None => true,
        };

        if should_insert {
            self.entries.insert(task_id.clone(), Entry { result, expires_at });
        }

        if let Some(notify) = self.waiters.get(&task_id) {
            notify.notify_waiters();
        }
        Ok(())
    }

    async fn get_result(&self, task_id: &str) -> Result<Option<TaskResult>, TaskerError> {
        match self.entries.get(task_id) {
            Some(entry) if self.is_live(&entry) => Ok(Some(entry.result.clone())),
            Some(_) => Ok(None),
            None => Ok(None),
        }
    }

    async fn wait_for_result(
        &self,
        task_id: &str,
        timeout: Option<StdDuration>,
    ) -> Result<TaskResult, TaskerError> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            if let Some(result) = self.get_result(task_id).await? {
                if result.state.is_terminal() {
                    return Ok(result);
                }
            }

            let notify = self.notify_for(task_id);
            let wait = notify.notified();

            let remaining = match deadline {
                Some(deadline) => {
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        return Err(TaskerError::Timeout(StdDuration::from_secs(0)));
                    }
                    Some((deadline - now).min(self.poll_interval))
                }
                None => Some(self.poll_interval),
            };

            match remaining {
                Some(d) => {
                    let _ = tokio_timeout(d, wait).await;
                }
                None => wait.await,
            }
        }
    }

    async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), TaskerError> {
        let now = self.clock.now();
        let mut entry = self.entries.entry(task_id.to_string()).or_insert_with(|| Entry {
            result: TaskResult::new(task_id.to_string(), state),
            expires_at: None,
        });

        if entry.result.completed_at.is_none() && state.is_terminal() {
            entry.result.completed_at = Some(now);
        }
        entry.result.state = state;
        if let Some(metadata) = metadata {
            entry.result.metadata = metadata;
        }

        if let Some(notify) = self.waiters.get(task_id) {
            notify.notify_waiters();
        }
        Ok(())
    }

    async fn get_state(&self, task_id: &str) -> Result<Option<TaskState>, TaskerError> {
        Ok(self
            .entries
            .get(task_id)
            .filter(|e| self.is_live(e))
            .map(|e| e.result.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasker_shared::clock::system_clock;

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let backend = InMemoryResultBackend::new(system_clock());
        let result = TaskResult::success("t1".to_string(), b"42".to_vec(), "application/json");
        backend.store_result(result.clone(), None).await.unwrap();

        let fetched = backend.get_result("t1").await.unwrap().unwrap();
        assert_eq!(fetched.state, TaskState::Success);
    }

    #[tokio::test]
    async fn terminal_state_is_not_overwritten_by_a_stale_update() {
        let backend = InMemoryResultBackend::new(system_clock());
        let success = TaskResult::success("t1".to_string(), b"1".to_vec(), "application/json");
        backend.store_result(success, None).await.unwrap();

        let stale_retry = TaskResult::retry("t1".to_string(), true, None);
        backend.store_result(stale_retry, None).await.unwrap();

        let state = backend.get_state("t1").await.unwrap().unwrap();
        assert_eq!(state, TaskState::Success);
    }

    #[tokio::test]
    async fn wait_for_result_wakes_on_store() {
        let backend = Arc::new(InMemoryResultBackend::new(system_clock()));
        let waiter = backend.clone();
        let handle = tokio::spawn(async move {
            waiter
                .wait_for_result("t1", Some(StdDuration::from_secs(2)))
                .await
        });

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        let result = TaskResult::success("t1".to_string(), b"1".to_vec(), "application/json");
        backend.store_result(result, None).await.unwrap();

        let awaited = handle.await.unwrap().unwrap();
        assert_eq!(awaited.state, TaskState::Success);
    }

    #[tokio::test]
    async fn wait_for_result_times_out() {
        let backend = InMemoryResultBackend::new(system_clock());
        let result = backend
            .wait_for_result("missing", Some(StdDuration::from_millis(30)))
            .await;
        assert!(matches!(result, Err(TaskerError::Timeout(_))));
    }
}
