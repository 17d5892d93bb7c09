//! # Revocation Manager (C4, local half)
//!
//! Bridges the durable [`RevocationStore`] to the worker process: a
//! `task_id → cancellation handle` registry for tasks running locally, and
//! a pending-revocations map seeded at startup so a task that registers
//! *after* a revoke event with `terminate=true` is still cancelled before
//! its body runs (the invariant the executor depends on).

use std::sync::Arc;

use dashmap::DashMap;
use tasker_shared::error::TaskerError;
use tasker_stores::revocation::{RevocationStore, TerminationMode};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RevokeOptions {
    pub terminate: bool,
    pub mode: TerminationMode,
}

#[derive(Debug)]
pub struct RevocationManager {
    store: Arc<dyn RevocationStore>,
    /// Locally running tasks, keyed by task id.
    running: DashMap<String, CancellationToken>,
    /// Revocations observed before (or without) a matching local registration.
    pending: DashMap<String, RevokeOptions>,
}

impl RevocationManager {
    pub fn new(store: Arc<dyn RevocationStore>) -> Self {
        Self {
            store,
            running: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Seeds `pending` from the durable store. Call once at worker startup.
    pub async fn load_pending(&self) -> Result<(), TaskerError> {
        for record in self.store.load_all().await? {
            self.pending.insert(
                record.task_id,
                RevokeOptions {
                    terminate: record.terminate,
                    mode: record.mode,
                },
            );
        }
        Ok(())
    }

    pub fn is_revoked(&self, task_id: &str) -> bool {
        self.pending.contains_key(task_id)
    }

    /// Registers a task about to start executing. If it was already
    /// revoked, the returned token is cancelled before this call returns.
    pub fn register_task(&self, task_id: &str, parent: &CancellationToken) -> CancellationToken {
        let local = parent.child_token();
        self.running.insert(task_id.to_string(), local.clone());

        if let Some(options) = self.pending.get(task_id) {
            if options.terminate {
                local.cancel();
            }
        }
        local
    }

    pub fn unregister_task(&self, task_id: &str) {
        self.running.remove(task_id);
    }

    /// Applies a revoke event against locally running tasks and records it
    /// for any task that registers later.
    pub async fn revoke(&self, task_ids: &[String], options: RevokeOptions) -> Result<(), TaskerError> {
        self.store.revoke(task_ids, options.terminate, options.mode).await?;

        for task_id in task_ids {
            self.pending.insert(task_id.clone(), options);

            if let Some(local) = self.running.get(task_id) {
                if options.terminate {
                    match options.mode {
                        TerminationMode::Immediate => {
                            local.cancel();
                            info!(task_id, "revocation cancelled running task immediately");
                        }
                        TerminationMode::Graceful => {
                            let token = local.clone();
                            tokio::spawn(async move {
                                token.cancel();
                            });
                            info!(task_id, "revocation scheduled graceful cancellation");
                        }
                    }
                }
            } else {
                warn!(task_id, "revocation recorded for a task not running on this worker");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tasker_shared::clock::system_clock;
    use tasker_stores::InMemoryRevocationStore;

    #[tokio::test]
    async fn revoking_a_running_task_cancels_its_token() {
        let store = Arc::new(InMemoryRevocationStore::new(system_clock()));
        let manager = RevocationManager::new(store);
        let parent = CancellationToken::new();
        let local = manager.register_task("t1", &parent);

        manager
            .revoke(
                &["t1".to_string()],
                RevokeOptions {
                    terminate: true,
                    mode: TerminationMode::Immediate,
                },
            )
            .await
            .unwrap();

        assert!(local.is_cancelled());
    }

    #[tokio::test]
    async fn task_registering_after_revoke_is_cancelled_immediately() {
        let store = Arc::new(InMemoryRevocationStore::new(system_clock()));
        let manager = RevocationManager::new(store);

        manager
            .revoke(
                &["t1".to_string()],
                RevokeOptions {
                    terminate: true,
                    mode: TerminationMode::Immediate,
                },
            )
            .await
            .unwrap();

        let parent = CancellationToken::new();
        let local = manager.register_task("t1", &parent);
        assert!(local.is_cancelled());
    }

    #[tokio::test]
    async fn load_pending_seeds_from_store() {
        let store = Arc::new(InMemoryRevocationStore::new(system_clock()));
        store
            .revoke(&["t1".to_string()], true, TerminationMode::Immediate)
            .await
            .unwrap();

        let manager = RevocationManager::new(store);
        manager.load_pending().await.unwrap();
        assert!(manager.is_revoked("t1"));
    }
}
