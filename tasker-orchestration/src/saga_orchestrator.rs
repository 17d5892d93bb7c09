//! # Saga Orchestrator (C10, state-machine driver)
//!
//! Drives a [`Saga`] through its steps one at a time, enqueuing each step's
//! task via the outbox and reacting to the result a worker eventually
//! reports back through [`SagaOrchestrator::on_task_result`]. Persistence
//! and transition legality live in [`SagaStore`]; this type owns *when*
//! those transitions happen and which task gets dispatched next.

use std::sync::Arc;

use tasker_shared::error::TaskerError;
use tasker_shared::wire::{Saga, SagaState, SagaStep, SagaStepState, TaskMessage};
use tasker_stores::{OutboxStore, SagaStore};
use tracing::{info, warn};

/// Attempts per step before a failed compensation is given up on.
const MAX_COMPENSATION_ATTEMPTS: u32 = 3;

#[derive(Debug)]
pub struct SagaOrchestrator {
    saga_store: Arc<dyn SagaStore>,
    outbox: Arc<dyn OutboxStore>,
    default_queue: String,
}

impl SagaOrchestrator {
    pub fn new(saga_store: Arc<dyn SagaStore>, outbox: Arc<dyn OutboxStore>, default_queue: impl Into<String>) -> Self {
        Self {
            saga_store,
            outbox,
            default_queue: default_queue.into(),
        }
    }

    /// Persists a newly built saga, moves it to `Executing`, and dispatches
    /// its first step. Callers are expected to have already assigned
    /// `execute_task_id`/`compensate_task_id` on every step, since those ids
    /// are how [`Self::on_task_result`] finds its way back to the saga.
    pub async fn start_saga(&self, saga: Saga) -> Result<(), TaskerError> {
        let id = saga.id.clone();
        self.saga_store.create(saga).await?;
        self.saga_store.update_state(&id, SagaState::Executing, None).await?;

        let saga = self.require_saga(&id).await?;
        if let Some(step) = saga.steps.get(saga.current_step_index) {
            self.dispatch_execute(&id, step).await?;
            self.saga_store
                .update_step_state(&id, &step.id, SagaStepState::Executing, None, None)
                .await?;
        }
        Ok(())
    }

    /// Reports the outcome of a task back to its owning saga, if any. A
    /// no-op for tasks that aren't part of a saga.
    pub async fn on_task_result(
        &self,
        task_id: &str,
        success: bool,
        result: Option<Vec<u8>>,
        error: Option<String>,
    ) -> Result<(), TaskerError> {
        let Some(saga_id) = self.saga_store.get_saga_id_for_task(task_id).await? else {
            return Ok(());
        };
        let saga = self.require_saga(&saga_id).await?;

        if let Some(step) = saga.steps.iter().find(|s| s.execute_task_id.as_deref() == Some(task_id)) {
            let step = step.clone();
            self.handle_execute_result(&saga, &step, success, result, error).await
        } else if let Some(step) = saga.steps.iter().find(|s| s.compensate_task_id.as_deref() == Some(task_id)) {
            let step = step.clone();
            self.handle_compensate_result(&saga, &step, success).await
        } else {
            warn!(task_id, saga_id = %saga.id, "saga reverse lookup matched but no step owns this task id");
            Ok(())
        }
    }

    async fn handle_execute_result(
        &self,
        saga: &Saga,
        step: &SagaStep,
        success: bool,
        result: Option<Vec<u8>>,
        error: Option<String>,
    ) -> Result<(), TaskerError> {
        if success {
            self.saga_store
                .update_step_state(&saga.id, &step.id, SagaStepState::Completed, result, None)
                .await?;

            let is_last = saga.steps.last().map(|s| s.id == step.id).unwrap_or(false);
            if is_last {
                self.saga_store.update_state(&saga.id, SagaState::Completed, None).await?;
                info!(saga_id = %saga.id, "saga completed");
                return Ok(());
            }

            self.saga_store.advance_step(&saga.id).await?;
            let saga = self.require_saga(&saga.id).await?;
            if let Some(next) = saga.steps.get(saga.current_step_index) {
                self.dispatch_execute(&saga.id, next).await?;
                self.saga_store
                    .update_step_state(&saga.id, &next.id, SagaStepState::Executing, None, None)
                    .await?;
            }
            Ok(())
        } else {
            self.saga_store
                .update_step_state(&saga.id, &step.id, SagaStepState::Failed, None, error.clone())
                .await?;
            self.saga_store
                .update_state(&saga.id, SagaState::Failed, error)
                .await?;

            if !saga.auto_compensate_on_failure {
                info!(saga_id = %saga.id, "saga failed, auto-compensation disabled");
                return Ok(());
            }

            self.saga_store
                .update_state(&saga.id, SagaState::Compensating, None)
                .await?;
            let saga = self.require_saga(&saga.id).await?;
            if let Some(first) = saga.compensation_order().first() {
                self.dispatch_compensate(&saga.id, first).await?;
            } else {
                self.saga_store.update_state(&saga.id, SagaState::Compensated, None).await?;
            }
            Ok(())
        }
    }

    async fn handle_compensate_result(&self, saga: &Saga, step: &SagaStep, success: bool) -> Result<(), TaskerError> {
        if success {
            self.saga_store.mark_step_compensated(&saga.id, &step.id, true).await?;
            let saga = self.require_saga(&saga.id).await?;
            if let Some(next) = saga.compensation_order().first() {
                self.dispatch_compensate(&saga.id, next).await?;
            } else {
                self.saga_store.update_state(&saga.id, SagaState::Compensated, None).await?;
                info!(saga_id = %saga.id, "saga compensation complete");
            }
            return Ok(());
        }

        let attempts = self.saga_store.record_compensation_attempt(&saga.id, &step.id).await?;
        if attempts >= MAX_COMPENSATION_ATTEMPTS {
            self.saga_store.mark_step_compensated(&saga.id, &step.id, false).await?;
            self.saga_store
                .update_state(
                    &saga.id,
                    SagaState::CompensationFailed,
                    Some(format!("compensation exhausted for step {}", step.id)),
                )
                .await?;
            warn!(saga_id = %saga.id, step_id = %step.id, "compensation exhausted, saga left in CompensationFailed");
        } else {
            info!(saga_id = %saga.id, step_id = %step.id, attempts, "compensation failed, retrying");
            self.dispatch_compensate(&saga.id, step).await?;
        }
        Ok(())
    }

    async fn dispatch_execute(&self, saga_id: &str, step: &SagaStep) -> Result<(), TaskerError> {
        let task_id = step.execute_task_id.clone().ok_or_else(|| {
            TaskerError::configuration(format!("saga {saga_id} step {} missing execute_task_id", step.id))
        })?;
        let message = TaskMessage::new(task_id, step.execute_task.task.clone(), self.default_queue.clone())
            .with_args(step.execute_task.args.clone(), step.execute_task.content_type.clone());
        self.outbox.store(message).await?;
        Ok(())
    }

    async fn dispatch_compensate(&self, saga_id: &str, step: &SagaStep) -> Result<(), TaskerError> {
        let compensate_task = step.compensate_task.clone().ok_or_else(|| {
            TaskerError::configuration(format!("saga {saga_id} step {} has no compensation task", step.id))
        })?;
        let task_id = step.compensate_task_id.clone().ok_or_else(|| {
            TaskerError::configuration(format!("saga {saga_id} step {} missing compensate_task_id", step.id))
        })?;
        let message = TaskMessage::new(task_id, compensate_task.task, self.default_queue.clone())
            .with_args(compensate_task.args, compensate_task.content_type);
        self.outbox.store(message).await?;
        Ok(())
    }

    async fn require_saga(&self, id: &str) -> Result<Saga, TaskerError> {
        self.saga_store
            .get(id)
            .await?
            .ok_or_else(|| TaskerError::configuration(format!("unknown saga: {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tasker_shared::clock::system_clock;
    use tasker_shared::wire::{SagaStepState, TaskSignature};
    use tasker_stores::{InMemoryOutboxStore, InMemorySagaStore};

    fn step(id: &str, order: u32, compensable: bool) -> SagaStep {
        SagaStep {
            id: id.to_string(),
            name: id.to_string(),
            order,
            execute_task: TaskSignature {
                task: format!("{id}.execute"),
                args: Vec::new(),
                content_type: "application/json".to_string(),
            },
            compensate_task: compensable.then(|| TaskSignature {
                task: format!("{id}.compensate"),
                args: Vec::new(),
                content_type: "application/json".to_string(),
            }),
            state: SagaStepState::Pending,
            execute_task_id: Some(format!("{id}-execute-task")),
            compensate_task_id: compensable.then(|| format!("{id}-compensate-task")),
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            compensation_attempts: 0,
        }
    }

    fn saga(steps: Vec<SagaStep>) -> Saga {
        Saga {
            id: "s1".to_string(),
            name: "order".to_string(),
            state: SagaState::Created,
            steps,
            current_step_index: 0,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            failure_reason: None,
            correlation_id: None,
            metadata: HashMap::new(),
            auto_compensate_on_failure: true,
        }
    }

    fn orchestrator() -> (SagaOrchestrator, Arc<InMemorySagaStore>, Arc<InMemoryOutboxStore>) {
        let store = Arc::new(InMemorySagaStore::new(system_clock()));
        let outbox = Arc::new(InMemoryOutboxStore::new(system_clock()));
        let orchestrator = SagaOrchestrator::new(store.clone(), outbox.clone(), "saga_queue");
        (orchestrator, store, outbox)
    }

    #[tokio::test]
    async fn starting_a_saga_dispatches_its_first_step() {
        let (orchestrator, store, outbox) = orchestrator();
        let saga = saga(vec![step("reserve", 0, true), step("charge", 1, true)]);
        orchestrator.start_saga(saga).await.unwrap();

        let pending = outbox.get_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_message.task, "reserve.execute");

        let saga = store.get("s1").await.unwrap().unwrap();
        assert_eq!(saga.state, SagaState::Executing);
        assert_eq!(saga.steps[0].state, SagaStepState::Executing);
    }

    #[tokio::test]
    async fn success_on_every_step_completes_the_saga() {
        let (orchestrator, store, outbox) = orchestrator();
        let saga = saga(vec![step("reserve", 0, true), step("charge", 1, true)]);
        orchestrator.start_saga(saga).await.unwrap();

        orchestrator
            .on_task_result("reserve-execute-task", true, Some(b"ok".to_vec()), None)
            .await
            .unwrap();
        let pending = outbox.get_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].task_message.task, "charge.execute");

        orchestrator
            .on_task_result("charge-execute-task", true, Some(b"ok".to_vec()), None)
            .await
            .unwrap();
        let saga = store.get("s1").await.unwrap().unwrap();
        assert_eq!(saga.state, SagaState::Completed);
    }

    #[tokio::test]
    async fn failure_triggers_compensation_in_reverse_order() {
        let (orchestrator, store, outbox) = orchestrator();
        let saga = saga(vec![step("reserve", 0, true), step("charge", 1, true)]);
        orchestrator.start_saga(saga).await.unwrap();

        orchestrator
            .on_task_result("reserve-execute-task", true, Some(b"ok".to_vec()), None)
            .await
            .unwrap();
        orchestrator
            .on_task_result("charge-execute-task", false, None, Some("card declined".to_string()))
            .await
            .unwrap();

        let saga = store.get("s1").await.unwrap().unwrap();
        assert_eq!(saga.state, SagaState::Compensating);

        let pending = outbox.get_pending(10).await.unwrap();
        assert_eq!(pending.last().unwrap().task_message.task, "reserve.compensate");

        orchestrator
            .on_task_result("reserve-compensate-task", true, None, None)
            .await
            .unwrap();
        let saga = store.get("s1").await.unwrap().unwrap();
        assert_eq!(saga.state, SagaState::Compensated);
    }

    #[tokio::test]
    async fn compensation_failure_retries_then_gives_up() {
        let (orchestrator, store, _outbox) = orchestrator();
        let saga = saga(vec![step("reserve", 0, true)]);
        orchestrator.start_saga(saga).await.unwrap();
        orchestrator
            .on_task_result("reserve-execute-task", false, None, Some("boom".to_string()))
            .await
            .unwrap();

        for _ in 0..MAX_COMPENSATION_ATTEMPTS {
            orchestrator.on_task_result("reserve-compensate-task", false, None, None).await.unwrap();
        }

        let saga = store.get("s1").await.unwrap().unwrap();
        assert_eq!(saga.state, SagaState::CompensationFailed);
    }
}
