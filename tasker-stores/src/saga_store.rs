//! # Saga Store (C10, persistence half)
//!
//! Owns the durable saga/step records; the state-machine legality checks
//! themselves live on [`tasker_shared::wire::SagaState`] and are enforced
//! here before any transition is persisted.

use async_trait::async_trait;
use dashmap::DashMap;
use tasker_shared::clock::SharedClock;
use tasker_shared::error::TaskerError;
use tasker_shared::wire::{Saga, SagaState, SagaStepState};

#[async_trait]
pub trait SagaStore: Send + Sync + std::fmt::Debug {
    async fn create(&self, saga: Saga) -> Result<(), TaskerError>;

    async fn get(&self, id: &str) -> Result<Option<Saga>, TaskerError>;

    async fn update_state(&self, id: &str, state: SagaState, reason: Option<String>) -> Result<(), TaskerError>;

    async fn update_step_state(
        &self,
        id: &str,
        step_id: &str,
        new_state: SagaStepState,
        result: Option<Vec<u8>>,
        error: Option<String>,
    ) -> Result<(), TaskerError>;

    async fn mark_step_compensated(&self, id: &str, step_id: &str, success: bool) -> Result<(), TaskerError>;

    /// Bumps `compensation_attempts` without changing step state; used between
    /// a failed compensation attempt and a retry.
    async fn record_compensation_attempt(&self, id: &str, step_id: &str) -> Result<u32, TaskerError>;

    async fn advance_step(&self, id: &str) -> Result<(), TaskerError>;

    async fn delete(&self, id: &str) -> Result<(), TaskerError>;

    async fn get_saga_id_for_task(&self, task_id: &str) -> Result<Option<String>, TaskerError>;

    async fn get_by_state(&self, state: SagaState, limit: usize) -> Result<Vec<Saga>, TaskerError>;
}

#[derive(Debug)]
pub struct InMemorySagaStore {
    sagas: DashMap<String, Saga>,
    clock: SharedClock,
}

impl InMemorySagaStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            sagas: DashMap::new(),
            clock,
        }
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn create(&self, saga: Saga) -> Result<(), TaskerError> {
        self.sagas.insert(saga.id.clone(), saga);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Saga>, TaskerError> {
        Ok(self.sagas.get(id).map(|s| s.clone()))
    }

    async fn update_state(&self, id: &str, state: SagaState, reason: Option<String>) -> Result<(), TaskerError> {
        let mut saga = self
            .sagas
            .get_mut(id)
            .ok_or_else(|| TaskerError::configuration(format!("unknown saga: {id}")))?;

        if !saga.state.can_transition(state) {
            return Err(TaskerError::configuration(format!(
                "illegal saga transition {:?} -> {:?}",
                saga.state, state
            )));
        }

        let now = self.clock.now();
        if state == SagaState::Executing && saga.started_at.is_none() {
            saga.started_at = Some(now);
        }
        if state.is_terminal() {
            saga.completed_at = Some(now);
        }
        if let Some(reason) = reason {
            saga.failure_reason = Some(reason);
        }
        saga.state = state;
        Ok(())
    }

    async fn update_step_state(
        &self,
        id: &str,
        step_id: &str,
        new_state: SagaStepState,
        result: Option<Vec<u8>>,
        error: Option<String>,
    ) -> Result<(), TaskerError> {
        let mut saga = self
            .sagas
            .get_mut(id)
            .ok_or_else(|| TaskerError::configuration(format!("unknown saga: {id}")))?;
        let now = self.clock.now();

        let step = saga
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| TaskerError::configuration(format!("unknown step: {step_id}")))?;

        if new_state == SagaStepState::Executing && step.started_at.is_none() {
            step.started_at = Some(now);
        }
        if matches!(
            new_state,
            SagaStepState::Completed | SagaStepState::Failed | SagaStepState::Skipped
        ) {
            step.completed_at = Some(now);
        }
        step.state = new_state;
        step.result = result.or(step.result.take());
        step.error = error.or(step.error.take());
        Ok(())
    }

    async fn mark_step_compensated(&self, id: &str, step_id: &str, success: bool) -> Result<(), TaskerError> {
        let mut saga = self
            .sagas
            .get_mut(id)
            .ok_or_else(|| TaskerError::configuration(format!("unknown saga: {id}")))?;

        let step = saga
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| TaskerError::configuration(format!("unknown step: {step_id}")))?;

        step.compensation_attempts += 1;
        step.state = if success {
            SagaStepState::Compensated
        } else {
            SagaStepState::CompensationFailed
        };
        Ok(())
    }

    async fn record_compensation_attempt(&self, id: &str, step_id: &str) -> Result<u32, TaskerError> {
        let mut saga = self
            .sagas
            .get_mut(id)
            .ok_or_else(|| TaskerError::configuration(format!("unknown saga: {id}")))?;
        let step = saga
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| TaskerError::configuration(format!("unknown step: {step_id}")))?;
        step.compensation_attempts += 1;
        Ok(step.compensation_attempts)
    }

    async fn advance_step(&self, id: &str) -> Result<(), TaskerError> {
        let mut saga = self
            .sagas
            .get_mut(id)
            .ok_or_else(|| TaskerError::configuration(format!("unknown saga: {id}")))?;
        if saga.current_step_index + 1 < saga.steps.len() {
            saga.current_step_index += 1;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), TaskerError> {
        self.sagas.remove(id);
        Ok(())
    }

    async fn get_saga_id_for_task(&self, task_id: &str) -> Result<Option<String>, TaskerError> {
        Ok(self
            .sagas
            .iter()
            .find(|entry| {
                entry
                    .steps
                    .iter()
                    .any(|s| s.execute_task_id.as_deref() == Some(task_id) || s.compensate_task_id.as_deref() == Some(task_id))
            })
            .map(|entry| entry.id.clone()))
    }

    async fn get_by_state(&self, state: SagaState, limit: usize) -> Result<Vec<Saga>, TaskerError> {
        Ok(self
            .sagas
            .iter()
            .filter(|entry| entry.state == state)
            .take(limit)
            .map(|entry| entry.value().clone())
            .collect())
    }
}
