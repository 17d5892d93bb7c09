//! # Coordination wire records (spec §3).
//!
//! One struct/enum per entity owned by a single store contract in
//! `tasker-stores`. Components reference each other by id only — no cycles
//! in the logical graph (saga → steps → signatures; outbox → task message;
//! DLQ → task-message bytes).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::task_message::TaskMessage;
use super::task_result::ExceptionInfo;

/// Single-flight token kept by the Execution Tracker (C7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A scheduled message kept by the Delayed-Message Store (C8).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelayedMessage {
    pub task_id: String,
    pub message: TaskMessage,
    pub delivery_time: DateTime<Utc>,
}

/// Outbox row status (C9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    Dispatched,
    Failed,
}

/// After this many failed dispatch attempts an outbox row sticks at `Failed`.
pub const OUTBOX_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxMessage {
    pub id: String,
    pub task_message: TaskMessage,
    pub status: OutboxStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Server-assigned, strictly increasing per store.
    pub sequence_number: u64,
}

impl OutboxMessage {
    pub fn new(id: impl Into<String>, task_message: TaskMessage, sequence_number: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            task_message,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at,
            dispatched_at: None,
            sequence_number,
        }
    }
}

/// Idempotency log entry (C9 inbox). Presence means "already applied".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboxRecord {
    pub message_id: String,
    pub processed_at: DateTime<Utc>,
}

/// Reason a task was terminally routed to the Dead-Letter Store (C11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeadLetterReason {
    MaxRetriesExceeded,
    Rejected,
    TimeLimitExceeded,
    Expired,
    UnknownTask,
    Failed,
    DeserializationFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterMessage {
    pub id: String,
    pub task_id: String,
    pub task_name: String,
    pub queue: String,
    pub reason: DeadLetterReason,
    pub original_message: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

/// Saga state machine (C10). `Any → Cancelled` is always legal; otherwise
/// `Created → Executing → {Completed | Failed → Compensating → {Compensated
/// | CompensationFailed}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaState {
    Created,
    Executing,
    Compensating,
    Completed,
    Failed,
    Compensated,
    CompensationFailed,
    Cancelled,
}

impl SagaState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SagaState::Completed
                | SagaState::Compensated
                | SagaState::CompensationFailed
                | SagaState::Cancelled
        )
    }

    /// Whether `from -> to` is a legal transition per the state machine in
    /// spec §4.10. `Cancelled` is reachable from any non-terminal state.
    pub fn can_transition(self, to: SagaState) -> bool {
        if to == SagaState::Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (SagaState::Created, SagaState::Executing)
                | (SagaState::Executing, SagaState::Completed)
                | (SagaState::Executing, SagaState::Failed)
                | (SagaState::Failed, SagaState::Compensating)
                | (SagaState::Compensating, SagaState::Compensated)
                | (SagaState::Compensating, SagaState::CompensationFailed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaStepState {
    Pending,
    Executing,
    Completed,
    Failed,
    Compensating,
    Compensated,
    CompensationFailed,
    Skipped,
}

/// A task signature: name + opaque args, enough to dispatch a task without
/// re-resolving the caller's type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSignature {
    pub task: String,
    pub args: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SagaStep {
    pub id: String,
    pub name: String,
    pub order: u32,
    pub execute_task: TaskSignature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensate_task: Option<TaskSignature>,
    pub state: SagaStepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensate_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// How many times compensation has been attempted for this step.
    #[serde(default)]
    pub compensation_attempts: u32,
}

impl SagaStep {
    pub fn has_compensation(&self) -> bool {
        self.compensate_task.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Saga {
    pub id: String,
    pub name: String,
    pub state: SagaState,
    pub steps: Vec<SagaStep>,
    pub current_step_index: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Whether a failed step auto-triggers `Compensating` (spec §4.10).
    #[serde(default = "default_true")]
    pub auto_compensate_on_failure: bool,
}

fn default_true() -> bool {
    true
}

impl Saga {
    /// Steps eligible for compensation, in strict reverse `order`
    /// (spec §4.10, §8 invariant 5): completed steps that carry a
    /// compensation signature.
    pub fn compensation_order(&self) -> Vec<&SagaStep> {
        let mut eligible: Vec<&SagaStep> = self
            .steps
            .iter()
            .filter(|s| s.state == SagaStepState::Completed && s.has_compensation())
            .collect();
        eligible.sort_by(|a, b| b.order.cmp(&a.order));
        eligible
    }
}

/// Exclusive lease over a user-defined partition key (C6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartitionLock {
    pub partition_key: String,
    pub task_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PartitionLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Time-bucketed roll-up per `(task_name?, queue?)` (C18).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    pub success_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    pub revoked_count: u64,
    pub avg_execution_time_ms: f64,
}
