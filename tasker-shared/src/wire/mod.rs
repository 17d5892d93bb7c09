//! Wire types shared between producers, brokers, and workers.

mod records;
mod task_message;
mod task_result;

pub use records::{
    DeadLetterMessage, DeadLetterReason, DelayedMessage, ExecutionRecord, InboxRecord,
    MetricsSnapshot, OutboxMessage, OutboxStatus, PartitionLock, Saga, SagaState, SagaStep,
    SagaStepState, TaskSignature, OUTBOX_MAX_ATTEMPTS,
};
pub use task_message::TaskMessage;
pub use task_result::{ExceptionInfo, TaskResult, TaskState};
