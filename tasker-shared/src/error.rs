//! # Error Taxonomy
//!
//! One error enum per concern, following the shape used throughout this
//! workspace: `thiserror`-derived variants, `#[from]` conversions for wrapped
//! library errors, constructor helpers for the common cases, and a
//! `is_recoverable()` classification where callers need to decide between
//! nack-with-requeue and dead-lettering.

use thiserror::Error;

/// Crate-wide result alias.
pub type TaskerResult<T> = Result<T, TaskerError>;

/// Top-level error type returned by tasker-shared's own operations
/// (serialization, registry lookups, configuration, messaging glue).
#[derive(Debug, Error, Clone)]
pub enum TaskerError {
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    #[error("messaging error: {0}")]
    MessagingError(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("kill switch tripped")]
    KillSwitchTripped,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid queue name: {0}")]
    InvalidQueueName(String),
}

impl TaskerError {
    pub fn unknown_task(name: impl Into<String>) -> Self {
        Self::UnknownTask(name.into())
    }

    pub fn deserialization_failed(msg: impl Into<String>) -> Self {
        Self::DeserializationFailed(msg.into())
    }

    pub fn serialization_failed(msg: impl Into<String>) -> Self {
        Self::SerializationFailed(msg.into())
    }

    pub fn messaging(msg: impl Into<String>) -> Self {
        Self::MessagingError(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::ConfigurationError(msg.into())
    }

    /// Whether a caller should retry the operation rather than treat it as
    /// a terminal outcome. Used by the executor to decide nack-with-requeue
    /// versus DLQ routing for errors surfaced out of store/broker calls.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MessagingError(_) | Self::Timeout(_) | Self::CircuitOpen(_) | Self::KillSwitchTripped
        )
    }
}

/// Errors raised by messaging/broker transport operations.
#[derive(Debug, Error, Clone)]
pub enum MessagingError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("failed to send to queue {queue}: {reason}")]
    Send { queue: String, reason: String },

    #[error("failed to receive from queue {queue}: {reason}")]
    Receive { queue: String, reason: String },

    #[error("failed to ack message on queue {queue}: {reason}")]
    Ack { queue: String, reason: String },

    #[error("failed to nack message on queue {queue}: {reason}")]
    Nack { queue: String, reason: String },

    #[error("failed to create queue {queue}: {reason}")]
    QueueCreation { queue: String, reason: String },

    #[error("invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error("invalid receipt handle: {0}")]
    InvalidReceiptHandle(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("circuit breaker open for {0}")]
    CircuitBreakerOpen(String),

    #[error("health check failed: {0}")]
    HealthCheck(String),
}

impl MessagingError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection(reason.into())
    }

    pub fn send(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Send {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    pub fn receive(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Receive {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    pub fn ack(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Ack {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    pub fn nack(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Nack {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    pub fn queue_creation(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::QueueCreation {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    pub fn circuit_breaker_open(component: impl Into<String>) -> Self {
        Self::CircuitBreakerOpen(component.into())
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidQueueName(_) | Self::InvalidReceiptHandle(_) | Self::Serialization(_)
        )
    }
}

impl From<MessagingError> for TaskerError {
    fn from(value: MessagingError) -> Self {
        TaskerError::MessagingError(value.to_string())
    }
}
