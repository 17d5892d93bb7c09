//! # Broker transport contract (spec §6)
//!
//! Not defined by this workspace beyond the contract: `Consume`, `Publish`,
//! `Ack`, `Nack`, `Requeue`. Concrete transports (AMQP, SQS, a database
//! queue) live outside this crate; `tasker-stores` ships an in-memory
//! reference implementation sufficient for tests and single-process
//! deployments.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use futures::stream::BoxStream;
use std::fmt::Debug;

use crate::error::MessagingError;
use crate::wire::TaskMessage;

/// Opaque handle a broker hands back for a delivered message, round-tripped
/// on ack/nack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub String);

impl DeliveryTag {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

/// A single delivery handed to the worker loop.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub message: TaskMessage,
    pub delivery_tag: DeliveryTag,
    pub queue: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

/// The message-queue transport contract every worker loop and dispatcher
/// consumes through. Object-safe so callers can hold `Arc<dyn Broker>`.
#[async_trait]
pub trait Broker: Send + Sync + Debug {
    /// Open a consumer stream over `queues`, admitting at most `prefetch`
    /// in-flight deliveries before the broker itself applies backpressure.
    async fn consume(
        &self,
        queues: &[String],
        prefetch: usize,
    ) -> Result<BoxStream<'static, BrokerMessage>, MessagingError>;

    async fn publish(&self, queue: &str, message: &TaskMessage) -> Result<(), MessagingError>;

    async fn ack(&self, delivery_tag: &DeliveryTag) -> Result<(), MessagingError>;

    async fn nack(&self, delivery_tag: &DeliveryTag, requeue: bool) -> Result<(), MessagingError>;

    /// Publish `message` back onto `queue` after `delay` — used by the
    /// executor/dispatcher for rate-limit and retry requeues.
    async fn requeue(
        &self,
        queue: &str,
        message: &TaskMessage,
        delay: ChronoDuration,
    ) -> Result<(), MessagingError>;

    async fn health_check(&self) -> Result<bool, MessagingError>;
}
