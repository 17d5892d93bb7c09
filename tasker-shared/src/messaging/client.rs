//! # Message Client
//!
//! Facade over a `Broker` transport and a `MessageRouter` naming scheme,
//! optionally guarding publish/consume operations behind a `CircuitBreaker`
//! so a failing broker degrades to fast rejection instead of blocking
//! dispatchers and workers indefinitely.

use std::sync::Arc;
use std::time::Instant;

use chrono::Duration as ChronoDuration;
use futures::stream::BoxStream;

use crate::broker::{Broker, BrokerMessage, DeliveryTag};
use crate::error::{MessagingError, TaskerError};
use crate::messaging::router::MessageRouter;
use crate::resilience::CircuitBreaker;
use crate::wire::TaskMessage;

#[derive(Debug)]
pub struct MessageClient {
    broker: Arc<dyn Broker>,
    router: Arc<dyn MessageRouter>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl MessageClient {
    pub fn new(broker: Arc<dyn Broker>, router: Arc<dyn MessageRouter>) -> Self {
        Self {
            broker,
            router,
            circuit_breaker: None,
        }
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn router(&self) -> &Arc<dyn MessageRouter> {
        &self.router
    }

    async fn guarded<F, T>(&self, op: F) -> Result<T, TaskerError>
    where
        F: std::future::Future<Output = Result<T, MessagingError>>,
    {
        if let Some(breaker) = &self.circuit_breaker {
            if !breaker.should_allow() {
                return Err(TaskerError::CircuitOpen(breaker.name().to_string()));
            }
            let start = Instant::now();
            match op.await {
                Ok(value) => {
                    breaker.record_success_manual(start.elapsed());
                    Ok(value)
                }
                Err(err) => {
                    breaker.record_failure_manual(start.elapsed());
                    Err(err.into())
                }
            }
        } else {
            op.await.map_err(TaskerError::from)
        }
    }

    pub async fn publish_to_namespace(
        &self,
        namespace: &str,
        message: &TaskMessage,
    ) -> Result<(), TaskerError> {
        let queue = self.router.task_queue(namespace)?;
        self.guarded(self.broker.publish(&queue, message)).await
    }

    pub async fn publish(&self, queue: &str, message: &TaskMessage) -> Result<(), TaskerError> {
        self.guarded(self.broker.publish(queue, message)).await
    }

    pub async fn consume(
        &self,
        queues: &[String],
        prefetch: usize,
    ) -> Result<BoxStream<'static, BrokerMessage>, TaskerError> {
        self.guarded(self.broker.consume(queues, prefetch)).await
    }

    pub async fn ack(&self, delivery_tag: &DeliveryTag) -> Result<(), TaskerError> {
        self.broker.ack(delivery_tag).await.map_err(TaskerError::from)
    }

    pub async fn nack(&self, delivery_tag: &DeliveryTag, requeue: bool) -> Result<(), TaskerError> {
        self.broker
            .nack(delivery_tag, requeue)
            .await
            .map_err(TaskerError::from)
    }

    pub async fn requeue(
        &self,
        queue: &str,
        message: &TaskMessage,
        delay: ChronoDuration,
    ) -> Result<(), TaskerError> {
        self.guarded(self.broker.requeue(queue, message, delay)).await
    }

    pub async fn health_check(&self) -> Result<bool, TaskerError> {
        self.broker.health_check().await.map_err(TaskerError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::router::DefaultMessageRouter;
    use crate::resilience::CircuitBreakerConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FailingBroker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Broker for FailingBroker {
        async fn consume(
            &self,
            _queues: &[String],
            _prefetch: usize,
        ) -> Result<BoxStream<'static, BrokerMessage>, MessagingError> {
            Err(MessagingError::connection("unreachable"))
        }

        async fn publish(&self, _queue: &str, _message: &TaskMessage) -> Result<(), MessagingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MessagingError::connection("unreachable"))
        }

        async fn ack(&self, _delivery_tag: &DeliveryTag) -> Result<(), MessagingError> {
            Ok(())
        }

        async fn nack(&self, _delivery_tag: &DeliveryTag, _requeue: bool) -> Result<(), MessagingError> {
            Ok(())
        }

        async fn requeue(
            &self,
            _queue: &str,
            _message: &TaskMessage,
            _delay: ChronoDuration,
        ) -> Result<(), MessagingError> {
            Ok(())
        }

        async fn health_check(&self) -> Result<bool, MessagingError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn circuit_trips_after_repeated_publish_failures() {
        let broker = Arc::new(FailingBroker::default());
        let router = Arc::new(DefaultMessageRouter::default());
        let breaker = Arc::new(CircuitBreaker::new(
            "broker".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 2,
                ..CircuitBreakerConfig::default()
            },
        ));
        let client = MessageClient::new(broker.clone(), router).with_circuit_breaker(breaker);

        let message = TaskMessage::new("t1", "demo.task", "queue_a");
        assert!(client.publish("queue_a", &message).await.is_err());
        assert!(client.publish("queue_a", &message).await.is_err());

        // Third call should be rejected by the open circuit without
        // reaching the broker.
        let result = client.publish("queue_a", &message).await;
        assert!(matches!(result, Err(TaskerError::CircuitOpen(_))));
        assert_eq!(broker.calls.load(Ordering::SeqCst), 2);
    }
}
