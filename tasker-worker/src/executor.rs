//! # Executor (C15)
//!
//! Turns one [`BrokerMessage`] into exactly one [`TaskResult`] plus an
//! [`AckDecision`], running every guard a task must pass before its body
//! executes: unknown-task and expiry checks, idempotency via the inbox,
//! a revocation pre-check, rate limiting, the filter pipeline, single-flight
//! tracking, and partition locking. The executor never propagates an error
//! to its caller — anything unexpected is logged, folded into a `Failure`
//! result, and nacked with requeue so another worker gets a turn.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration as ChronoDuration;
use tasker_shared::broker::BrokerMessage;
use tasker_shared::clock::SharedClock;
use tasker_shared::config::BackoffConfig;
use tasker_shared::error::TaskerError;
use tasker_shared::messaging::MessageClient;
use tasker_shared::registry::{TaskContext, TaskError, TaskRegistry};
use tasker_shared::wire::{DeadLetterMessage, DeadLetterReason, ExceptionInfo, TaskMessage, TaskResult, TaskState};
use tasker_orchestration::{RevocationManager, SagaOrchestrator, Signal, SignalBus};
use tasker_stores::{
    DeadLetterStore, DelayedMessageStore, ExecutionTracker, InboxStore, PartitionLockStore,
    QueueMetrics, RateLimitRule, RateLimiter, ResultBackend,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::filter::{ExecutingOutcome, FilterContext, FilterPipeline};

/// What the worker loop should do with the broker delivery once the
/// executor returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    NackRequeue,
}

#[derive(Debug)]
pub struct ExecutionOutcome {
    pub result: TaskResult,
    pub ack: AckDecision,
}

/// Tuning knobs that don't warrant their own collaborator trait.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub worker_id: String,
    /// Default per-task rate limit applied when a task declares a
    /// `rate_limit_key`; tasks that don't declare one skip rate limiting.
    pub rate_limit: RateLimitRule,
    /// Single-flight lease handed to the execution tracker.
    pub execution_lease: StdDuration,
    /// Lease handed to the partition lock store.
    pub partition_lease: StdDuration,
    pub backoff: BackoffConfig,
    /// How long a dead-lettered row stays queryable before cleanup.
    pub dead_letter_retention: ChronoDuration,
    /// TTL applied to stored results; `None` keeps them indefinitely.
    pub result_expiry: Option<ChronoDuration>,
}

pub struct Executor {
    registry: Arc<TaskRegistry>,
    result_backend: Arc<dyn ResultBackend>,
    revocation: Arc<RevocationManager>,
    rate_limiter: Arc<dyn RateLimiter>,
    execution_tracker: Arc<dyn ExecutionTracker>,
    partition_locks: Arc<dyn PartitionLockStore>,
    delayed_store: Arc<dyn DelayedMessageStore>,
    dead_letter: Arc<dyn DeadLetterStore>,
    inbox: Arc<dyn InboxStore>,
    saga_orchestrator: Arc<SagaOrchestrator>,
    signal_bus: SignalBus,
    filters: FilterPipeline,
    client: Arc<MessageClient>,
    queue_metrics: Arc<QueueMetrics>,
    clock: SharedClock,
    config: ExecutorConfig,
}

/// Outcome of invoking the task body under its cancellation token.
enum Dispatch {
    Completed(Result<Vec<u8>, TaskError>),
    Cancelled,
}

#[allow(clippy::too_many_arguments)]
impl Executor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        result_backend: Arc<dyn ResultBackend>,
        revocation: Arc<RevocationManager>,
        rate_limiter: Arc<dyn RateLimiter>,
        execution_tracker: Arc<dyn ExecutionTracker>,
        partition_locks: Arc<dyn PartitionLockStore>,
        delayed_store: Arc<dyn DelayedMessageStore>,
        dead_letter: Arc<dyn DeadLetterStore>,
        inbox: Arc<dyn InboxStore>,
        saga_orchestrator: Arc<SagaOrchestrator>,
        signal_bus: SignalBus,
        filters: FilterPipeline,
        client: Arc<MessageClient>,
        queue_metrics: Arc<QueueMetrics>,
        clock: SharedClock,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            result_backend,
            revocation,
            rate_limiter,
            execution_tracker,
            partition_locks,
            delayed_store,
            dead_letter,
            inbox,
            saga_orchestrator,
            signal_bus,
            filters,
            client,
            queue_metrics,
            clock,
            config,
        }
    }

    /// Runs one delivery through every guard and, if it clears them all,
    /// the task body itself. Always returns — never panics, never bubbles
    /// an error to the caller.
    pub async fn execute(&self, delivery: BrokerMessage, parent_cancel: &CancellationToken) -> ExecutionOutcome {
        let message = delivery.message.clone();
        let task_id = message.id.clone();
        let now = self.clock.now();

        let local_cancel = self.revocation.register_task(&task_id, parent_cancel);

        let descriptor = match self.registry.get_or_unknown(&message.task) {
            Ok(descriptor) => descriptor,
            Err(_) => {
                self.revocation.unregister_task(&task_id);
                return self
                    .route_to_dead_letter(&delivery, DeadLetterReason::UnknownTask, None)
                    .await;
            }
        };

        if message.is_expired(now) {
            self.revocation.unregister_task(&task_id);
            return self
                .route_to_dead_letter(&delivery, DeadLetterReason::Expired, None)
                .await;
        }

        match self.inbox.is_processed(&message.id).await {
            Ok(true) => {
                self.revocation.unregister_task(&task_id);
                let result = match self.result_backend.get_result(&task_id).await {
                    Ok(Some(existing)) => existing,
                    _ => TaskResult::new(task_id.clone(), TaskState::Success),
                };
                return ExecutionOutcome { result, ack: AckDecision::Ack };
            }
            Ok(false) => {}
            Err(err) => {
                self.revocation.unregister_task(&task_id);
                return self.unexpected_failure(&task_id, err);
            }
        }

        if self.revocation.is_revoked(&task_id) {
            let result = TaskResult::new(task_id.clone(), TaskState::Revoked);
            if let Err(err) = self.result_backend.store_result(result.clone(), self.config.result_expiry).await {
                warn!(task_id, ?err, "failed to persist revoked state");
            }
            self.revocation.unregister_task(&task_id);
            return ExecutionOutcome { result, ack: AckDecision::Ack };
        }

        if let Some(rule) = descriptor.attributes.rate_limit_key.as_ref().map(|_| self.config.rate_limit) {
            match self.rate_limiter.try_acquire(&message.task, rule).await {
                Ok(outcome) if !outcome.allowed => {
                    self.revocation.unregister_task(&task_id);
                    let delay = outcome
                        .retry_after
                        .and_then(|d| ChronoDuration::from_std(d).ok());
                    let result = TaskResult::retry(task_id.clone(), true, delay);
                    let ack = self.requeue(&message, &delivery, delay).await;
                    return ExecutionOutcome { result, ack };
                }
                Ok(_) => {}
                Err(err) => {
                    self.revocation.unregister_task(&task_id);
                    return self.unexpected_failure(&task_id, err);
                }
            }
        }

        let mut ctx = FilterContext::new(message.clone(), descriptor.input_type);
        let (ran, outcome) = match self.filters.run_executing(&mut ctx).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.revocation.unregister_task(&task_id);
                return self.unexpected_failure(&task_id, err);
            }
        };
        if matches!(outcome, ExecutingOutcome::Skip) {
            let result = TaskResult::retry(task_id.clone(), true, ctx.requeue_delay);
            self.filters.run_executed(ran, &mut ctx, &result).await;
            self.revocation.unregister_task(&task_id);
            let ack = self.requeue(&message, &delivery, ctx.requeue_delay).await;
            return ExecutionOutcome { result, ack };
        }

        let dedup_key = message.correlation_id.as_deref();
        match self
            .execution_tracker
            .try_start(&message.task, &task_id, dedup_key, Some(self.config.execution_lease))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                self.revocation.unregister_task(&task_id);
                let delay = ChronoDuration::from_std(self.config.backoff.delay_for_attempt(1)).ok();
                let result = TaskResult::retry(task_id.clone(), true, delay);
                let ack = self.requeue(&message, &delivery, delay).await;
                return ExecutionOutcome { result, ack };
            }
            Err(err) => {
                self.revocation.unregister_task(&task_id);
                return self.unexpected_failure(&task_id, err);
            }
        }

        let partition_key = descriptor.attributes.partition_key_template.as_ref().map(|template| {
            template.replace("{task_id}", &task_id)
        });
        if let Some(partition_key) = &partition_key {
            match self
                .partition_locks
                .try_acquire(partition_key, &task_id, self.config.partition_lease)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    let _ = self.execution_tracker.stop(&message.task, &task_id, dedup_key).await;
                    self.revocation.unregister_task(&task_id);
                    let result = TaskResult::retry(task_id.clone(), true, ctx.requeue_delay);
                    self.filters.run_executed(ran, &mut ctx, &result).await;
                    let ack = self.requeue(&message, &delivery, ctx.requeue_delay).await;
                    return ExecutionOutcome { result, ack };
                }
                Err(err) => {
                    let _ = self.execution_tracker.stop(&message.task, &task_id, dedup_key).await;
                    self.revocation.unregister_task(&task_id);
                    return self.unexpected_failure(&task_id, err);
                }
            }
        }

        let _ = self
            .result_backend
            .update_state(&task_id, TaskState::Started, None)
            .await;
        self.queue_metrics.record_started(&delivery.queue);
        let dispatch_started_at = self.clock.now();

        let task_ctx = TaskContext {
            task_id: task_id.clone(),
            task_name: message.task.clone(),
            retries: message.retries,
        };
        let dispatch = tokio::select! {
            biased;
            _ = local_cancel.cancelled() => Dispatch::Cancelled,
            outcome = descriptor.invoke(&message.args, &task_ctx) => Dispatch::Completed(outcome),
        };

        let duration_ms = (self.clock.now() - dispatch_started_at)
            .num_milliseconds()
            .max(0) as u64;

        let _ = self.execution_tracker.stop(&message.task, &task_id, dedup_key).await;
        if let Some(partition_key) = &partition_key {
            let _ = self.partition_locks.release(partition_key, &task_id).await;
        }

        let (result, ack, dlq) = self.classify(&message, dispatch, duration_ms).await;

        self.filters.run_executed(ran, &mut ctx, &result).await;
        self.queue_metrics
            .record_completed(&delivery.queue, result.state == TaskState::Success, duration_ms, self.clock.now());

        if let Some(reason) = dlq {
            self.dead_letter_row(&delivery, reason, result.exception.clone()).await;
        }

        let task_name = message.task.clone();

        if let Err(err) = self
            .saga_orchestrator
            .on_task_result(
                &task_id,
                result.state == TaskState::Success,
                result.result.clone(),
                result.exception.as_ref().map(|e| e.message.clone()),
            )
            .await
        {
            warn!(task_id, ?err, "saga advance failed");
        }

        let _ = self.inbox.mark_processed(&message.id).await;
        self.publish_outcome_signals(&task_id, &task_name, &result).await;
        self.revocation.unregister_task(&task_id);

        ExecutionOutcome { result, ack }
    }

    async fn classify(
        &self,
        message: &TaskMessage,
        dispatch: Dispatch,
        duration_ms: u64,
    ) -> (TaskResult, AckDecision, Option<DeadLetterReason>) {
        let task_id = &message.id;
        match dispatch {
            Dispatch::Cancelled => {
                let result = TaskResult::new(task_id.clone(), TaskState::Revoked);
                let _ = self.result_backend.store_result(result.clone(), self.config.result_expiry).await;
                (result, AckDecision::Ack, None)
            }
            Dispatch::Completed(Ok(bytes)) => {
                let mut result = TaskResult::success(task_id.clone(), bytes, "application/json");
                result.duration_ms = Some(duration_ms);
                result.completed_at = Some(self.clock.now());
                result.worker = Some(self.config.worker_id.clone());
                result.retries = message.retries;
                let _ = self.result_backend.store_result(result.clone(), self.config.result_expiry).await;
                (result, AckDecision::Ack, None)
            }
            Dispatch::Completed(Err(TaskError::RetryRequested(delay))) => {
                let chrono_delay = ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::zero());
                let next_retries = message.retries + 1;
                if next_retries >= message.max_retries {
                    let result = TaskResult::failure(
                        task_id.clone(),
                        ExceptionInfo::new("MaxRetriesExceeded", "retry budget exhausted"),
                    );
                    let _ = self.result_backend.store_result(result.clone(), self.config.result_expiry).await;
                    return (result, AckDecision::Ack, Some(DeadLetterReason::MaxRetriesExceeded));
                }

                let mut retry_message = message.clone();
                retry_message.retries = next_retries;
                let deliver_at = self.clock.now() + chrono_delay;
                if let Err(err) = self.delayed_store.add_async(retry_message, deliver_at).await {
                    warn!(task_id = %task_id, ?err, "failed to schedule retry, nacking for redelivery");
                    let result = TaskResult::retry(task_id.clone(), false, Some(chrono_delay));
                    return (result, AckDecision::NackRequeue, None);
                }

                let mut result = TaskResult::retry(task_id.clone(), false, Some(chrono_delay));
                result.retries = next_retries;
                let _ = self.result_backend.store_result(result.clone(), None).await;
                (result, AckDecision::Ack, None)
            }
            Dispatch::Completed(Err(TaskError::TimeLimitExceeded)) => {
                let result = TaskResult::failure(task_id.clone(), ExceptionInfo::new("TimeLimitExceeded", "task exceeded its time limit"));
                let _ = self.result_backend.store_result(result.clone(), self.config.result_expiry).await;
                (result, AckDecision::Ack, Some(DeadLetterReason::TimeLimitExceeded))
            }
            Dispatch::Completed(Err(TaskError::Rejected(reason))) => {
                let mut result = TaskResult::new(task_id.clone(), TaskState::Rejected);
                result.exception = Some(ExceptionInfo::new("Rejected", reason));
                let _ = self.result_backend.store_result(result.clone(), self.config.result_expiry).await;
                (result, AckDecision::Ack, Some(DeadLetterReason::Rejected))
            }
            Dispatch::Completed(Err(TaskError::Failed(reason))) => {
                let result = TaskResult::failure(task_id.clone(), ExceptionInfo::new("Failed", reason));
                let _ = self.result_backend.store_result(result.clone(), self.config.result_expiry).await;
                (result, AckDecision::Ack, Some(DeadLetterReason::Failed))
            }
        }
    }

    async fn unexpected_failure(&self, task_id: &str, err: TaskerError) -> ExecutionOutcome {
        warn!(task_id, ?err, "unexpected infrastructure error, nacking for redelivery");
        let result = TaskResult::failure(task_id.to_string(), ExceptionInfo::new("InfrastructureError", err.to_string()));
        ExecutionOutcome { result, ack: AckDecision::NackRequeue }
    }

    async fn route_to_dead_letter(
        &self,
        delivery: &BrokerMessage,
        reason: DeadLetterReason,
        exception: Option<ExceptionInfo>,
    ) -> ExecutionOutcome {
        self.dead_letter_row(delivery, reason, exception).await;
        let state = match reason {
            DeadLetterReason::Rejected | DeadLetterReason::UnknownTask | DeadLetterReason::Expired => TaskState::Rejected,
            _ => TaskState::Failure,
        };
        let result = TaskResult::new(delivery.message.id.clone(), state);
        ExecutionOutcome { result, ack: AckDecision::Ack }
    }

    async fn dead_letter_row(&self, delivery: &BrokerMessage, reason: DeadLetterReason, exception: Option<ExceptionInfo>) {
        let now = self.clock.now();
        let row = DeadLetterMessage {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: delivery.message.id.clone(),
            task_name: delivery.message.task.clone(),
            queue: delivery.queue.clone(),
            reason,
            original_message: serde_json::to_vec(&delivery.message).unwrap_or_default(),
            exception,
            retry_count: delivery.message.retries,
            timestamp: now,
            expires_at: now + self.config.dead_letter_retention,
            worker: Some(self.config.worker_id.clone()),
        };
        if let Err(err) = self.dead_letter.store(row).await {
            warn!(task_id = %delivery.message.id, ?err, "failed to record dead-letter row");
        }
    }

    /// Publishes back onto the broker after `delay`, falling back to the
    /// delayed store for non-zero delays so the message doesn't sit
    /// occupying a broker-side visibility timeout in the meantime.
    async fn requeue(&self, message: &TaskMessage, delivery: &BrokerMessage, delay: Option<ChronoDuration>) -> AckDecision {
        match delay.filter(|d| *d > ChronoDuration::zero()) {
            Some(delay) => {
                let deliver_at = self.clock.now() + delay;
                match self.delayed_store.add_async(message.clone(), deliver_at).await {
                    Ok(()) => AckDecision::Ack,
                    Err(err) => {
                        warn!(task_id = %message.id, ?err, "failed to schedule delayed requeue");
                        AckDecision::NackRequeue
                    }
                }
            }
            None => match self.client.requeue(&delivery.queue, message, ChronoDuration::zero()).await {
                Ok(()) => AckDecision::Ack,
                Err(err) => {
                    warn!(task_id = %message.id, ?err, "failed to requeue immediately");
                    AckDecision::NackRequeue
                }
            },
        }
    }

    async fn publish_outcome_signals(&self, task_id: &str, task_name: &str, result: &TaskResult) {
        let _ = self
            .signal_bus
            .publish(Signal::TaskPostRun { task_id: task_id.to_string(), task_name: task_name.to_string() })
            .await;

        let outcome_signal = match result.state {
            TaskState::Success => Some(Signal::TaskSuccess { task_id: task_id.to_string() }),
            TaskState::Failure => Some(Signal::TaskFailure {
                task_id: task_id.to_string(),
                error: result.exception.as_ref().map(|e| e.message.clone()).unwrap_or_default(),
            }),
            TaskState::Retry => result.requeue_delay.map(|delay| Signal::TaskRetry { task_id: task_id.to_string(), retry_after: delay }),
            TaskState::Revoked => Some(Signal::TaskRevoked { task_id: task_id.to_string() }),
            TaskState::Rejected => Some(Signal::TaskRejected {
                task_id: task_id.to_string(),
                reason: result.exception.as_ref().map(|e| e.message.clone()).unwrap_or_default(),
            }),
            _ => None,
        };
        if let Some(signal) = outcome_signal {
            let _ = self.signal_bus.publish(signal).await;
        }
        info!(task_id, state = ?result.state, "task execution finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use tasker_shared::broker::{Broker, DeliveryTag};
    use tasker_shared::clock::system_clock;
    use tasker_shared::error::MessagingError;
    use tasker_shared::messaging::DefaultMessageRouter;
    use tasker_shared::registry::{HandlerResult, TaskAttributes, TaskHandler};
    use tasker_stores::{
        InMemoryDeadLetterStore, InMemoryDelayedMessageStore, InMemoryExecutionTracker, InMemoryInboxStore,
        InMemoryOutboxStore, InMemoryPartitionLockStore, InMemoryResultBackend, InMemoryRevocationStore,
        InMemorySagaStore, SlidingWindowRateLimiter,
    };
    use std::future::Future;
    use std::pin::Pin;

    type BoxedHandlerResult<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

    #[derive(Debug, Default)]
    struct NoopBroker;

    #[async_trait]
    impl Broker for NoopBroker {
        async fn consume(&self, _queues: &[String], _prefetch: usize) -> Result<BoxStream<'static, BrokerMessage>, MessagingError> {
            Err(MessagingError::connection("not used in this test"))
        }
        async fn publish(&self, _queue: &str, _message: &TaskMessage) -> Result<(), MessagingError> {
            Ok(())
        }
        async fn ack(&self, _delivery_tag: &DeliveryTag) -> Result<(), MessagingError> {
            Ok(())
        }
        async fn nack(&self, _delivery_tag: &DeliveryTag, _requeue: bool) -> Result<(), MessagingError> {
            Ok(())
        }
        async fn requeue(&self, _queue: &str, _message: &TaskMessage, _delay: ChronoDuration) -> Result<(), MessagingError> {
            Ok(())
        }
        async fn health_check(&self) -> Result<bool, MessagingError> {
            Ok(true)
        }
    }

    fn echo_handler() -> Arc<dyn TaskHandler> {
        Arc::new(|args: &[u8], _ctx: &TaskContext| -> BoxedHandlerResult<'_> {
            let out = args.to_vec();
            Box::pin(async move { Ok(out) })
        })
    }

    fn failing_handler() -> Arc<dyn TaskHandler> {
        Arc::new(|_args: &[u8], _ctx: &TaskContext| -> BoxedHandlerResult<'_> {
            Box::pin(async move { Err(TaskError::Failed("boom".to_string())) })
        })
    }

    struct Harness {
        executor: Executor,
        dead_letter: Arc<InMemoryDeadLetterStore>,
        result_backend: Arc<InMemoryResultBackend>,
    }

    fn harness(task_name: &str, handler: Arc<dyn TaskHandler>) -> Harness {
        let clock = system_clock();
        let registry = Arc::new(TaskRegistry::new());
        registry.register(task_name, "Args", "Out", TaskAttributes::default(), handler);

        let result_backend = Arc::new(InMemoryResultBackend::new(clock.clone()));
        let revocation = Arc::new(RevocationManager::new(Arc::new(InMemoryRevocationStore::new(clock.clone()))));
        let rate_limiter = Arc::new(SlidingWindowRateLimiter::new(clock.clone()));
        let execution_tracker = Arc::new(InMemoryExecutionTracker::new(clock.clone(), StdDuration::from_secs(30)));
        let partition_locks = Arc::new(InMemoryPartitionLockStore::new(clock.clone()));
        let delayed_store = Arc::new(InMemoryDelayedMessageStore::new());
        let dead_letter = Arc::new(InMemoryDeadLetterStore::new(clock.clone()));
        let inbox = Arc::new(InMemoryInboxStore::new(clock.clone()));
        let saga_store = Arc::new(InMemorySagaStore::new(clock.clone()));
        let outbox = Arc::new(InMemoryOutboxStore::new(clock.clone()));
        let saga_orchestrator = Arc::new(SagaOrchestrator::new(saga_store, outbox, "worker_default_queue"));
        let (signal_bus, _runner) = SignalBus::new(16, 4);
        let client = Arc::new(MessageClient::new(Arc::new(NoopBroker), Arc::new(DefaultMessageRouter::default())));
        let queue_metrics = Arc::new(QueueMetrics::new());

        let executor = Executor::new(
            registry,
            result_backend.clone(),
            revocation,
            rate_limiter,
            execution_tracker,
            partition_locks,
            delayed_store,
            dead_letter.clone(),
            inbox,
            saga_orchestrator,
            signal_bus,
            FilterPipeline::new(Vec::new()),
            client,
            queue_metrics,
            clock,
            ExecutorConfig {
                worker_id: "worker-1".to_string(),
                rate_limit: RateLimitRule { limit: 100, window: StdDuration::from_secs(60) },
                execution_lease: StdDuration::from_secs(30),
                partition_lease: StdDuration::from_secs(30),
                backoff: BackoffConfig::default(),
                dead_letter_retention: ChronoDuration::days(7),
                result_expiry: None,
            },
        );

        Harness { executor, dead_letter, result_backend }
    }

    fn delivery(message: TaskMessage) -> BrokerMessage {
        BrokerMessage {
            message,
            delivery_tag: DeliveryTag::new("tag-1"),
            queue: "worker_default_queue".to_string(),
            received_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn successful_task_is_acked_with_a_success_result() {
        let harness = harness("demo.echo", echo_handler());
        let message = TaskMessage::new("t1", "demo.echo", "worker_default_queue").with_args(b"hi".to_vec(), "application/json");
        let outcome = harness.executor.execute(delivery(message), &CancellationToken::new()).await;

        assert_eq!(outcome.ack, AckDecision::Ack);
        assert_eq!(outcome.result.state, TaskState::Success);
        assert_eq!(outcome.result.result, Some(b"hi".to_vec()));
    }

    #[tokio::test]
    async fn unknown_task_is_dead_lettered_and_rejected() {
        let harness = harness("demo.echo", echo_handler());
        let message = TaskMessage::new("t1", "demo.unregistered", "worker_default_queue");
        let outcome = harness.executor.execute(delivery(message), &CancellationToken::new()).await;

        assert_eq!(outcome.result.state, TaskState::Rejected);
        assert_eq!(harness.dead_letter.get_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn a_failing_task_is_dead_lettered_and_marked_failure() {
        let harness = harness("demo.fail", failing_handler());
        let message = TaskMessage::new("t1", "demo.fail", "worker_default_queue");
        let outcome = harness.executor.execute(delivery(message), &CancellationToken::new()).await;

        assert_eq!(outcome.result.state, TaskState::Failure);
        assert_eq!(harness.dead_letter.get_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn already_processed_message_short_circuits_with_stored_result() {
        let harness = harness("demo.echo", echo_handler());
        let message = TaskMessage::new("t1", "demo.echo", "worker_default_queue").with_args(b"hi".to_vec(), "application/json");
        harness.executor.execute(delivery(message.clone()), &CancellationToken::new()).await;

        let replay = harness.executor.execute(delivery(message), &CancellationToken::new()).await;
        assert_eq!(replay.ack, AckDecision::Ack);
        assert_eq!(replay.result.state, TaskState::Success);
        assert!(harness.result_backend.get_result("t1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn revoked_task_never_reaches_the_handler() {
        let harness = harness("demo.echo", echo_handler());
        let task_id = "t1".to_string();
        harness
            .executor
            .revocation
            .revoke(&[task_id.clone()], tasker_orchestration::RevokeOptions {
                terminate: true,
                mode: tasker_stores::revocation::TerminationMode::Immediate,
            })
            .await
            .unwrap();

        let message = TaskMessage::new(task_id, "demo.echo", "worker_default_queue");
        let outcome = harness.executor.execute(delivery(message), &CancellationToken::new()).await;
        assert_eq!(outcome.result.state, TaskState::Revoked);
    }
}
