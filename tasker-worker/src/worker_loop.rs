//! # Worker Loop & Graceful Shutdown (C17)
//!
//! Consumes deliveries from a [`Broker`], bounds in-flight executions to
//! `concurrency`, and acks/nacks according to the [`Executor`]'s decision.
//! `Prefetch` is enforced by the broker itself (passed through to
//! `Broker::consume`); `concurrency` is enforced here with a semaphore so a
//! deep prefetch window doesn't translate into unbounded parallel task
//! bodies.
//!
//! Shutdown is two-phase. A caller signals `shutdown` to stop dequeuing new
//! deliveries and starts a grace period: running tasks keep their own
//! `local_cancel` uncancelled and get up to `shutdown_timeout` to finish on
//! their own, with progress logged every `shutdown_progress_interval`. Only
//! once that timeout elapses is the worker's own cancellation token
//! (structural parent of every task's `local_cancel`) fired, and — if
//! `nack_on_forced_shutdown` — every delivery still outstanding at that
//! point is nacked directly so another worker can redeliver it.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use dashmap::DashMap;
use futures::StreamExt;
use tasker_shared::broker::{Broker, BrokerMessage, DeliveryTag};
use tasker_shared::error::TaskerError;
use tasker_stores::QueueMetrics;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::{AckDecision, Executor};

#[derive(Debug, Clone)]
pub struct WorkerLoopConfig {
    pub queues: Vec<String>,
    pub concurrency: usize,
    pub prefetch: usize,
    pub shutdown_timeout: StdDuration,
    pub shutdown_progress_interval: StdDuration,
    pub nack_on_forced_shutdown: bool,
}

impl Default for WorkerLoopConfig {
    fn default() -> Self {
        Self {
            queues: Vec::new(),
            concurrency: std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(4),
            prefetch: 16,
            shutdown_timeout: StdDuration::from_secs(30),
            shutdown_progress_interval: StdDuration::from_secs(5),
            nack_on_forced_shutdown: true,
        }
    }
}

pub struct WorkerLoop {
    broker: Arc<dyn Broker>,
    executor: Arc<Executor>,
    queue_metrics: Arc<QueueMetrics>,
    config: WorkerLoopConfig,
}

impl WorkerLoop {
    pub fn new(broker: Arc<dyn Broker>, executor: Arc<Executor>, queue_metrics: Arc<QueueMetrics>, config: WorkerLoopConfig) -> Self {
        Self {
            broker,
            executor,
            queue_metrics,
            config,
        }
    }

    /// Runs until `shutdown` is signalled, then drains in-flight work per
    /// the grace-period policy above. Returns once every task has either
    /// completed or been force-cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), TaskerError> {
        for queue in &self.config.queues {
            self.queue_metrics.register_consumer(queue);
        }
        let mut deliveries = self.broker.consume(&self.config.queues, self.config.prefetch).await?;
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let force_cancel = CancellationToken::new();
        let in_flight: Arc<DashMap<String, (DeliveryTag, String)>> = Arc::new(DashMap::new());
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("worker loop received shutdown signal, draining in-flight tasks");
                    break;
                }
                joined = tasks.join_next(), if !tasks.is_empty() => {
                    if let Some(Err(err)) = joined {
                        if !err.is_cancelled() {
                            warn!(?err, "execution task panicked");
                        }
                    }
                }
                delivery = deliveries.next() => {
                    match delivery {
                        Some(delivery) => self.spawn_execution(delivery, &permits, &force_cancel, &in_flight, &mut tasks),
                        None => {
                            info!("broker delivery stream ended, draining in-flight tasks");
                            break;
                        }
                    }
                }
            }
        }

        self.drain(tasks, force_cancel, in_flight).await;
        for queue in &self.config.queues {
            self.queue_metrics.unregister_consumer(queue);
        }
        Ok(())
    }

    fn spawn_execution(
        &self,
        delivery: BrokerMessage,
        permits: &Arc<Semaphore>,
        force_cancel: &CancellationToken,
        in_flight: &Arc<DashMap<String, (DeliveryTag, String)>>,
        tasks: &mut JoinSet<()>,
    ) {
        let executor = self.executor.clone();
        let broker = self.broker.clone();
        let permits = permits.clone();
        let local_cancel = force_cancel.child_token();
        let in_flight = in_flight.clone();
        let task_id = delivery.message.id.clone();
        in_flight.insert(task_id.clone(), (delivery.delivery_tag.clone(), delivery.queue.clone()));

        tasks.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let outcome = executor.execute(delivery.clone(), &local_cancel).await;
            in_flight.remove(&task_id);
            let ack_result = match outcome.ack {
                AckDecision::Ack => broker.ack(&delivery.delivery_tag).await,
                AckDecision::NackRequeue => broker.nack(&delivery.delivery_tag, true).await,
            };
            if let Err(err) = ack_result {
                warn!(task_id = %task_id, ?err, "failed to ack/nack delivery");
            }
        });
    }

    /// Waits up to `shutdown_timeout` for `tasks` to finish on their own,
    /// logging progress on `shutdown_progress_interval`. If they haven't
    /// finished by the deadline, fires `force_cancel` (cancelling every
    /// still-running task's `local_cancel`) and, if configured, nacks
    /// whatever deliveries remain outstanding so another worker can pick
    /// them up.
    async fn drain(&self, mut tasks: JoinSet<()>, force_cancel: CancellationToken, in_flight: Arc<DashMap<String, (DeliveryTag, String)>>) {
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            if tasks.is_empty() {
                info!("graceful shutdown complete, no tasks remaining");
                return;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let tick = remaining.min(self.config.shutdown_progress_interval);
            tokio::select! {
                joined = tasks.join_next() => {
                    if let Some(Err(err)) = joined {
                        if !err.is_cancelled() {
                            warn!(?err, "execution task panicked during shutdown drain");
                        }
                    }
                }
                _ = tokio::time::sleep(tick) => {
                    info!(remaining_tasks = tasks.len(), "waiting for in-flight tasks to finish before shutdown");
                }
            }
        }

        warn!(remaining_tasks = tasks.len(), "shutdown grace period elapsed, forcing cancellation");
        force_cancel.cancel();

        if self.config.nack_on_forced_shutdown {
            for entry in in_flight.iter() {
                let (delivery_tag, queue) = entry.value().clone();
                if let Err(err) = self.broker.nack(&delivery_tag, true).await {
                    warn!(task_id = %entry.key(), %queue, ?err, "failed to nack outstanding delivery on forced shutdown");
                }
            }
        }

        tasks.shutdown().await;
    }
}
