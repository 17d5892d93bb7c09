//! # Signal Bus (C12)
//!
//! Typed lifecycle events delivered to registered handlers. `publish`
//! enqueues onto an internal channel standing in for a persisted signal
//! queue; [`SignalBusRunner::run`] drains it in batches with bounded
//! parallelism and invokes every handler registered for that signal's kind.
//! A handler that errors is logged and does not affect its siblings or the
//! task outcome that produced the signal.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use futures::StreamExt;
use tasker_shared::error::TaskerError;
use tasker_shared::wire::TaskMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone)]
pub enum Signal {
    BeforeTaskPublish { task: TaskMessage },
    AfterTaskPublish { task_id: String },
    TaskPreRun { task_id: String, task_name: String },
    TaskPostRun { task_id: String, task_name: String },
    TaskSuccess { task_id: String },
    TaskFailure { task_id: String, error: String },
    TaskRetry { task_id: String, retry_after: ChronoDuration },
    TaskRevoked { task_id: String },
    TaskRejected { task_id: String, reason: String },
    ProgressUpdated { task_id: String, progress: f64 },
    SagaStepCompleted { saga_id: String, step_id: String },
    SagaCompensating { saga_id: String },
}

impl Signal {
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::BeforeTaskPublish { .. } => "before_task_publish",
            Signal::AfterTaskPublish { .. } => "after_task_publish",
            Signal::TaskPreRun { .. } => "task_pre_run",
            Signal::TaskPostRun { .. } => "task_post_run",
            Signal::TaskSuccess { .. } => "task_success",
            Signal::TaskFailure { .. } => "task_failure",
            Signal::TaskRetry { .. } => "task_retry",
            Signal::TaskRevoked { .. } => "task_revoked",
            Signal::TaskRejected { .. } => "task_rejected",
            Signal::ProgressUpdated { .. } => "progress_updated",
            Signal::SagaStepCompleted { .. } => "saga_step_completed",
            Signal::SagaCompensating { .. } => "saga_compensating",
        }
    }
}

#[async_trait]
pub trait SignalHandler: Send + Sync + std::fmt::Debug {
    async fn handle(&self, signal: &Signal) -> Result<(), TaskerError>;
}

#[derive(Debug, Default)]
struct Registry {
    handlers: DashMap<&'static str, Vec<Arc<dyn SignalHandler>>>,
}

/// Handle used by producers (the executor, the saga orchestrator, ...) to
/// register handlers and publish events.
#[derive(Debug, Clone)]
pub struct SignalBus {
    registry: Arc<Registry>,
    sender: mpsc::Sender<Signal>,
}

/// Owns the receiving half; spawn [`Self::run`] once per process.
#[derive(Debug)]
pub struct SignalBusRunner {
    registry: Arc<Registry>,
    receiver: mpsc::Receiver<Signal>,
    concurrency: usize,
}

impl SignalBus {
    pub fn new(capacity: usize, concurrency: usize) -> (Self, SignalBusRunner) {
        let registry = Arc::new(Registry::default());
        let (sender, receiver) = mpsc::channel(capacity);
        let bus = Self {
            registry: registry.clone(),
            sender,
        };
        let runner = SignalBusRunner {
            registry,
            receiver,
            concurrency: concurrency.max(1),
        };
        (bus, runner)
    }

    pub fn register(&self, kind: &'static str, handler: Arc<dyn SignalHandler>) {
        self.registry.handlers.entry(kind).or_insert_with(Vec::new).push(handler);
    }

    /// Enqueues a signal. On backpressure (channel full) this waits, mirroring
    /// a caller that would otherwise block on a persistence write.
    pub async fn publish(&self, signal: Signal) -> Result<(), TaskerError> {
        self.sender
            .send(signal)
            .await
            .map_err(|_| TaskerError::configuration("signal bus runner has shut down"))
    }
}

impl SignalBusRunner {
    /// Drains signals until `cancel` fires or every [`SignalBus`] handle is
    /// dropped. Each batch is dispatched with at most `concurrency` handler
    /// invocations in flight at once.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let mut batch = Vec::new();
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.receiver.recv() => {
                    match received {
                        Some(signal) => batch.push(signal),
                        None => break,
                    }
                }
            }
            while let Ok(signal) = self.receiver.try_recv() {
                batch.push(signal);
            }

            let registry = &self.registry;
            let concurrency = self.concurrency;
            futures::stream::iter(batch)
                .for_each_concurrent(concurrency, |signal| async move {
                    dispatch(registry, &signal).await;
                })
                .await;
        }
    }
}

async fn dispatch(registry: &Registry, signal: &Signal) {
    let Some(handlers) = registry.handlers.get(signal.kind()) else {
        return;
    };
    for handler in handlers.iter() {
        if let Err(err) = handler.handle(signal).await {
            warn!(kind = signal.kind(), ?err, "signal handler failed, isolated from siblings and task outcome");
        }
    }
}
