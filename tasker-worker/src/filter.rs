//! # Filter Pipeline (C14)
//!
//! Ordered around-invoke hooks. Each filter's `on_executing` runs before
//! dispatch and may short-circuit the whole pipeline by setting
//! `skip_execution`; every filter whose `on_executing` ran then gets its
//! `on_executed` called in reverse order, exactly once, regardless of
//! how the execution ended (release semantics such as partition-lock
//! release depend on this).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use tasker_shared::error::TaskerError;
use tasker_shared::wire::{TaskMessage, TaskResult};

/// Per-invocation state threaded through every filter. `properties` is a
/// scratch map filters use to pass state to themselves at `on_executed`
/// time (e.g. "did I acquire the lock").
#[derive(Debug, Clone)]
pub struct FilterContext {
    pub task_id: String,
    pub task_name: String,
    pub task_type: &'static str,
    pub message: TaskMessage,
    pub properties: HashMap<String, String>,
    pub skip_execution: bool,
    pub requeue_message: bool,
    pub requeue_delay: Option<ChronoDuration>,
}

impl FilterContext {
    pub fn new(message: TaskMessage, task_type: &'static str) -> Self {
        Self {
            task_id: message.id.clone(),
            task_name: message.task.clone(),
            task_type,
            message,
            properties: HashMap::new(),
            skip_execution: false,
            requeue_message: false,
            requeue_delay: None,
        }
    }

    /// Filters call this rather than setting the fields directly so intent
    /// reads clearly at call sites.
    pub fn skip_and_requeue(&mut self, delay: Option<ChronoDuration>) {
        self.skip_execution = true;
        self.requeue_message = true;
        self.requeue_delay = delay;
    }
}

#[async_trait]
pub trait Filter: Send + Sync + std::fmt::Debug {
    async fn on_executing(&self, ctx: &mut FilterContext) -> Result<(), TaskerError>;

    async fn on_executed(&self, ctx: &mut FilterContext, outcome: &TaskResult);
}

/// Runs filters in registration order for `on_executing`, then — only over
/// the prefix that actually ran — in reverse order for `on_executed`.
#[derive(Debug, Default)]
pub struct FilterPipeline {
    filters: Vec<Arc<dyn Filter>>,
}

/// Outcome of running the `on_executing` half of the pipeline.
pub enum ExecutingOutcome {
    /// Every filter ran and none asked to skip; dispatch proceeds.
    Proceed,
    /// A filter set `skip_execution`; dispatch is short-circuited.
    Skip,
}

impl FilterPipeline {
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// Runs `on_executing` over every filter in order, stopping at the first
    /// one that sets `skip_execution`. Returns how many filters ran, so the
    /// caller can run `on_executed` over exactly that prefix.
    pub async fn run_executing(&self, ctx: &mut FilterContext) -> Result<(usize, ExecutingOutcome), TaskerError> {
        for (ran, filter) in self.filters.iter().enumerate() {
            filter.on_executing(ctx).await?;
            if ctx.skip_execution {
                return Ok((ran + 1, ExecutingOutcome::Skip));
            }
        }
        Ok((self.filters.len(), ExecutingOutcome::Proceed))
    }

    /// Runs `on_executed` over the first `ran` filters, in reverse order.
    pub async fn run_executed(&self, ran: usize, ctx: &mut FilterContext, outcome: &TaskResult) {
        for filter in self.filters[..ran].iter().rev() {
            filter.on_executed(ctx, outcome).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tasker_shared::wire::TaskState;

    #[derive(Debug)]
    struct RecordingFilter {
        name: &'static str,
        skip: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Filter for RecordingFilter {
        async fn on_executing(&self, ctx: &mut FilterContext) -> Result<(), TaskerError> {
            self.log.lock().unwrap().push(format!("{}:executing", self.name));
            if self.skip {
                ctx.skip_and_requeue(None);
            }
            Ok(())
        }

        async fn on_executed(&self, _ctx: &mut FilterContext, _outcome: &TaskResult) {
            self.log.lock().unwrap().push(format!("{}:executed", self.name));
        }
    }

    fn message() -> TaskMessage {
        TaskMessage::new("t1", "demo.task", "queue_a")
    }

    #[tokio::test]
    async fn all_filters_run_in_order_then_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = FilterPipeline::new(vec![
            Arc::new(RecordingFilter { name: "a", skip: false, log: log.clone() }),
            Arc::new(RecordingFilter { name: "b", skip: false, log: log.clone() }),
        ]);
        let mut ctx = FilterContext::new(message(), "demo");
        let (ran, outcome) = pipeline.run_executing(&mut ctx).await.unwrap();
        assert!(matches!(outcome, ExecutingOutcome::Proceed));

        let result = TaskResult::new("t1", TaskState::Success);
        pipeline.run_executed(ran, &mut ctx, &result).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:executing", "b:executing", "b:executed", "a:executed"]
        );
    }

    #[tokio::test]
    async fn a_skipping_filter_short_circuits_and_only_ran_filters_are_released() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = FilterPipeline::new(vec![
            Arc::new(RecordingFilter { name: "a", skip: false, log: log.clone() }),
            Arc::new(RecordingFilter { name: "b", skip: true, log: log.clone() }),
            Arc::new(RecordingFilter { name: "c", skip: false, log: log.clone() }),
        ]);
        let mut ctx = FilterContext::new(message(), "demo");
        let (ran, outcome) = pipeline.run_executing(&mut ctx).await.unwrap();
        assert!(matches!(outcome, ExecutingOutcome::Skip));
        assert_eq!(ran, 2);
        assert!(ctx.requeue_message);

        let result = TaskResult::new("t1", TaskState::Retry);
        pipeline.run_executed(ran, &mut ctx, &result).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:executing", "b:executing", "b:executed", "a:executed"]
        );
    }

    #[tokio::test]
    async fn on_executing_error_propagates_without_running_on_executed() {
        #[derive(Debug)]
        struct FailingFilter;

        #[async_trait]
        impl Filter for FailingFilter {
            async fn on_executing(&self, _ctx: &mut FilterContext) -> Result<(), TaskerError> {
                Err(TaskerError::configuration("boom"))
            }

            async fn on_executed(&self, _ctx: &mut FilterContext, _outcome: &TaskResult) {
                panic!("should not run");
            }
        }

        let pipeline = FilterPipeline::new(vec![Arc::new(FailingFilter)]);
        let mut ctx = FilterContext::new(message(), "demo");
        let result = pipeline.run_executing(&mut ctx).await;
        assert!(result.is_err());
    }
}
