//! # Task Registry (C2)
//!
//! Maps a registered task name to a handler descriptor. Handlers are stored
//! as erased closures (spec §9 "Polymorphic task handlers"): the registry
//! keeps `fn(args_bytes, ctx) -> Result<bytes, TaskError>` alongside the
//! declared type identities so callers can still introspect the registered
//! shape without the registry itself being generic over every task type.

use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::TaskerError;

/// Opaque execution context passed to a handler at dispatch time.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub task_id: String,
    pub task_name: String,
    pub retries: u32,
}

/// Result type returned by an erased handler invocation.
pub type HandlerResult = Result<Vec<u8>, TaskError>;
type BoxedFuture<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

/// Error raised by a task body itself, distinguished from infrastructure
/// errors so the executor (C15) can classify it per spec §4.15/§7.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("retry requested after {0:?}")]
    RetryRequested(std::time::Duration),
    #[error("time limit exceeded")]
    TimeLimitExceeded,
    #[error("task rejected: {0}")]
    Rejected(String),
    #[error("task failed: {0}")]
    Failed(String),
}

/// An erased task handler: takes argument bytes and a context, returns
/// result bytes or a classified [`TaskError`].
pub trait TaskHandler: Send + Sync {
    fn invoke<'a>(&'a self, args: &'a [u8], ctx: &'a TaskContext) -> BoxedFuture<'a>;
}

impl<F> TaskHandler for F
where
    F: for<'a> Fn(&'a [u8], &'a TaskContext) -> BoxedFuture<'a> + Send + Sync,
{
    fn invoke<'a>(&'a self, args: &'a [u8], ctx: &'a TaskContext) -> BoxedFuture<'a> {
        (self)(args, ctx)
    }
}

/// Per-task attributes consulted by the executor (rate limiting,
/// partitioning, idempotency).
#[derive(Debug, Clone, Default)]
pub struct TaskAttributes {
    pub rate_limit_key: Option<String>,
    pub partition_key_template: Option<String>,
    pub idempotent: bool,
}

/// A registered task's descriptor: handler plus declared type identities
/// and operational attributes.
#[derive(Clone)]
pub struct TaskDescriptor {
    pub name: String,
    pub input_type: &'static str,
    pub output_type: &'static str,
    pub attributes: TaskAttributes,
    handler: Arc<dyn TaskHandler>,
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("input_type", &self.input_type)
            .field("output_type", &self.output_type)
            .field("attributes", &self.attributes)
            .finish()
    }
}

impl TaskDescriptor {
    pub async fn invoke(&self, args: &[u8], ctx: &TaskContext) -> HandlerResult {
        self.handler.invoke(args, ctx).await
    }
}

/// Maps task-name → descriptor. Duplicate registration overwrites
/// last-writer-wins, with no error (spec §4.1).
#[derive(Debug, Default)]
pub struct TaskRegistry {
    descriptors: DashMap<String, TaskDescriptor>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`. Overwrites any prior registration
    /// for the same name.
    pub fn register(
        &self,
        name: impl Into<String>,
        input_type: &'static str,
        output_type: &'static str,
        attributes: TaskAttributes,
        handler: Arc<dyn TaskHandler>,
    ) {
        let name = name.into();
        self.descriptors.insert(
            name.clone(),
            TaskDescriptor {
                name,
                input_type,
                output_type,
                attributes,
                handler,
            },
        );
    }

    /// Look up a descriptor. Missing lookup is a first-class error
    /// surfaced as `UnknownTask` at the call site that needs it (the
    /// registry itself just returns `None`; see [`Self::get_or_unknown`]
    /// for the error-producing variant used by the executor).
    pub fn get(&self, name: &str) -> Option<TaskDescriptor> {
        self.descriptors.get(name).map(|entry| entry.value().clone())
    }

    pub fn get_or_unknown(&self, name: &str) -> Result<TaskDescriptor, TaskerError> {
        self.get(name).ok_or_else(|| TaskerError::unknown_task(name))
    }

    pub fn all(&self) -> Vec<TaskDescriptor> {
        self.descriptors.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_handler() -> Arc<dyn TaskHandler> {
        Arc::new(|args: &[u8], _ctx: &TaskContext| -> BoxedFuture<'_> {
            let out = args.to_vec();
            Box::pin(async move { Ok(out) })
        })
    }

    #[tokio::test]
    async fn register_and_invoke() {
        let registry = TaskRegistry::new();
        registry.register(
            "math.double",
            "DoubleInput",
            "DoubleOutput",
            TaskAttributes::default(),
            echo_handler(),
        );

        let descriptor = registry.get_or_unknown("math.double").unwrap();
        let ctx = TaskContext {
            task_id: "t1".to_string(),
            task_name: "math.double".to_string(),
            retries: 0,
        };
        let out = descriptor.invoke(b"hello", &ctx).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn missing_lookup_is_unknown_task() {
        let registry = TaskRegistry::new();
        let err = registry.get_or_unknown("nope").unwrap_err();
        assert!(matches!(err, TaskerError::UnknownTask(_)));
    }

    #[test]
    fn duplicate_registration_overwrites() {
        let registry = TaskRegistry::new();
        registry.register("t", "A", "B", TaskAttributes::default(), echo_handler());
        registry.register(
            "t",
            "C",
            "D",
            TaskAttributes {
                idempotent: true,
                ..Default::default()
            },
            echo_handler(),
        );
        assert_eq!(registry.len(), 1);
        let descriptor = registry.get("t").unwrap();
        assert_eq!(descriptor.input_type, "C");
        assert!(descriptor.attributes.idempotent);
    }
}
