//! # Message Router
//!
//! Queue-name routing abstraction. Separates the namespace → queue-name
//! convention from the broker transport, following the same split the
//! teacher's messaging layer uses: a `MessageRouter` trait plus a
//! `DefaultMessageRouter` that builds names from a prefix and a handful of
//! fixed orchestration queue names.

use crate::error::TaskerError;

fn validate_queue_name(name: &str) -> Result<(), TaskerError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(TaskerError::InvalidQueueName(name.to_string()))
    }
}

/// Namespace-based queue routing. Implementations may use any naming
/// convention; the executor and dispatcher only ever go through this trait.
pub trait MessageRouter: Send + Sync + std::fmt::Debug {
    /// The queue a task of the given name/namespace is delivered on.
    /// Default pattern: `worker_{namespace}_queue`.
    fn task_queue(&self, namespace: &str) -> Result<String, TaskerError>;

    /// Queue the delayed dispatcher drains into once a message is due.
    fn delayed_ready_queue(&self) -> String;

    /// Queue carrying dead-letter-bound control messages (not the DLQ store
    /// itself — that's `tasker-stores::DeadLetterStore`).
    fn dead_letter_queue(&self) -> String;

    fn extract_namespace(&self, queue_name: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct DefaultMessageRouter {
    worker_queue_prefix: String,
    delayed_ready_queue: String,
    dead_letter_queue: String,
}

impl DefaultMessageRouter {
    pub fn new(
        worker_queue_prefix: impl Into<String>,
        delayed_ready_queue: impl Into<String>,
        dead_letter_queue: impl Into<String>,
    ) -> Self {
        Self {
            worker_queue_prefix: worker_queue_prefix.into(),
            delayed_ready_queue: delayed_ready_queue.into(),
            dead_letter_queue: dead_letter_queue.into(),
        }
    }
}

impl Default for DefaultMessageRouter {
    fn default() -> Self {
        Self {
            worker_queue_prefix: "worker".to_string(),
            delayed_ready_queue: "delayed_ready".to_string(),
            dead_letter_queue: "dead_letter".to_string(),
        }
    }
}

impl MessageRouter for DefaultMessageRouter {
    fn task_queue(&self, namespace: &str) -> Result<String, TaskerError> {
        let name = format!("{}_{}_queue", self.worker_queue_prefix, namespace);
        validate_queue_name(&name)?;
        Ok(name)
    }

    fn delayed_ready_queue(&self) -> String {
        self.delayed_ready_queue.clone()
    }

    fn dead_letter_queue(&self) -> String {
        self.dead_letter_queue.clone()
    }

    fn extract_namespace(&self, queue_name: &str) -> Option<String> {
        queue_name
            .strip_prefix(&format!("{}_", self.worker_queue_prefix))
            .and_then(|s| s.strip_suffix("_queue"))
            .map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_router_builds_task_queue() {
        let router = DefaultMessageRouter::default();
        assert_eq!(router.task_queue("payments").unwrap(), "worker_payments_queue");
    }

    #[test]
    fn default_router_rejects_invalid_namespace() {
        let router = DefaultMessageRouter::default();
        assert!(router.task_queue("bad-namespace").is_err());
        assert!(router.task_queue("bad;DROP TABLE").is_err());
    }

    #[test]
    fn extract_namespace_round_trips() {
        let router = DefaultMessageRouter::default();
        let queue = router.task_queue("payments").unwrap();
        assert_eq!(router.extract_namespace(&queue), Some("payments".to_string()));
        assert_eq!(router.extract_namespace("unrelated_queue"), None);
    }
}
