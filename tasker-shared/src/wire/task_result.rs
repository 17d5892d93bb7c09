//! # TaskResult — per-task terminal or intermediate record (spec §3, §6).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task lifecycle state. Terminal states are {Success, Failure, Revoked,
/// Rejected}; a terminal record is never overwritten by a non-terminal one
/// (spec §3 invariant, enforced by [`crate::registry`] consumers and the
/// result backend contract in `tasker-stores`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Received,
    Started,
    Progress,
    Success,
    Failure,
    Retry,
    Revoked,
    Rejected,
    Requeued,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Revoked | TaskState::Rejected
        )
    }
}

/// Nested exception/error info carried on failure outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExceptionInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_exception: Option<Box<ExceptionInfo>>,
}

impl ExceptionInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack_trace: None,
            inner_exception: None,
        }
    }
}

/// The result/status record for one task id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Rate-limit retries never exhaust `max_retries` (spec §4.5).
    #[serde(default)]
    pub do_not_increment_retries: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requeue_delay: Option<ChronoDuration>,
}

impl TaskResult {
    pub fn new(task_id: impl Into<String>, state: TaskState) -> Self {
        Self {
            task_id: task_id.into(),
            state,
            result: None,
            content_type: None,
            exception: None,
            completed_at: None,
            duration_ms: None,
            retries: 0,
            worker: None,
            metadata: HashMap::new(),
            expires_at: None,
            do_not_increment_retries: false,
            requeue_delay: None,
        }
    }

    pub fn success(task_id: impl Into<String>, result: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            result: Some(result),
            content_type: Some(content_type.into()),
            ..Self::new(task_id, TaskState::Success)
        }
    }

    pub fn failure(task_id: impl Into<String>, exception: ExceptionInfo) -> Self {
        Self {
            exception: Some(exception),
            ..Self::new(task_id, TaskState::Failure)
        }
    }

    pub fn retry(task_id: impl Into<String>, do_not_increment_retries: bool, requeue_delay: Option<ChronoDuration>) -> Self {
        Self {
            do_not_increment_retries,
            requeue_delay,
            ..Self::new(task_id, TaskState::Retry)
        }
    }

    /// `GetResult`/`GetState` callers must never see a terminal record
    /// replaced by a non-terminal one (spec §3, §8 invariant 1).
    pub fn may_overwrite(existing: Option<&TaskResult>, incoming: &TaskResult) -> bool {
        match existing {
            None => true,
            Some(existing) => !existing.state.is_terminal() || incoming.state.is_terminal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Success.is_terminal());
        assert!(TaskState::Failure.is_terminal());
        assert!(TaskState::Revoked.is_terminal());
        assert!(TaskState::Rejected.is_terminal());
        assert!(!TaskState::Retry.is_terminal());
        assert!(!TaskState::Started.is_terminal());
    }

    #[test]
    fn terminal_record_is_monotonic() {
        let terminal = TaskResult::new("t1", TaskState::Success);
        let non_terminal = TaskResult::new("t1", TaskState::Retry);
        assert!(!TaskResult::may_overwrite(Some(&terminal), &non_terminal));

        let other_terminal = TaskResult::new("t1", TaskState::Failure);
        assert!(TaskResult::may_overwrite(Some(&terminal), &other_terminal));

        assert!(TaskResult::may_overwrite(None, &non_terminal));
    }
}
