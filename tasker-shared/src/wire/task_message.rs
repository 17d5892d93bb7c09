//! # TaskMessage — the wire record published by producers (spec §3, §6).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The message a producer publishes and a worker consumes.
///
/// Field naming matches the camelCase wire schema in spec §6 via `serde`
/// rename attributes; in-memory the struct uses idiomatic snake_case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    /// Canonical key. ULID/GUID string, unique.
    pub id: String,
    /// Registered task name (see [`crate::registry::TaskRegistry`]).
    pub task: String,
    /// Opaque argument bytes, paired with `content_type`.
    pub args: Vec<u8>,
    pub content_type: String,
    pub queue: String,
    pub priority: i32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Relative delay before delivery; reducible with `eta` (see [`Self::effective_eta`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown: Option<chrono::Duration>,
    /// Absolute delivery time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Instant the producer persisted the message.
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub store_result: bool,
    /// Server-written retry counter.
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Task-name chain pointer run on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Task-name chain pointer run on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_error: Option<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl TaskMessage {
    pub fn new(id: impl Into<String>, task: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            args: Vec::new(),
            content_type: "application/json".to_string(),
            queue: queue.into(),
            priority: 0,
            max_retries: default_max_retries(),
            countdown: None,
            eta: None,
            expires: None,
            headers: HashMap::new(),
            timestamp: Utc::now(),
            store_result: true,
            retries: 0,
            correlation_id: None,
            link: None,
            link_error: None,
        }
    }

    pub fn with_args(mut self, args: Vec<u8>, content_type: impl Into<String>) -> Self {
        self.args = args;
        self.content_type = content_type.into();
        self
    }

    /// `effective_eta = eta ?? now+countdown` (spec §3 invariant).
    pub fn effective_eta(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.eta.or_else(|| self.countdown.map(|delta| now + delta))
    }

    /// Whether `expires < now` at the moment of dequeue, per spec §3.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|e| e < now)
    }

    pub fn with_countdown(mut self, delta: ChronoDuration) -> Self {
        self.countdown = Some(delta);
        self
    }

    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }
}
