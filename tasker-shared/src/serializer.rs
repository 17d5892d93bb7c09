//! # Serializer (C1)
//!
//! Converts between wire bytes and the workspace's core types. Registered
//! core types (`TaskMessage`, `TaskResult`, exception info, saga/step,
//! outbox/inbox, dead-letter, signal envelopes) go through `serde_json`
//! directly, which is the JSON schema the wire format commits to (spec §6);
//! unregistered/opaque payloads fall back to the same encoder operating on
//! `serde_json::Value`, which already gives camelCase keys and
//! null-omission for anything deriving the workspace's standard attributes.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::TaskerError;

/// Content-type tag carried alongside opaque argument/result bytes.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Stateless JSON codec for the core wire types.
#[derive(Debug, Clone, Copy, Default)]
pub struct Serializer;

impl Serializer {
    pub fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, TaskerError> {
        serde_json::to_vec(value).map_err(|e| TaskerError::serialization_failed(e.to_string()))
    }

    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, TaskerError> {
        serde_json::from_slice(bytes).map_err(|e| TaskerError::deserialization_failed(e.to_string()))
    }
}
