//! Wire message types.
//!
//! Everything here is plain serde data. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use deltasync_core::{MutationId, Operation};

use crate::error::CallError;

/// Endpoint used by the default snapshot fetch.
pub const SNAPSHOT_ENDPOINT: &str = "snapshot";

/// Message size limits.
pub mod limits {
    /// Max calls in one batch envelope.
    pub const MAX_BATCH_ITEMS: usize = 100;
    /// Max operations in one pushed patch.
    pub const MAX_PATCH_OPS: usize = 1000;
}

/// One sequenced change pushed for a subscribed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushFrame {
    pub sequence: u64,
    pub patch: Vec<Operation>,
    /// Set when the change was produced by a client mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_id: Option<MutationId>,
}

impl PushFrame {
    pub fn new(sequence: u64, patch: Vec<Operation>) -> Self {
        Self {
            sequence,
            patch,
            mutation_id: None,
        }
    }

    pub fn with_mutation(mut self, id: MutationId) -> Self {
        self.mutation_id = Some(id);
        self
    }

    /// Check if this frame respects size limits.
    pub fn validate_limits(&self) -> Result<(), &'static str> {
        if self.patch.len() > limits::MAX_PATCH_OPS {
            return Err("too many patch operations");
        }
        Ok(())
    }
}

/// A full document at a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub state: Value,
}

/// One call inside a batch envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub id: u64,
    pub endpoint: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_id: Option<MutationId>,
}

/// Error object carried by a failed batch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub code: String,
    pub message: String,
}

impl ItemError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<ItemError> for CallError {
    fn from(e: ItemError) -> Self {
        CallError::Rejected {
            code: e.code,
            message: e.message,
        }
    }
}

/// Result half of a batch item response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemOutcome {
    Result(Value),
    Error(ItemError),
}

/// One entry of a batch response: `{id, result}` or `{id, error}`.
///
/// `id` may be absent, in which case the entry is matched by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

impl BatchResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id: Some(id),
            outcome: ItemOutcome::Result(result),
        }
    }

    pub fn err(id: u64, error: ItemError) -> Self {
        Self {
            id: Some(id),
            outcome: ItemOutcome::Error(error),
        }
    }

    pub fn into_result(self) -> Result<Value, CallError> {
        match self.outcome {
            ItemOutcome::Result(value) => Ok(value),
            ItemOutcome::Error(e) => Err(e.into()),
        }
    }
}
