//! Error types for Deltasync Core.

use thiserror::Error;

/// A precondition that failed while applying one operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictKind {
    #[error("path not found: {path}")]
    NotFound { path: String },

    #[error("test failed at {path}")]
    TestFailed { path: String },

    #[error("invalid array index {token:?} at {path}")]
    InvalidIndex { path: String, token: String },

    #[error("cannot address a child of a scalar at {path}")]
    NotAContainer { path: String },

    #[error("cannot move {from} into its own descendant {path}")]
    MoveIntoDescendant { from: String, path: String },

    #[error("cannot remove the document root")]
    RemoveRoot,
}

/// A patch batch was rejected because one of its operations failed.
///
/// Carries the index of the failing operation. No operation of the batch
/// has been applied when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("patch conflict at operation {index} ({op}): {kind}")]
pub struct PatchConflict {
    /// Position of the failing operation in the batch.
    pub index: usize,
    /// Name of the failing operation (`add`, `remove`, ...).
    pub op: &'static str,
    /// What went wrong.
    pub kind: ConflictKind,
}

/// A JSON pointer string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid JSON pointer {pointer:?}: {reason}")]
pub struct PointerError {
    pub pointer: String,
    pub reason: &'static str,
}

/// Errors from the wire codecs.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cbor encoding error: {0}")]
    CborEncode(String),

    #[error("cbor decoding error: {0}")]
    CborDecode(String),
}
