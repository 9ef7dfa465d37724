//! RFC 6902 patch operations.
//!
//! The serde representation is the RFC wire format:
//! `{"op": "add", "path": "/a", "value": 1}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::Path;

/// An ordered batch of operations, applied all-or-nothing.
pub type Patch = Vec<Operation>;

/// A single patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    /// Insert into an array or set an object member.
    Add { path: Path, value: Value },
    /// Remove an existing location.
    Remove { path: Path },
    /// Replace an existing location.
    Replace { path: Path, value: Value },
    /// Remove `from` and add its value at `path`.
    Move { from: Path, path: Path },
    /// Add a deep copy of `from` at `path`.
    Copy { from: Path, path: Path },
    /// Assert that `path` is structurally equal to `value`.
    Test { path: Path, value: Value },
}

impl Operation {
    pub fn add(path: Path, value: Value) -> Self {
        Operation::Add { path, value }
    }

    pub fn remove(path: Path) -> Self {
        Operation::Remove { path }
    }

    pub fn replace(path: Path, value: Value) -> Self {
        Operation::Replace { path, value }
    }

    pub fn move_to(from: Path, path: Path) -> Self {
        Operation::Move { from, path }
    }

    pub fn copy_to(from: Path, path: Path) -> Self {
        Operation::Copy { from, path }
    }

    pub fn test(path: Path, value: Value) -> Self {
        Operation::Test { path, value }
    }

    /// The operation name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Add { .. } => "add",
            Operation::Remove { .. } => "remove",
            Operation::Replace { .. } => "replace",
            Operation::Move { .. } => "move",
            Operation::Copy { .. } => "copy",
            Operation::Test { .. } => "test",
        }
    }

    /// The target path.
    pub fn path(&self) -> &Path {
        match self {
            Operation::Add { path, .. }
            | Operation::Remove { path }
            | Operation::Replace { path, .. }
            | Operation::Move { path, .. }
            | Operation::Copy { path, .. }
            | Operation::Test { path, .. } => path,
        }
    }

    /// The source path for `move` and `copy`.
    pub fn from(&self) -> Option<&Path> {
        match self {
            Operation::Move { from, .. } | Operation::Copy { from, .. } => Some(from),
            _ => None,
        }
    }
}
