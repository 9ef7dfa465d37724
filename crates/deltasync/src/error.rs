//! Error types for the client.

use deltasync_core::{CodecError, ResourceKey};
use deltasync_replica::ReplicaError;
use deltasync_sync::{CallError, SyncError};
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A query or mutation call failed.
    #[error("call failed: {0}")]
    Call(#[from] CallError),

    /// The subscription could not be kept current.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Merging a mutation result into the replica failed.
    #[error("replica error: {0}")]
    Replica(#[from] ReplicaError),

    /// A mutation response could not be decoded for its reconcile mode.
    #[error("invalid mutation response: {0}")]
    InvalidResponse(#[from] CodecError),

    /// No live subscription for the mutation's target.
    #[error("resource not subscribed: {0}")]
    UnknownResource(ResourceKey),

    /// The mutation was cancelled before its result arrived.
    #[error("mutation cancelled")]
    Cancelled,
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
