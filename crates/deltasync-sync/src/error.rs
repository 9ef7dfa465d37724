//! Error types for the sync module.

use thiserror::Error;

use deltasync_core::PatchConflict;

/// Failure of one remote call.
///
/// Cloneable so a single transport failure can be delivered to every waiter
/// of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The transport could not complete the round trip.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered this call with an error.
    #[error("rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The batch response had no entry for this call.
    #[error("no response for call")]
    MissingResponse,

    /// The response could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The caller stopped waiting or the batcher was dropped.
    #[error("call cancelled")]
    Cancelled,
}

impl CallError {
    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Transport(_))
    }
}

/// Errors that can occur while keeping a subscription current.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// A pushed frame skipped ahead of the next expected sequence.
    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    /// A pushed patch did not apply to the confirmed state.
    #[error("patch conflict: {0}")]
    PatchConflict(#[from] PatchConflict),

    /// The push stream closed while still subscribed.
    #[error("push stream ended")]
    StreamEnded,

    /// A remote call failed.
    #[error(transparent)]
    Call(#[from] CallError),

    /// Every snapshot attempt failed; the subscription is closed.
    #[error("resync gave up after {attempts} attempts: {last}")]
    ResyncExhausted { attempts: u32, last: CallError },

    /// A frame or response violated the wire format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The subscription is closed.
    #[error("subscription closed")]
    Closed,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
