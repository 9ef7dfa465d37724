//! Error types for the replica module.

use thiserror::Error;

use deltasync_core::{MutationId, PatchConflict};

/// An optimistic effect could not be applied to a state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EffectError {
    /// The effect's patch did not fit the state.
    #[error("effect conflict: {0}")]
    Conflict(#[from] PatchConflict),

    /// The mutation input has the wrong shape for this effect.
    #[error("invalid effect input: {0}")]
    InvalidInput(String),
}

/// Errors that can occur during replica operations.
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// A confirmed patch did not apply; the replica is unchanged.
    #[error("patch conflict: {0}")]
    Patch(#[from] PatchConflict),

    /// Merging a confirmed mutation ran its effect, and the effect failed.
    #[error("effect failed for mutation {id}: {source}")]
    Effect {
        id: MutationId,
        #[source]
        source: EffectError,
    },

    /// A confirmed patch carried a version at or below the current one.
    #[error("stale version: current={current}, got={got}")]
    StaleVersion { current: u64, got: u64 },

    /// A confirmed patch arrived before the first snapshot.
    #[error("replica has no snapshot yet")]
    NotInitialized,

    /// A mutation with this ID is already layered on the replica.
    #[error("mutation {0} is already pending")]
    DuplicateMutation(MutationId),
}

/// Result type for replica operations.
pub type Result<T> = std::result::Result<T, ReplicaError>;
