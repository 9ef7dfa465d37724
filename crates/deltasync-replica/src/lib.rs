//! # Deltasync Replica
//!
//! The client-held copy of one server-owned document.
//!
//! ## Overview
//!
//! A [`DocumentReplica`] keeps two trees:
//!
//! - **confirmed**: the document as patched purely by server-confirmed operations
//! - **visible**: confirmed with every unresolved optimistic effect folded on
//!   top, in submission order
//!
//! The visible tree is never edited directly. Any change to the confirmed tree
//! or to the set of pending mutations rebuilds it from scratch, because a
//! later confirmation can change what an earlier pending effect should see.
//!
//! ## Key Types
//!
//! - [`DocumentReplica`] - Versioned replica with layered pending effects
//! - [`Effect`] - Pure `(state, input) -> state` transformation
//! - [`ReplicaHandle`] - Shared, lockable replica with change notification
//! - [`ReplicaRegistry`] - Reference-counted registry keyed by resource
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use deltasync_core::{MutationId, Path, ResourceKey};
//! use deltasync_replica::{AppendEffect, DocumentReplica, Outcome, PendingMutation};
//! use serde_json::json;
//!
//! let key = ResourceKey::from("todos");
//! let mut replica = DocumentReplica::with_snapshot(key.clone(), 1, json!([]));
//!
//! let id = MutationId::random();
//! let effect = Arc::new(AppendEffect::new(Path::root()));
//! replica
//!     .apply_pending_effect(PendingMutation::new(id, key, effect, json!("x"), 0))
//!     .unwrap();
//! assert_eq!(*replica.snapshot(), json!(["x"]));
//!
//! replica.resolve_pending(id, Outcome::RolledBack).unwrap();
//! assert_eq!(*replica.snapshot(), json!([]));
//! ```

pub mod effect;
pub mod error;
pub mod handle;
pub mod registry;
pub mod replica;

pub use effect::{AppendEffect, Effect, FnEffect, MergeEffect, PatchEffect, RemoveEffect, SetEffect};
pub use error::{EffectError, ReplicaError, Result};
pub use handle::ReplicaHandle;
pub use registry::{RegistryEntry, ReplicaLookup, ReplicaRegistry};
pub use replica::{
    Confirmation, DocumentReplica, MutationStatus, Outcome, PendingMutation, Resolution,
};
