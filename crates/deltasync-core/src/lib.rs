//! # Deltasync Core
//!
//! Pure primitives for Deltasync: document paths, RFC 6902 patches, and codecs.
//!
//! This crate contains no I/O, no scheduling, no networking. It is pure
//! computation over JSON document trees.
//!
//! ## Key Types
//!
//! - [`Path`] - A parsed RFC 6901 pointer (sequence of reference tokens)
//! - [`Operation`] - One RFC 6902 patch operation
//! - [`PatchConflict`] - A failed precondition; the whole batch is rejected
//! - [`ResourceKey`] - Stable identity of a subscribed resource
//! - [`MutationId`] - Identifier of an optimistic mutation
//!
//! ## Applying Patches
//!
//! [`apply`] is copy-on-write and all-or-nothing: the input tree is never
//! touched, and either every operation succeeds or the caller gets the
//! conflict and keeps its old tree.
//!
//! ```rust
//! use deltasync_core::{apply, Operation, Path};
//! use serde_json::json;
//!
//! let doc = json!({"items": ["a"]});
//! let ops = vec![Operation::add(Path::parse("/items/-").unwrap(), json!("b"))];
//! let next = apply(&doc, &ops).unwrap();
//! assert_eq!(next, json!({"items": ["a", "b"]}));
//! assert_eq!(doc, json!({"items": ["a"]}));
//! ```

pub mod apply;
pub mod codec;
pub mod diff;
pub mod error;
pub mod patch;
pub mod path;
pub mod types;

pub use apply::{apply, apply_in_place, json_equal};
pub use codec::{from_cbor, from_json, to_cbor, to_json};
pub use diff::diff;
pub use error::{CodecError, ConflictKind, PatchConflict, PointerError};
pub use patch::{Operation, Patch};
pub use path::Path;
pub use types::{MutationId, ResourceKey};
