//! # Deltasync
//!
//! The unified API for Deltasync - live documents kept current by small
//! patches, with optimistic local mutations layered on top.
//!
//! ## Overview
//!
//! A [`Client`] wraps one [`Transport`] and provides:
//!
//! - **Subscriptions**: a local replica of a server-owned document, fed by a
//!   sequenced push stream of RFC 6902 patches, resynced from a snapshot on
//!   any gap
//! - **Mutations**: local effects applied immediately and reconciled or
//!   rolled back once the server answers
//! - **Queries**: plain calls, coalesced with every other call made in the
//!   same tick into one round trip
//!
//! ## Key Concepts
//!
//! - **Confirmed state**: the last state the server vouched for.
//! - **Visible state**: confirmed state with every pending effect folded on
//!   top, in submission order.
//! - **Resync**: dropping the patch stream position and loading a snapshot.
//!   Pending effects survive it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deltasync::{Client, ClientConfig, Mutation};
//! use deltasync::core::Path;
//! use deltasync::replica::AppendEffect;
//! use deltasync::sync::MemoryServer;
//! use serde_json::json;
//!
//! async fn example() {
//!     let server = MemoryServer::new();
//!     server.insert_document("todos", 1, json!([]));
//!     server.route("addTodo", |_| Ok(json!(true)));
//!
//!     let client = Client::new(Arc::new(server.connect()), ClientConfig::default());
//!
//!     // Subscribe and wait for the first snapshot
//!     let todos = client.subscribe("todos");
//!     todos.wait_live().await.unwrap();
//!
//!     // The new item is visible before the server answers
//!     let add = Mutation::new("todos", Arc::new(AppendEffect::new(Path::root())), json!("milk"));
//!     let handle = client.mutate("addTodo", json!({"title": "milk"}), add).unwrap();
//!     assert_eq!(*todos.snapshot(), json!(["milk"]));
//!
//!     handle.result().await.unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `deltasync::core` - Paths, patch operations, apply and diff
//! - `deltasync::replica` - Document replicas and effects
//! - `deltasync::sync` - Subscription protocol, transport and batching

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;

// Re-export component crates
pub use deltasync_core as core;
pub use deltasync_replica as replica;
pub use deltasync_sync as sync;

// Re-export main types for convenience
pub use client::{Client, Subscription};
pub use config::ClientConfig;
pub use coordinator::{Mutation, MutationCoordinator, MutationHandle, Reconcile};
pub use error::{ClientError, Result};

// Re-export commonly used component types
pub use deltasync_core::{MutationId, Operation, Path, ResourceKey};
pub use deltasync_replica::Effect;
pub use deltasync_sync::{BatchConfig, RetryPolicy, SubscriptionStatus, Transport};
