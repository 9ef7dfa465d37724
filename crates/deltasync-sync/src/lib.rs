//! # Deltasync Sync
//!
//! Delta subscription protocol and request plumbing.
//!
//! ## Overview
//!
//! A subscription keeps a [`ReplicaHandle`](deltasync_replica::ReplicaHandle)
//! current from a server push stream of sequenced RFC 6902 patches:
//!
//! - **In order**: a frame applies only if its sequence is exactly one past
//!   the last one seen
//! - **Duplicates**: frames at or below the last sequence are dropped
//! - **Gaps**: a frame that skips ahead forces a resync from a full snapshot
//! - **Bounded retries**: snapshot failures back off exponentially and close
//!   the subscription once the attempt budget is spent
//!
//! Queries and mutations go through the [`RequestBatcher`], which coalesces
//! calls made in the same tick into one round trip.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deltasync_core::ResourceKey;
//! use deltasync_replica::{DocumentReplica, ReplicaHandle};
//! use deltasync_sync::{MemoryServer, RetryPolicy, SubscriptionHandle};
//! use serde_json::json;
//!
//! async fn example() {
//!     let server = MemoryServer::new();
//!     server.insert_document("todos", 1, json!([]));
//!
//!     let replica = ReplicaHandle::new(DocumentReplica::new(ResourceKey::from("todos")));
//!     let sub = SubscriptionHandle::spawn(
//!         Arc::new(server.connect()),
//!         replica,
//!         RetryPolicy::default(),
//!     );
//!     sub.wait_live().await.unwrap();
//!     println!("{}", sub.replica().snapshot());
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Client                               Server
//!   |-------- open_push(resource) ------>|
//!   |-------- snapshot(resource) ------->|
//!   |<------- {version, state} ----------|
//!   |<------- {sequence, patch} ---------|   sequence = version + 1
//!   |<------- {sequence, patch} ---------|
//!   |         ... gap detected ...       |
//!   |-------- snapshot(resource) ------->|
//!   |<------- {version, state} ----------|
//! ```

pub mod backoff;
pub mod batcher;
pub mod error;
pub mod machine;
pub mod messages;
pub mod subscription;
pub mod transport;

pub use backoff::RetryPolicy;
pub use batcher::{BatchConfig, RequestBatcher};
pub use error::{CallError, Result, SyncError};
pub use machine::{Action, Event, SubscriptionMachine, SubscriptionState, SubscriptionStatus};
pub use messages::{
    limits, BatchRequest, BatchResponse, ItemError, ItemOutcome, PushFrame, Snapshot,
    SNAPSHOT_ENDPOINT,
};
pub use subscription::SubscriptionHandle;
pub use transport::{
    memory::{MemoryServer, MemoryTransport, PATCH_ENDPOINT},
    Transport,
};
