//! # Deltasync Testkit
//!
//! Testing utilities for Deltasync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: RFC 6902 cases with expected outputs, shared as plain JSON
//! - **Generators**: Proptest strategies for documents, patches and push histories
//! - **Fixtures**: An in-memory server with connected clients
//!
//! ## Golden Vectors
//!
//! ```rust
//! use deltasync_testkit::vectors::{all_vectors, vector_passes};
//!
//! for vector in all_vectors().unwrap() {
//!     println!("{}: {}", vector.name, vector_passes(&vector));
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use deltasync_core::{apply, diff};
//! use deltasync_testkit::generators::document;
//!
//! proptest! {
//!     #[test]
//!     fn diff_roundtrip(src in document(), dst in document()) {
//!         prop_assert_eq!(apply(&src, &diff(&src, &dst)).unwrap(), dst);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use deltasync_testkit::fixtures::SyncFixture;
//! use serde_json::json;
//!
//! async fn example() {
//!     let fixture = SyncFixture::new().with_document("todos", json!([]));
//!     let todos = fixture.subscribe_live("todos").await.unwrap();
//!     assert_eq!(*todos.snapshot(), json!([]));
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{init_tracing, multi_client_fixture, SyncFixture};
pub use generators::{document, patch, History, PatchCase};
pub use vectors::{all_vectors, run_vector, verify_all_vectors, GoldenVector, VectorOutcome};
