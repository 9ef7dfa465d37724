//! Transport abstraction.
//!
//! The transport moves request/response calls and push frames. Concrete
//! network transports (HTTP, sockets, IPC) live outside this crate.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use deltasync_core::ResourceKey;

use crate::error::CallError;
use crate::messages::{BatchRequest, BatchResponse, PushFrame, Snapshot, SNAPSHOT_ENDPOINT};

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, CallError>;

/// Transport trait for remote calls and push streams.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a single call.
    async fn request(&self, endpoint: &str, payload: Value) -> Result<Value>;

    /// Perform several calls in one round trip.
    ///
    /// Responses may come back in any order; each carries the request `id`
    /// when the server supports it.
    async fn request_batch(&self, items: Vec<BatchRequest>) -> Result<Vec<BatchResponse>>;

    /// Open the push stream for a resource.
    ///
    /// The stream ends when the receiver yields `None` and cannot be
    /// restarted; open a new one instead.
    async fn open_push(&self, resource: &ResourceKey) -> Result<mpsc::Receiver<PushFrame>>;

    /// Fetch the full document and its version.
    async fn fetch_snapshot(&self, resource: &ResourceKey) -> Result<Snapshot> {
        let value = self
            .request(SNAPSHOT_ENDPOINT, json!({ "resource": resource }))
            .await?;
        serde_json::from_value(value).map_err(|e| CallError::InvalidResponse(e.to_string()))
    }
}

/// An in-memory server and transport for tests.
///
/// The server owns versioned documents, routes calls to registered handlers,
/// and fans pushed frames out over channels.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    use deltasync_core::{apply, from_json, MutationId, Operation};
    use tracing::debug;

    use crate::messages::{ItemError, ItemOutcome};

    /// Built-in endpoint applying `{resource, patch}` to a document and
    /// broadcasting the change.
    pub const PATCH_ENDPOINT: &str = "patch";

    /// Frames buffered per subscriber before it is disconnected.
    const PUSH_BUFFER: usize = 256;

    /// Handler for a routed endpoint.
    pub type Handler = Arc<dyn Fn(&Value) -> std::result::Result<Value, ItemError> + Send + Sync>;

    struct Document {
        version: u64,
        state: Value,
        subscribers: Vec<mpsc::Sender<PushFrame>>,
    }

    #[derive(Default)]
    struct ServerState {
        documents: HashMap<ResourceKey, Document>,
        handlers: HashMap<String, Handler>,
        batches: Vec<Vec<String>>,
        snapshot_requests: usize,
        fail_requests: usize,
        fail_snapshots: usize,
        snapshot_delay: Option<Duration>,
        rotate_responses: bool,
    }

    /// Shared state for the in-memory server.
    #[derive(Default)]
    pub struct MemoryServer {
        state: Mutex<ServerState>,
    }

    impl MemoryServer {
        /// Create a new memory server.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport connected to this server.
        pub fn connect(self: &Arc<Self>) -> MemoryTransport {
            MemoryTransport {
                server: Arc::clone(self),
            }
        }

        /// Create or replace a document. Existing subscribers stay attached.
        pub fn insert_document(&self, key: impl Into<ResourceKey>, version: u64, state: Value) {
            let mut inner = self.lock();
            let doc = inner
                .documents
                .entry(key.into())
                .or_insert_with(|| Document {
                    version: 0,
                    state: Value::Null,
                    subscribers: Vec::new(),
                });
            doc.version = version;
            doc.state = state;
        }

        /// Current version and state of a document.
        pub fn document(&self, key: &ResourceKey) -> Option<(u64, Value)> {
            self.lock()
                .documents
                .get(key)
                .map(|doc| (doc.version, doc.state.clone()))
        }

        /// Register a handler for `endpoint`.
        pub fn route<F>(&self, endpoint: impl Into<String>, handler: F)
        where
            F: Fn(&Value) -> std::result::Result<Value, ItemError> + Send + Sync + 'static,
        {
            self.lock().handlers.insert(endpoint.into(), Arc::new(handler));
        }

        /// Apply `ops` to a document, bump its version and push the change.
        ///
        /// Returns the new version.
        pub fn publish(
            &self,
            key: &ResourceKey,
            ops: Vec<Operation>,
            mutation_id: Option<MutationId>,
        ) -> std::result::Result<u64, ItemError> {
            let mut inner = self.lock();
            let doc = inner
                .documents
                .get_mut(key)
                .ok_or_else(|| ItemError::new("not_found", format!("no document {key}")))?;
            doc.state = apply(&doc.state, &ops).map_err(|e| ItemError::new("conflict", e.to_string()))?;
            doc.version += 1;
            let frame = PushFrame {
                sequence: doc.version,
                patch: ops,
                mutation_id,
            };
            fan_out(doc, &frame);
            Ok(doc.version)
        }

        /// Push a raw frame without touching the document.
        pub fn push_frame(&self, key: &ResourceKey, frame: PushFrame) {
            if let Some(doc) = self.lock().documents.get_mut(key) {
                fan_out(doc, &frame);
            }
        }

        /// End every push stream open for `key`.
        pub fn close_streams(&self, key: &ResourceKey) {
            if let Some(doc) = self.lock().documents.get_mut(key) {
                doc.subscribers.clear();
            }
        }

        /// Number of open push streams for `key`.
        pub fn subscriber_count(&self, key: &ResourceKey) -> usize {
            self.lock().documents.get(key).map_or(0, |doc| {
                doc.subscribers.iter().filter(|s| !s.is_closed()).count()
            })
        }

        /// Fail the next `n` request and batch calls with a transport error.
        pub fn fail_next_requests(&self, n: usize) {
            self.lock().fail_requests = n;
        }

        /// Fail the next `n` snapshot fetches with a transport error.
        pub fn fail_next_snapshots(&self, n: usize) {
            self.lock().fail_snapshots = n;
        }

        /// Delay every snapshot response.
        pub fn set_snapshot_delay(&self, delay: Option<Duration>) {
            self.lock().snapshot_delay = delay;
        }

        /// Return batch responses rotated by one (`[A, B, C]` -> `[C, A, B]`).
        pub fn rotate_batch_responses(&self, on: bool) {
            self.lock().rotate_responses = on;
        }

        /// Endpoints of every batch received so far, in arrival order.
        pub fn batches(&self) -> Vec<Vec<String>> {
            self.lock().batches.clone()
        }

        /// Number of snapshot requests received so far.
        pub fn snapshot_requests(&self) -> usize {
            self.lock().snapshot_requests
        }

        fn take_failure(&self, snapshot: bool) -> Option<CallError> {
            let mut inner = self.lock();
            if inner.fail_requests > 0 {
                inner.fail_requests -= 1;
                return Some(CallError::Transport("injected failure".into()));
            }
            if snapshot && inner.fail_snapshots > 0 {
                inner.fail_snapshots -= 1;
                return Some(CallError::Transport("injected snapshot failure".into()));
            }
            None
        }

        fn dispatch(
            &self,
            endpoint: &str,
            payload: &Value,
            mutation_id: Option<MutationId>,
        ) -> std::result::Result<Value, ItemError> {
            match endpoint {
                SNAPSHOT_ENDPOINT => {
                    let key = resource_of(payload)?;
                    let mut inner = self.lock();
                    inner.snapshot_requests += 1;
                    let doc = inner
                        .documents
                        .get(&key)
                        .ok_or_else(|| ItemError::new("not_found", format!("no document {key}")))?;
                    Ok(json!({ "version": doc.version, "state": doc.state }))
                }
                PATCH_ENDPOINT => {
                    let key = resource_of(payload)?;
                    let patch = payload.get("patch").cloned().unwrap_or(Value::Null);
                    let ops = from_json(&patch).map_err(|e| ItemError::new("invalid", e.to_string()))?;
                    self.publish(&key, ops, mutation_id)?;
                    Ok(patch)
                }
                _ => {
                    let handler = self.lock().handlers.get(endpoint).cloned();
                    match handler {
                        Some(handler) => handler(payload),
                        None => Err(ItemError::new("no_route", format!("no handler for {endpoint}"))),
                    }
                }
            }
        }

        fn lock(&self) -> MutexGuard<'_, ServerState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    fn fan_out(doc: &mut Document, frame: &PushFrame) {
        // Slow or gone subscribers are dropped; their stream ends.
        doc.subscribers
            .retain(|tx| tx.try_send(frame.clone()).is_ok());
    }

    fn resource_of(payload: &Value) -> std::result::Result<ResourceKey, ItemError> {
        payload
            .get("resource")
            .and_then(Value::as_str)
            .map(ResourceKey::from)
            .ok_or_else(|| ItemError::new("invalid", "missing resource"))
    }

    /// In-memory transport implementation.
    #[derive(Clone)]
    pub struct MemoryTransport {
        server: Arc<MemoryServer>,
    }

    impl MemoryTransport {
        pub fn server(&self) -> &Arc<MemoryServer> {
            &self.server
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn request(&self, endpoint: &str, payload: Value) -> Result<Value> {
            let is_snapshot = endpoint == SNAPSHOT_ENDPOINT;
            if let Some(e) = self.server.take_failure(is_snapshot) {
                return Err(e);
            }
            if is_snapshot {
                let delay = self.server.lock().snapshot_delay;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
            }
            self.server
                .dispatch(endpoint, &payload, None)
                .map_err(CallError::from)
        }

        async fn request_batch(&self, items: Vec<BatchRequest>) -> Result<Vec<BatchResponse>> {
            if let Some(e) = self.server.take_failure(false) {
                return Err(e);
            }
            self.server
                .lock()
                .batches
                .push(items.iter().map(|item| item.endpoint.clone()).collect());

            let mut responses: Vec<BatchResponse> = items
                .into_iter()
                .map(|item| BatchResponse {
                    id: Some(item.id),
                    outcome: match self.server.dispatch(&item.endpoint, &item.payload, item.mutation_id) {
                        Ok(value) => ItemOutcome::Result(value),
                        Err(e) => ItemOutcome::Error(e),
                    },
                })
                .collect();
            if self.server.lock().rotate_responses {
                responses.rotate_right(1);
            }
            Ok(responses)
        }

        async fn open_push(&self, resource: &ResourceKey) -> Result<mpsc::Receiver<PushFrame>> {
            let mut inner = self.server.lock();
            let doc = inner.documents.get_mut(resource).ok_or_else(|| CallError::Rejected {
                code: "not_found".into(),
                message: format!("no document {resource}"),
            })?;
            let (tx, rx) = mpsc::channel(PUSH_BUFFER);
            doc.subscribers.push(tx);
            debug!(%resource, "push stream opened");
            Ok(rx)
        }
    }
}
