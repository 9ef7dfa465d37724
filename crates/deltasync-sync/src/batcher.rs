//! Request batching.
//!
//! Calls enqueued within one scheduling tick are sent as a single
//! [`Transport::request_batch`] round trip. Each caller gets its own result
//! back, matched by request id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use deltasync_core::MutationId;

use crate::error::CallError;
use crate::messages::{limits, BatchRequest, BatchResponse};
use crate::transport::Transport;

type Reply = oneshot::Sender<Result<Value, CallError>>;

/// Configuration for batching behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Maximum calls per round trip; larger batches are split.
    pub max_batch_size: usize,
    /// Extra time to wait for more calls before flushing. `None` flushes
    /// after a single yield.
    pub window: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            window: None,
        }
    }
}

impl BatchConfig {
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }
}

struct Queued {
    request: BatchRequest,
    reply: Reply,
}

#[derive(Default)]
struct Queue {
    items: Vec<Queued>,
    flush_scheduled: bool,
    next_id: u64,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: BatchConfig,
    queue: Mutex<Queue>,
}

/// Coalesces calls into batched round trips.
#[derive(Clone)]
pub struct RequestBatcher {
    inner: Arc<Inner>,
}

impl RequestBatcher {
    pub fn new(transport: Arc<dyn Transport>, config: BatchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                queue: Mutex::new(Queue::default()),
            }),
        }
    }

    /// Queue a call and return a future for its result.
    ///
    /// The call is registered before this returns, so calls enqueued in
    /// sequence keep that order on the wire even if their futures are polled
    /// in a different order. Must be called within a Tokio runtime.
    pub fn enqueue(
        &self,
        endpoint: impl Into<String>,
        payload: Value,
        mutation_id: Option<MutationId>,
    ) -> impl Future<Output = Result<Value, CallError>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let schedule = {
            let mut queue = self.inner.lock();
            let id = queue.next_id;
            queue.next_id += 1;
            queue.items.push(Queued {
                request: BatchRequest {
                    id,
                    endpoint: endpoint.into(),
                    payload,
                    mutation_id,
                },
                reply,
            });
            !std::mem::replace(&mut queue.flush_scheduled, true)
        };
        if schedule {
            tokio::spawn(Arc::clone(&self.inner).flush());
        }
        async move { rx.await.unwrap_or(Err(CallError::Cancelled)) }
    }

    /// Number of calls waiting for the next flush.
    pub fn queued(&self) -> usize {
        self.inner.lock().items.len()
    }
}

impl Inner {
    async fn flush(self: Arc<Self>) {
        match self.config.window {
            Some(window) => tokio::time::sleep(window).await,
            None => tokio::task::yield_now().await,
        }

        let items = {
            let mut queue = self.lock();
            queue.flush_scheduled = false;
            std::mem::take(&mut queue.items)
        };

        let chunk_size = self.config.max_batch_size.clamp(1, limits::MAX_BATCH_ITEMS);
        let mut items = items.into_iter().peekable();
        while items.peek().is_some() {
            let chunk: Vec<Queued> = items.by_ref().take(chunk_size).collect();
            self.send(chunk).await;
        }
    }

    async fn send(&self, chunk: Vec<Queued>) {
        let (requests, replies): (Vec<BatchRequest>, Vec<(u64, Reply)>) = chunk
            .into_iter()
            .map(|q| {
                let id = q.request.id;
                (q.request, (id, q.reply))
            })
            .unzip();
        debug!(calls = requests.len(), "sending batch");

        match self.transport.request_batch(requests).await {
            Ok(responses) => demux(replies, responses),
            Err(error) => {
                warn!(%error, calls = replies.len(), "batch failed");
                for (_, reply) in replies {
                    let _ = reply.send(Err(error.clone()));
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Route responses to callers by id, falling back to position for
/// responses that carry none.
fn demux(replies: Vec<(u64, Reply)>, responses: Vec<BatchResponse>) {
    let mut by_id = HashMap::new();
    let mut by_position = HashMap::new();
    for (position, response) in responses.into_iter().enumerate() {
        match response.id {
            Some(id) => {
                by_id.insert(id, response);
            }
            None => {
                by_position.insert(position, response);
            }
        }
    }

    for (position, (id, reply)) in replies.into_iter().enumerate() {
        let result = by_id
            .remove(&id)
            .or_else(|| by_position.remove(&position))
            .map_or(Err(CallError::MissingResponse), BatchResponse::into_result);
        let _ = reply.send(result);
    }
}
