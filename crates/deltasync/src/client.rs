//! The Client: unified API for queries, mutations and subscriptions.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

use deltasync_core::ResourceKey;
use deltasync_replica::{DocumentReplica, ReplicaHandle, ReplicaRegistry};
use deltasync_sync::{RequestBatcher, SubscriptionHandle, SubscriptionStatus, Transport};

use crate::config::ClientConfig;
use crate::coordinator::{Mutation, MutationCoordinator, MutationHandle};
use crate::error::Result;

type Registry = ReplicaRegistry<SubscriptionHandle>;

/// The main Client struct.
///
/// Owns the request batcher, the subscription registry and the mutation
/// coordinator for one transport. Must be used within a Tokio runtime.
pub struct Client {
    transport: Arc<dyn Transport>,
    batcher: RequestBatcher,
    registry: Arc<Registry>,
    coordinator: MutationCoordinator,
    config: ClientConfig,
}

impl Client {
    /// Create a new client.
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            batcher: RequestBatcher::new(Arc::clone(&transport), config.batch.clone()),
            coordinator: MutationCoordinator::new(registry.clone()),
            transport,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Call `endpoint` through the batcher.
    ///
    /// Transport faults are retried with the query backoff; item errors are
    /// returned as they are.
    pub async fn query(&self, endpoint: &str, payload: Value) -> Result<Value> {
        let value = self
            .config
            .query_retry
            .retry(|| self.batcher.enqueue(endpoint, payload.clone(), None))
            .await?;
        Ok(value)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply `mutation` optimistically and call `endpoint` with `payload`.
    ///
    /// The call carries the mutation id so the server can echo it on the
    /// push stream. Mutations are sent once and never retried.
    pub fn mutate(
        &self,
        endpoint: impl Into<String>,
        payload: Value,
        mutation: Mutation,
    ) -> Result<MutationHandle> {
        let endpoint = endpoint.into();
        let id = mutation.id;
        let batcher = self.batcher.clone();
        self.coordinator
            .submit(mutation, move || batcher.enqueue(endpoint, payload, Some(id)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe to a resource.
    ///
    /// Subscribers to the same resource share one replica and one push
    /// stream. The stream is torn down when the last [`Subscription`] is
    /// dropped. A subscription that has closed for good is not shared: the
    /// next subscriber starts a fresh one.
    pub fn subscribe(&self, key: impl Into<ResourceKey>) -> Subscription {
        let key = key.into();
        let (handle, created) = self.registry.acquire_with(&key, || {
            SubscriptionHandle::spawn(
                Arc::clone(&self.transport),
                ReplicaHandle::new(DocumentReplica::new(key.clone())),
                self.config.resync.clone(),
            )
        });
        if created {
            info!(%key, "subscription started");
        } else {
            debug!(%key, refs = self.registry.ref_count(&key), "joined subscription");
        }
        Subscription {
            handle,
            registry: Arc::clone(&self.registry),
            released: false,
        }
    }

    /// The replica for `key`, if anyone is subscribed to it.
    pub fn replica(&self, key: &ResourceKey) -> Option<ReplicaHandle> {
        self.registry.get(key).map(|h| h.replica().clone())
    }

    /// Number of resources with a live subscription.
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }
}

/// One subscriber's reference to a live subscription.
pub struct Subscription {
    handle: SubscriptionHandle,
    registry: Arc<Registry>,
    released: bool,
}

impl Subscription {
    pub fn key(&self) -> &ResourceKey {
        self.handle.key()
    }

    /// Current visible document.
    pub fn snapshot(&self) -> Arc<Value> {
        self.handle.replica().snapshot()
    }

    /// Receiver notified on every change to the visible document.
    pub fn watch(&self) -> watch::Receiver<Arc<Value>> {
        self.handle.replica().watch()
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.handle.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<SubscriptionStatus> {
        self.handle.watch_status()
    }

    pub fn replica(&self) -> &ReplicaHandle {
        self.handle.replica()
    }

    /// Wait for the first snapshot.
    pub async fn wait_live(&self) -> Result<()> {
        Ok(self.handle.wait_live().await?)
    }

    /// Drop this reference now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(handle) = self.registry.release(self.handle.key(), &self.handle) {
            info!(key = %handle.key(), "last subscriber left, closing subscription");
            handle.close();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
