//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: an in-memory server with one or
//! more clients connected to it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use deltasync::{Client, ClientConfig, Mutation, MutationId, Path, ResourceKey, RetryPolicy, Subscription};
use deltasync_core::Operation;
use deltasync_replica::{AppendEffect, SetEffect};
use deltasync_sync::{ItemError, MemoryServer};

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Backoff with millisecond delays so retries do not slow tests down.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_initial(Duration::from_millis(1))
        .with_max(Duration::from_millis(10))
        .with_max_attempts(5)
}

/// Client configuration with fast retries.
pub fn fast_config() -> ClientConfig {
    ClientConfig::default()
        .with_resync(fast_retry())
        .with_query_retry(fast_retry())
}

/// A memory server and one client connected to it.
pub struct SyncFixture {
    pub server: Arc<MemoryServer>,
    pub client: Client,
}

impl SyncFixture {
    /// Create a new fixture with [`fast_config`].
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let server = MemoryServer::new();
        let client = Client::new(Arc::new(server.connect()), config);
        Self { server, client }
    }

    /// Add a document at version 1.
    pub fn with_document(self, key: &str, state: Value) -> Self {
        self.server.insert_document(key, 1, state);
        self
    }

    /// Another client on the same server.
    pub fn connect_client(&self) -> Client {
        Client::new(Arc::new(self.server.connect()), fast_config())
    }

    /// Subscribe and wait for the first snapshot.
    pub async fn subscribe_live(&self, key: &str) -> deltasync::Result<Subscription> {
        let sub = self.client.subscribe(key);
        sub.wait_live().await?;
        Ok(sub)
    }

    /// Change a document on the server as another writer would.
    pub fn publish(&self, key: &str, ops: Vec<Operation>) -> Result<u64, ItemError> {
        self.server.publish(&ResourceKey::from(key), ops, None)
    }

    /// Current server-side state of a document.
    pub fn server_state(&self, key: &str) -> Option<Value> {
        self.server
            .document(&ResourceKey::from(key))
            .map(|(_, state)| state)
    }
}

impl Default for SyncFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic mutation id.
pub fn mutation_id(n: u8) -> MutationId {
    MutationId::from_bytes([n; 16])
}

/// A mutation appending `value` to the array at `pointer` of `key`.
pub fn append_to(key: &str, pointer: &str, value: Value) -> Result<Mutation, deltasync_core::PointerError> {
    let effect = Arc::new(AppendEffect::new(Path::parse(pointer)?));
    Ok(Mutation::new(key, effect, value))
}

/// A mutation setting `pointer` of `key` to `value`.
pub fn set_at(key: &str, pointer: &str, value: Value) -> Result<Mutation, deltasync_core::PointerError> {
    let effect = Arc::new(SetEffect::new(Path::parse(pointer)?));
    Ok(Mutation::new(key, effect, value))
}

/// Wait until the replica behind `sub` has reached `version`.
///
/// Returns `false` on timeout.
pub async fn wait_for_version(sub: &Subscription, version: u64, timeout: Duration) -> bool {
    let replica = sub.replica().clone();
    tokio::time::timeout(timeout, async move {
        while replica.with(|r| r.server_version()) < version {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .is_ok()
}

/// Several clients sharing one server, for multi-writer tests.
pub fn multi_client_fixture(count: usize) -> (Arc<MemoryServer>, Vec<Client>) {
    let server = MemoryServer::new();
    let clients = (0..count)
        .map(|_| Client::new(Arc::new(server.connect()), fast_config()))
        .collect();
    (server, clients)
}
