//! Shared access to a replica.
//!
//! A [`ReplicaHandle`] is what the subscription driver and the mutation
//! coordinator both hold. Every access goes through a short synchronous
//! critical section; the lock is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::watch;

use deltasync_core::ResourceKey;

use crate::replica::DocumentReplica;

struct Shared {
    replica: Mutex<DocumentReplica>,
    visible: watch::Sender<Arc<Value>>,
}

/// Cloneable, thread-safe handle to one [`DocumentReplica`].
///
/// Readers can [`watch`](Self::watch) the visible state; a new value is
/// published whenever an update rebuilds it.
#[derive(Clone)]
pub struct ReplicaHandle {
    key: ResourceKey,
    shared: Arc<Shared>,
}

impl ReplicaHandle {
    pub fn new(replica: DocumentReplica) -> Self {
        let key = replica.key().clone();
        let (visible, _) = watch::channel(replica.snapshot());
        Self {
            key,
            shared: Arc::new(Shared {
                replica: Mutex::new(replica),
                visible,
            }),
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Read from the replica.
    pub fn with<R>(&self, f: impl FnOnce(&DocumentReplica) -> R) -> R {
        f(&self.lock())
    }

    /// Mutate the replica, publishing the visible state if it was rebuilt.
    pub fn update<R>(&self, f: impl FnOnce(&mut DocumentReplica) -> R) -> R {
        let mut replica = self.lock();
        let revision = replica.revision();
        let out = f(&mut replica);
        if replica.revision() != revision {
            // Published under the lock so watchers see revisions in order.
            self.shared.visible.send_replace(replica.snapshot());
        }
        out
    }

    /// The current visible state.
    pub fn snapshot(&self) -> Arc<Value> {
        self.with(DocumentReplica::snapshot)
    }

    /// The last server-confirmed state, without pending effects.
    pub fn confirmed(&self) -> Arc<Value> {
        self.with(DocumentReplica::confirmed)
    }

    /// Subscribe to changes of the visible state.
    pub fn watch(&self) -> watch::Receiver<Arc<Value>> {
        self.shared.visible.subscribe()
    }

    /// Whether two handles point at the same replica.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn lock(&self) -> MutexGuard<'_, DocumentReplica> {
        self.shared
            .replica
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ReplicaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaHandle").field("key", &self.key).finish()
    }
}
