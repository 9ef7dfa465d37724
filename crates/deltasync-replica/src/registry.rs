//! Reference-counted registry of live replicas.
//!
//! The first subscriber to a resource creates its entry; later subscribers
//! share it. The entry is removed when the last one releases it, or replaced
//! by the next acquire once it reports itself retired.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use deltasync_core::ResourceKey;

use crate::handle::ReplicaHandle;

/// Something stored in a [`ReplicaRegistry`] that exposes a replica.
pub trait RegistryEntry: Clone + Send + Sync + 'static {
    fn replica(&self) -> &ReplicaHandle;

    /// Whether this entry has stopped for good. A retired entry is not
    /// shared with new subscribers.
    fn is_retired(&self) -> bool {
        false
    }
}

impl RegistryEntry for ReplicaHandle {
    fn replica(&self) -> &ReplicaHandle {
        self
    }
}

/// Find the replica for a resource, if one is live.
pub trait ReplicaLookup: Send + Sync {
    fn lookup(&self, key: &ResourceKey) -> Option<ReplicaHandle>;
}

struct Slot<E> {
    entry: E,
    refs: usize,
}

/// Registry of live entries keyed by resource.
pub struct ReplicaRegistry<E: RegistryEntry = ReplicaHandle> {
    slots: Mutex<HashMap<ResourceKey, Slot<E>>>,
}

impl<E: RegistryEntry> ReplicaRegistry<E> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Take a reference to the entry for `key`, creating it with `make` if
    /// there is none.
    ///
    /// A retired entry is replaced; references still held to it no longer
    /// count against the new one.
    ///
    /// Returns the entry and whether it was created by this call.
    pub fn acquire_with(&self, key: &ResourceKey, make: impl FnOnce() -> E) -> (E, bool) {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(key) {
            if !slot.entry.is_retired() {
                slot.refs += 1;
                return (slot.entry.clone(), false);
            }
            debug!(%key, refs = slot.refs, "replacing retired registry entry");
        }
        let entry = make();
        slots.insert(
            key.clone(),
            Slot {
                entry: entry.clone(),
                refs: 1,
            },
        );
        debug!(%key, "registry entry created");
        (entry, true)
    }

    /// Drop one reference to `entry`, registered under `key`.
    ///
    /// Returns the entry when this was the last reference; it is no longer in
    /// the registry. Releasing an entry that has since been replaced is a
    /// no-op.
    pub fn release(&self, key: &ResourceKey, entry: &E) -> Option<E> {
        let mut slots = self.lock();
        let slot = slots.get_mut(key)?;
        if !slot.entry.replica().ptr_eq(entry.replica()) {
            return None;
        }
        slot.refs -= 1;
        if slot.refs > 0 {
            return None;
        }
        debug!(%key, "registry entry removed");
        slots.remove(key).map(|slot| slot.entry)
    }

    pub fn get(&self, key: &ResourceKey) -> Option<E> {
        self.lock().get(key).map(|slot| slot.entry.clone())
    }

    pub fn ref_count(&self, key: &ResourceKey) -> usize {
        self.lock().get(key).map_or(0, |slot| slot.refs)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceKey, Slot<E>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: RegistryEntry> Default for ReplicaRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: RegistryEntry> ReplicaLookup for ReplicaRegistry<E> {
    fn lookup(&self, key: &ResourceKey) -> Option<ReplicaHandle> {
        self.get(key).map(|entry| entry.replica().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::DocumentReplica;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn fresh(key: &ResourceKey) -> ReplicaHandle {
        ReplicaHandle::new(DocumentReplica::with_snapshot(key.clone(), 1, json!({})))
    }

    #[test]
    fn test_second_acquire_shares_entry() {
        let registry: ReplicaRegistry = ReplicaRegistry::new();
        let key = ResourceKey::from("doc");

        let (a, created_a) = registry.acquire_with(&key, || fresh(&key));
        let (b, created_b) = registry.acquire_with(&key, || fresh(&key));
        assert!(created_a);
        assert!(!created_b);
        assert!(a.ptr_eq(&b));
        assert_eq!(registry.ref_count(&key), 2);
    }

    #[test]
    fn test_last_release_removes_entry() {
        let registry: ReplicaRegistry = ReplicaRegistry::new();
        let key = ResourceKey::from("doc");
        let (entry, _) = registry.acquire_with(&key, || fresh(&key));
        registry.acquire_with(&key, || fresh(&key));

        assert!(registry.release(&key, &entry).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.release(&key, &entry).is_some());
        assert!(registry.is_empty());
        assert!(registry.lookup(&key).is_none());
    }

    #[test]
    fn test_release_unknown_key() {
        let registry: ReplicaRegistry = ReplicaRegistry::new();
        let key = ResourceKey::from("nope");
        assert!(registry.release(&key, &fresh(&key)).is_none());
    }

    #[test]
    fn test_reacquire_after_release_creates_fresh() {
        let registry: ReplicaRegistry = ReplicaRegistry::new();
        let key = ResourceKey::from("doc");
        let (first, _) = registry.acquire_with(&key, || fresh(&key));
        registry.release(&key, &first);
        let (second, created) = registry.acquire_with(&key, || fresh(&key));
        assert!(created);
        assert!(!first.ptr_eq(&second));
    }

    #[derive(Clone)]
    struct Stoppable {
        replica: ReplicaHandle,
        stopped: Arc<AtomicBool>,
    }

    impl RegistryEntry for Stoppable {
        fn replica(&self) -> &ReplicaHandle {
            &self.replica
        }

        fn is_retired(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    fn stoppable(key: &ResourceKey) -> Stoppable {
        Stoppable {
            replica: fresh(key),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn test_retired_entry_is_replaced() {
        let registry: ReplicaRegistry<Stoppable> = ReplicaRegistry::new();
        let key = ResourceKey::from("doc");
        let (old, _) = registry.acquire_with(&key, || stoppable(&key));
        registry.acquire_with(&key, || stoppable(&key));
        old.stopped.store(true, Ordering::SeqCst);

        let (new, created) = registry.acquire_with(&key, || stoppable(&key));
        assert!(created);
        assert!(!new.replica.ptr_eq(&old.replica));
        assert_eq!(registry.ref_count(&key), 1);

        // Old holders letting go must not take the new entry with them.
        assert!(registry.release(&key, &old).is_none());
        assert!(registry.release(&key, &old).is_none());
        assert_eq!(registry.ref_count(&key), 1);
        assert!(registry.lookup(&key).is_some_and(|r| r.ptr_eq(&new.replica)));

        assert!(registry.release(&key, &new).is_some());
        assert!(registry.is_empty());
    }
}
