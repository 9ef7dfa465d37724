//! Optimistic mutation coordinator.
//!
//! A submitted mutation's effect is layered onto its target replica before
//! the call leaves the client. When the call settles, the layer is either
//! reconciled with the server's answer or rolled back.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use deltasync_core::{from_json, MutationId, ResourceKey};
use deltasync_replica::{
    Confirmation, Effect, Outcome, PendingMutation, ReplicaHandle, ReplicaLookup, Resolution,
};
use deltasync_sync::CallError;

use crate::error::{ClientError, Result};

/// How a successful response is merged into the confirmed state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Reconcile {
    /// Replay the mutation's own effect on the confirmed state.
    #[default]
    ApplyEffect,
    /// The response is an RFC 6902 patch against the confirmed state.
    ResponsePatch,
    /// The response is the whole new document.
    ResponseState,
}

/// A local change to submit.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub id: MutationId,
    pub target: ResourceKey,
    pub effect: Arc<dyn Effect>,
    pub input: Value,
    pub reconcile: Reconcile,
}

impl Mutation {
    /// Create a mutation with a fresh random id.
    pub fn new(target: impl Into<ResourceKey>, effect: Arc<dyn Effect>, input: Value) -> Self {
        Self {
            id: MutationId::random(),
            target: target.into(),
            effect,
            input,
            reconcile: Reconcile::default(),
        }
    }

    pub fn with_id(mut self, id: MutationId) -> Self {
        self.id = id;
        self
    }

    pub fn with_reconcile(mut self, reconcile: Reconcile) -> Self {
        self.reconcile = reconcile;
        self
    }
}

/// Tracks pending mutations across every live replica.
pub struct MutationCoordinator {
    replicas: Arc<dyn ReplicaLookup>,
    /// Coordinator-wide submission counter; decides effect fold order.
    next_submission: AtomicU64,
}

impl MutationCoordinator {
    pub fn new(replicas: Arc<dyn ReplicaLookup>) -> Self {
        Self {
            replicas,
            next_submission: AtomicU64::new(0),
        }
    }

    /// Layer `mutation` onto its target and send it.
    ///
    /// The effect is visible before this returns. `send` is called exactly
    /// once, synchronously, so that call order on the wire matches
    /// submission order; its future is driven on a spawned task. Must be
    /// called within a Tokio runtime.
    pub fn submit<F, Fut>(&self, mutation: Mutation, send: F) -> Result<MutationHandle>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, CallError>> + Send + 'static,
    {
        let replica = self
            .replicas
            .lookup(&mutation.target)
            .ok_or_else(|| ClientError::UnknownResource(mutation.target.clone()))?;

        let id = mutation.id;
        let reconcile = mutation.reconcile;
        let submitted_at = self.next_submission.fetch_add(1, Ordering::SeqCst);
        let pending = PendingMutation::new(
            id,
            mutation.target,
            mutation.effect,
            mutation.input,
            submitted_at,
        );
        replica.update(|r| r.apply_pending_effect(pending))?;
        debug!(key = %replica.key(), %id, submitted_at, "mutation layered");

        let call = send();
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();
        let settle = Settle {
            id,
            reconcile,
            replica: replica.clone(),
            cancelled: Arc::clone(&cancelled),
        };
        tokio::spawn(async move {
            let result = call.await;
            let _ = tx.send(settle.run(result));
        });

        Ok(MutationHandle {
            id,
            replica,
            cancelled,
            rx,
        })
    }
}

/// Reconciles one mutation once its call returns.
struct Settle {
    id: MutationId,
    reconcile: Reconcile,
    replica: ReplicaHandle,
    cancelled: Arc<AtomicBool>,
}

impl Settle {
    fn run(self, result: std::result::Result<Value, CallError>) -> Result<Value> {
        if self.cancelled.load(Ordering::SeqCst) {
            debug!(id = %self.id, "late result for cancelled mutation discarded");
            return Err(ClientError::Cancelled);
        }

        let value = match result {
            Ok(value) => value,
            Err(error) => {
                warn!(id = %self.id, %error, "mutation failed, rolling back");
                self.roll_back();
                return Err(error.into());
            }
        };

        let confirmation = match self.reconcile {
            Reconcile::ApplyEffect => Confirmation::ApplyEffect,
            Reconcile::ResponseState => Confirmation::State(value.clone()),
            Reconcile::ResponsePatch => match from_json(&value) {
                Ok(ops) => Confirmation::Patch(ops),
                Err(e) => {
                    warn!(id = %self.id, error = %e, "response is not a patch, rolling back");
                    self.roll_back();
                    return Err(e.into());
                }
            },
        };

        let resolution = self
            .replica
            .update(|r| r.resolve_pending(self.id, Outcome::Confirmed(confirmation)))?;
        debug!(id = %self.id, ?resolution, "mutation confirmed");
        Ok(value)
    }

    fn roll_back(&self) {
        let _ = self
            .replica
            .update(|r| r.resolve_pending(self.id, Outcome::RolledBack));
    }
}

/// The caller's view of a submitted mutation.
#[derive(Debug)]
pub struct MutationHandle {
    id: MutationId,
    replica: ReplicaHandle,
    cancelled: Arc<AtomicBool>,
    rx: oneshot::Receiver<Result<Value>>,
}

impl MutationHandle {
    pub fn id(&self) -> MutationId {
        self.id
    }

    /// Roll the mutation back now. The call itself keeps going; its result
    /// is discarded.
    ///
    /// Returns `false` if the mutation had already left the pending set or
    /// its confirmation is already held.
    pub fn cancel(&self) -> bool {
        self.cancelled.store(true, Ordering::SeqCst);
        let resolution = self
            .replica
            .update(|r| r.resolve_pending(self.id, Outcome::RolledBack));
        matches!(resolution, Ok(Resolution::Resolved))
    }

    /// Wait for the server's answer.
    pub async fn result(self) -> Result<Value> {
        self.rx.await.unwrap_or(Err(ClientError::Cancelled))
    }
}
