//! The versioned replica of one subscribed document.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use deltasync_core::{apply, MutationId, Operation, ResourceKey};

use crate::effect::Effect;
use crate::error::{ReplicaError, Result};

/// How many early-merged mutation IDs are remembered while waiting for the
/// server to echo them on the push stream.
const MERGED_EARLY_CAPACITY: usize = 256;

/// Lifecycle of a pending mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    /// Submitted, no outcome yet.
    Pending,
    /// Confirmed by the server. The effect still folds until every earlier
    /// mutation has resolved.
    Confirmed,
    /// Failed or cancelled.
    RolledBack,
}

/// A local mutation whose effect is layered over the confirmed state.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub id: MutationId,
    pub target: ResourceKey,
    pub effect: Arc<dyn Effect>,
    pub input: Value,
    /// Logical submission index; effects fold in ascending order.
    pub submitted_at: u64,
    pub status: MutationStatus,
}

impl PendingMutation {
    pub fn new(
        id: MutationId,
        target: ResourceKey,
        effect: Arc<dyn Effect>,
        input: Value,
        submitted_at: u64,
    ) -> Self {
        Self {
            id,
            target,
            effect,
            input,
            submitted_at,
            status: MutationStatus::Pending,
        }
    }
}

/// The authoritative result of a mutation, as merged into the confirmed state.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// Apply these operations to the confirmed state.
    Patch(Vec<Operation>),
    /// Replace the confirmed state.
    State(Value),
    /// The server acknowledged without data; replay the mutation's own effect.
    ApplyEffect,
    /// The change already reached the confirmed state through the push stream.
    AlreadyApplied,
}

/// Outcome reported for a pending mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Confirmed(Confirmation),
    RolledBack,
}

/// What [`DocumentReplica::resolve_pending`] did with an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The mutation left the pending set.
    Resolved,
    /// Confirmed, but held until earlier mutations resolve.
    Deferred,
    /// No unresolved mutation with that ID.
    NotPending,
}

#[derive(Debug)]
struct Layer {
    mutation: PendingMutation,
    held: Option<Confirmation>,
}

/// Local copy of a server-owned document with optimistic layers.
///
/// `visible` is always the fold of every layer's effect, in submission order,
/// over `confirmed`. Both trees are shared `Arc`s so readers get cheap,
/// immutable snapshots.
#[derive(Debug)]
pub struct DocumentReplica {
    key: ResourceKey,
    server_version: u64,
    initialized: bool,
    confirmed: Arc<Value>,
    visible: Arc<Value>,
    layers: Vec<Layer>,
    merged_early: VecDeque<MutationId>,
    revision: u64,
}

impl DocumentReplica {
    /// Create a replica that has not seen a snapshot yet.
    ///
    /// Pending effects may be layered right away; they fold over `null`.
    pub fn new(key: ResourceKey) -> Self {
        let confirmed = Arc::new(Value::Null);
        Self {
            key,
            server_version: 0,
            initialized: false,
            visible: Arc::clone(&confirmed),
            confirmed,
            layers: Vec::new(),
            merged_early: VecDeque::new(),
            revision: 0,
        }
    }

    /// Create a replica initialized from a snapshot.
    pub fn with_snapshot(key: ResourceKey, version: u64, state: Value) -> Self {
        let mut replica = Self::new(key);
        replica.reset(version, state);
        replica
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Version of the last applied authoritative change.
    pub fn server_version(&self) -> u64 {
        self.server_version
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Bumped every time the visible state is rebuilt.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The visible state: confirmed plus every layered effect.
    pub fn snapshot(&self) -> Arc<Value> {
        Arc::clone(&self.visible)
    }

    /// The state as built from authoritative changes only.
    pub fn confirmed(&self) -> Arc<Value> {
        Arc::clone(&self.confirmed)
    }

    /// Number of layered effects, including confirmations held for in-order merge.
    pub fn pending_count(&self) -> usize {
        self.layers.len()
    }

    /// Layered mutation IDs in fold order.
    pub fn pending_ids(&self) -> Vec<MutationId> {
        self.layers.iter().map(|l| l.mutation.id).collect()
    }

    pub fn mutation_status(&self, id: MutationId) -> Option<MutationStatus> {
        self.layers
            .iter()
            .find(|l| l.mutation.id == id)
            .map(|l| l.mutation.status)
    }

    /// Replace the confirmed state and version from a full snapshot.
    ///
    /// Unresolved effects are layered again on top. Held confirmations are
    /// dropped along with their layers: the snapshot already reflects them.
    pub fn reset(&mut self, version: u64, state: Value) {
        let before = self.layers.len();
        self.layers.retain(|l| l.held.is_none());
        let dropped = before - self.layers.len();
        if dropped > 0 {
            debug!(key = %self.key, dropped, "discarded held confirmations on reset");
        }
        self.merged_early.clear();
        self.confirmed = Arc::new(state);
        self.server_version = version;
        self.initialized = true;
        self.recompute();
    }

    /// Apply an authoritative patch at `version`.
    ///
    /// `origin` names the mutation the server echoed with this change, if any.
    /// A matching layer is dropped because its change is now confirmed. If
    /// that mutation was already merged from its direct response, only the
    /// version advances.
    pub fn apply_confirmed(
        &mut self,
        version: u64,
        ops: &[Operation],
        origin: Option<MutationId>,
    ) -> Result<()> {
        if !self.initialized {
            return Err(ReplicaError::NotInitialized);
        }
        if version <= self.server_version {
            return Err(ReplicaError::StaleVersion {
                current: self.server_version,
                got: version,
            });
        }

        if let Some(id) = origin {
            if let Some(pos) = self.merged_early.iter().position(|m| *m == id) {
                self.merged_early.remove(pos);
                self.server_version = version;
                debug!(key = %self.key, %id, version, "echo for merged mutation, skipping ops");
                return Ok(());
            }
        }

        let next = apply(&self.confirmed, ops)?;
        self.confirmed = Arc::new(next);
        self.server_version = version;

        if let Some(id) = origin {
            if let Some(pos) = self.position(id) {
                self.layers.remove(pos);
                debug!(key = %self.key, %id, version, "mutation confirmed by push");
            }
        }

        self.drain_prefix();
        self.recompute();
        Ok(())
    }

    /// Layer a new optimistic effect.
    pub fn apply_pending_effect(&mut self, mut mutation: PendingMutation) -> Result<()> {
        if self.position(mutation.id).is_some() {
            return Err(ReplicaError::DuplicateMutation(mutation.id));
        }
        mutation.status = MutationStatus::Pending;
        let at = self
            .layers
            .partition_point(|l| l.mutation.submitted_at <= mutation.submitted_at);
        self.layers.insert(at, Layer { mutation, held: None });
        self.recompute();
        Ok(())
    }

    /// Settle a pending mutation.
    ///
    /// A confirmation for a mutation that still has unresolved predecessors is
    /// held and merged once they resolve. If merging fails, the layer is
    /// dropped, the confirmed state is left as it was, and the error returned.
    pub fn resolve_pending(&mut self, id: MutationId, outcome: Outcome) -> Result<Resolution> {
        let Some(pos) = self.position(id) else {
            debug!(key = %self.key, %id, "outcome for unknown mutation ignored");
            return Ok(Resolution::NotPending);
        };
        if self.layers[pos].held.is_some() {
            return Ok(Resolution::NotPending);
        }

        let confirmation = match outcome {
            Outcome::RolledBack => {
                self.layers.remove(pos);
                debug!(key = %self.key, %id, "mutation rolled back");
                self.drain_prefix();
                self.recompute();
                return Ok(Resolution::Resolved);
            }
            Outcome::Confirmed(Confirmation::AlreadyApplied) => {
                self.layers.remove(pos);
                self.drain_prefix();
                self.recompute();
                return Ok(Resolution::Resolved);
            }
            Outcome::Confirmed(confirmation) => confirmation,
        };

        if pos > 0 {
            let layer = &mut self.layers[pos];
            layer.mutation.status = MutationStatus::Confirmed;
            layer.held = Some(confirmation);
            debug!(key = %self.key, %id, "confirmation held behind earlier mutations");
            return Ok(Resolution::Deferred);
        }

        let layer = self.layers.remove(0);
        let merged = self.merge(&layer.mutation, confirmation);
        self.drain_prefix();
        self.recompute();
        merged.map(|()| Resolution::Resolved)
    }

    fn position(&self, id: MutationId) -> Option<usize> {
        self.layers.iter().position(|l| l.mutation.id == id)
    }

    fn merge(&mut self, mutation: &PendingMutation, confirmation: Confirmation) -> Result<()> {
        let next = match confirmation {
            Confirmation::Patch(ops) => apply(&self.confirmed, &ops)?,
            Confirmation::State(state) => state,
            Confirmation::ApplyEffect => mutation
                .effect
                .apply(&self.confirmed, &mutation.input)
                .map_err(|source| ReplicaError::Effect {
                    id: mutation.id,
                    source,
                })?,
            Confirmation::AlreadyApplied => return Ok(()),
        };
        self.confirmed = Arc::new(next);

        if self.merged_early.len() == MERGED_EARLY_CAPACITY {
            self.merged_early.pop_front();
        }
        self.merged_early.push_back(mutation.id);
        Ok(())
    }

    /// Merge held confirmations that no longer have unresolved predecessors.
    fn drain_prefix(&mut self) {
        while self.layers.first().is_some_and(|l| l.held.is_some()) {
            let mut layer = self.layers.remove(0);
            let Some(confirmation) = layer.held.take() else {
                break;
            };
            if let Err(e) = self.merge(&layer.mutation, confirmation) {
                warn!(key = %self.key, id = %layer.mutation.id, error = %e, "held confirmation failed to merge");
            }
        }
    }

    fn recompute(&mut self) {
        let mut folded: Option<Value> = None;
        for layer in &self.layers {
            let base = folded.as_ref().unwrap_or(self.confirmed.as_ref());
            match layer.mutation.effect.apply(base, &layer.mutation.input) {
                Ok(next) => folded = Some(next),
                Err(e) => {
                    debug!(key = %self.key, id = %layer.mutation.id, error = %e, "skipping effect that no longer applies");
                }
            }
        }
        self.visible = match folded {
            Some(state) => Arc::new(state),
            None => Arc::clone(&self.confirmed),
        };
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{AppendEffect, RemoveEffect, SetEffect};
    use deltasync_core::Path;
    use proptest::prelude::*;
    use serde_json::json;

    fn key() -> ResourceKey {
        ResourceKey::from("todos")
    }

    fn id(n: u8) -> MutationId {
        MutationId::from_bytes([n; 16])
    }

    fn append(n: u8, value: Value, at: u64) -> PendingMutation {
        let effect = Arc::new(AppendEffect::new(Path::root()));
        PendingMutation::new(id(n), key(), effect, value, at)
    }

    fn push(value: Value) -> Vec<Operation> {
        vec![Operation::add(Path::parse("/-").unwrap(), value)]
    }

    fn confirm() -> Outcome {
        Outcome::Confirmed(Confirmation::ApplyEffect)
    }

    #[test]
    fn test_snapshot_initializes() {
        let replica = DocumentReplica::with_snapshot(key(), 3, json!({"a": 1}));
        assert!(replica.is_initialized());
        assert_eq!(replica.server_version(), 3);
        assert_eq!(*replica.snapshot(), json!({"a": 1}));
    }

    #[test]
    fn test_effects_fold_in_submission_order() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!([]));
        replica.apply_pending_effect(append(1, json!("x"), 1)).unwrap();
        replica.apply_pending_effect(append(2, json!("y"), 2)).unwrap();
        assert_eq!(*replica.snapshot(), json!(["x", "y"]));
    }

    #[test]
    fn test_late_submission_index_folds_first() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!([]));
        replica.apply_pending_effect(append(2, json!("y"), 2)).unwrap();
        replica.apply_pending_effect(append(1, json!("x"), 1)).unwrap();
        assert_eq!(*replica.snapshot(), json!(["x", "y"]));
        assert_eq!(replica.pending_ids(), vec![id(1), id(2)]);
    }

    #[test]
    fn test_later_confirmation_waits_for_earlier() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!([]));
        replica.apply_pending_effect(append(1, json!("x"), 1)).unwrap();
        replica.apply_pending_effect(append(2, json!("y"), 2)).unwrap();

        assert_eq!(replica.resolve_pending(id(2), confirm()).unwrap(), Resolution::Deferred);
        assert_eq!(*replica.snapshot(), json!(["x", "y"]));
        assert_eq!(*replica.confirmed(), json!([]));
        assert_eq!(replica.mutation_status(id(2)), Some(MutationStatus::Confirmed));

        assert_eq!(replica.resolve_pending(id(1), confirm()).unwrap(), Resolution::Resolved);
        assert_eq!(*replica.confirmed(), json!(["x", "y"]));
        assert_eq!(*replica.snapshot(), json!(["x", "y"]));
        assert_eq!(replica.pending_count(), 0);
    }

    #[test]
    fn test_rollback_of_earlier_releases_held() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!([]));
        replica.apply_pending_effect(append(1, json!("x"), 1)).unwrap();
        replica.apply_pending_effect(append(2, json!("y"), 2)).unwrap();
        replica.resolve_pending(id(2), confirm()).unwrap();

        replica.resolve_pending(id(1), Outcome::RolledBack).unwrap();
        assert_eq!(*replica.confirmed(), json!(["y"]));
        assert_eq!(*replica.snapshot(), json!(["y"]));
    }

    #[test]
    fn test_rollback_restores_previous_value() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!({"title": "old"}));
        let effect = Arc::new(SetEffect::new(Path::parse("/title").unwrap()));
        let m = PendingMutation::new(id(1), key(), effect, json!("new"), 1);
        replica.apply_pending_effect(m).unwrap();
        assert_eq!(*replica.snapshot(), json!({"title": "new"}));

        replica.resolve_pending(id(1), Outcome::RolledBack).unwrap();
        assert_eq!(*replica.snapshot(), json!({"title": "old"}));
    }

    #[test]
    fn test_duplicate_mutation_rejected() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!([]));
        replica.apply_pending_effect(append(1, json!("x"), 1)).unwrap();
        let err = replica.apply_pending_effect(append(1, json!("x"), 2)).unwrap_err();
        assert!(matches!(err, ReplicaError::DuplicateMutation(m) if m == id(1)));
    }

    #[test]
    fn test_stale_version_rejected() {
        let mut replica = DocumentReplica::with_snapshot(key(), 4, json!([]));
        let err = replica.apply_confirmed(4, &push(json!(1)), None).unwrap_err();
        assert!(matches!(err, ReplicaError::StaleVersion { current: 4, got: 4 }));
        assert_eq!(*replica.confirmed(), json!([]));
    }

    #[test]
    fn test_confirmed_before_snapshot_rejected() {
        let mut replica = DocumentReplica::new(key());
        let err = replica.apply_confirmed(1, &push(json!(1)), None).unwrap_err();
        assert!(matches!(err, ReplicaError::NotInitialized));
    }

    #[test]
    fn test_failed_patch_leaves_replica_unchanged() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!({"a": 1}));
        let ops = vec![
            Operation::replace(Path::parse("/a").unwrap(), json!(2)),
            Operation::remove(Path::parse("/missing").unwrap()),
        ];
        assert!(matches!(
            replica.apply_confirmed(2, &ops, None),
            Err(ReplicaError::Patch(_))
        ));
        assert_eq!(replica.server_version(), 1);
        assert_eq!(*replica.snapshot(), json!({"a": 1}));
    }

    #[test]
    fn test_unrelated_patch_relayers_pending() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!([]));
        replica.apply_pending_effect(append(1, json!("x"), 1)).unwrap();
        replica.apply_confirmed(2, &push(json!("z")), None).unwrap();
        assert_eq!(*replica.confirmed(), json!(["z"]));
        assert_eq!(*replica.snapshot(), json!(["z", "x"]));
    }

    #[test]
    fn test_echoed_patch_confirms_mutation() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!([]));
        replica.apply_pending_effect(append(1, json!("x"), 1)).unwrap();

        replica.apply_confirmed(2, &push(json!("x")), Some(id(1))).unwrap();
        assert_eq!(*replica.snapshot(), json!(["x"]));
        assert_eq!(replica.pending_count(), 0);

        // The direct response arriving afterwards is a no-op.
        assert_eq!(replica.resolve_pending(id(1), confirm()).unwrap(), Resolution::NotPending);
        assert_eq!(*replica.confirmed(), json!(["x"]));
    }

    #[test]
    fn test_echo_after_direct_merge_only_advances_version() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!([]));
        replica.apply_pending_effect(append(1, json!("x"), 1)).unwrap();
        replica.resolve_pending(id(1), confirm()).unwrap();
        assert_eq!(*replica.confirmed(), json!(["x"]));

        replica.apply_confirmed(2, &push(json!("x")), Some(id(1))).unwrap();
        assert_eq!(replica.server_version(), 2);
        assert_eq!(*replica.confirmed(), json!(["x"]));
    }

    #[test]
    fn test_reset_preserves_pending() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!([]));
        replica.apply_pending_effect(append(1, json!("x"), 1)).unwrap();
        replica.reset(5, json!(["a"]));
        assert_eq!(replica.server_version(), 5);
        assert_eq!(*replica.snapshot(), json!(["a", "x"]));
    }

    #[test]
    fn test_reset_drops_held_confirmations() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!([]));
        replica.apply_pending_effect(append(1, json!("x"), 1)).unwrap();
        replica.apply_pending_effect(append(2, json!("y"), 2)).unwrap();
        replica.resolve_pending(id(2), confirm()).unwrap();

        replica.reset(7, json!(["y"]));
        assert_eq!(replica.pending_ids(), vec![id(1)]);
        assert_eq!(*replica.snapshot(), json!(["y", "x"]));
    }

    #[test]
    fn test_effect_that_no_longer_applies_is_skipped() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!({"a": 1, "b": 2}));
        let effect = Arc::new(RemoveEffect::new(Path::parse("/a").unwrap()));
        replica
            .apply_pending_effect(PendingMutation::new(id(1), key(), effect, Value::Null, 1))
            .unwrap();
        assert_eq!(*replica.snapshot(), json!({"b": 2}));

        let ops = vec![Operation::remove(Path::parse("/a").unwrap())];
        replica.apply_confirmed(2, &ops, None).unwrap();
        assert_eq!(*replica.snapshot(), json!({"b": 2}));
        assert_eq!(replica.pending_count(), 1);
    }

    #[test]
    fn test_conflicting_confirmation_drops_layer() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!({}));
        let effect = Arc::new(SetEffect::new(Path::parse("/a").unwrap()));
        replica
            .apply_pending_effect(PendingMutation::new(id(1), key(), effect, json!(1), 1))
            .unwrap();

        let bad = Confirmation::Patch(vec![Operation::remove(Path::parse("/zzz").unwrap())]);
        let err = replica.resolve_pending(id(1), Outcome::Confirmed(bad)).unwrap_err();
        assert!(matches!(err, ReplicaError::Patch(_)));
        assert_eq!(replica.pending_count(), 0);
        assert_eq!(*replica.snapshot(), json!({}));
    }

    #[test]
    fn test_state_confirmation_replaces_confirmed() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!([]));
        replica.apply_pending_effect(append(1, json!("x"), 1)).unwrap();
        let outcome = Outcome::Confirmed(Confirmation::State(json!(["x", "server"])));
        replica.resolve_pending(id(1), outcome).unwrap();
        assert_eq!(*replica.snapshot(), json!(["x", "server"]));
    }

    #[test]
    fn test_pending_before_snapshot_folds_over_null() {
        let mut replica = DocumentReplica::new(key());
        let effect = Arc::new(SetEffect::new(Path::root()));
        replica
            .apply_pending_effect(PendingMutation::new(id(1), key(), effect, json!({"n": 1}), 1))
            .unwrap();
        assert_eq!(*replica.snapshot(), json!({"n": 1}));
        assert!(!replica.is_initialized());
    }

    #[test]
    fn test_revision_bumps_on_recompute() {
        let mut replica = DocumentReplica::with_snapshot(key(), 1, json!([]));
        let before = replica.revision();
        replica.apply_pending_effect(append(1, json!("x"), 1)).unwrap();
        assert!(replica.revision() > before);
    }

    proptest! {
        #[test]
        fn prop_confirmation_order_does_not_matter(
            order in Just((0u8..6).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let mut replica = DocumentReplica::with_snapshot(key(), 1, json!([]));
            for n in 0u8..6 {
                replica.apply_pending_effect(append(n, json!(n), u64::from(n))).unwrap();
            }
            let expected = json!([0, 1, 2, 3, 4, 5]);
            for n in order {
                let visible = replica.snapshot();
                prop_assert_eq!(visible.as_ref(), &expected);
                replica.resolve_pending(id(n), confirm()).unwrap();
            }
            let confirmed = replica.confirmed();
            prop_assert_eq!(confirmed.as_ref(), &expected);
            prop_assert_eq!(replica.pending_count(), 0);
        }
    }
}
