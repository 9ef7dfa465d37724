//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::Value;

use deltasync_core::{diff, Operation, Path};

/// Generate a scalar JSON value.
pub fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-100i64..100).prop_map(Value::from),
        "[a-c]{0,3}".prop_map(Value::from),
    ]
}

/// Generate an object member name. Includes the characters that need
/// pointer escaping.
pub fn member_name() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => "[a-d]{1,2}".prop_map(String::from),
        1 => Just("a/b".to_string()),
        1 => Just("~t".to_string()),
    ]
}

/// Generate a small nested JSON document.
pub fn document() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(member_name(), inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Generate a pointer over a small token alphabet.
///
/// Tokens overlap with [`member_name`] and small array indices, so some
/// paths resolve against generated documents and some do not.
pub fn path() -> impl Strategy<Value = Path> {
    let token = prop_oneof![
        member_name(),
        (0usize..4).prop_map(|i| i.to_string()),
        Just("-".to_string()),
    ];
    prop::collection::vec(token, 0..3).prop_map(|tokens| Path::from_tokens(tokens))
}

/// Generate a single operation. It may or may not apply to a given
/// document.
pub fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (path(), leaf()).prop_map(|(p, v)| Operation::add(p, v)),
        path().prop_map(Operation::remove),
        (path(), leaf()).prop_map(|(p, v)| Operation::replace(p, v)),
        (path(), path()).prop_map(|(from, to)| Operation::move_to(from, to)),
        (path(), path()).prop_map(|(from, to)| Operation::copy_to(from, to)),
        (path(), leaf()).prop_map(|(p, v)| Operation::test(p, v)),
    ]
}

/// Generate a patch of up to `max_len` operations.
pub fn patch(max_len: usize) -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(operation(), 0..=max_len)
}

/// A document and a patch to try against it.
#[derive(Debug, Clone)]
pub struct PatchCase {
    pub doc: Value,
    pub ops: Vec<Operation>,
}

impl Arbitrary for PatchCase {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (document(), patch(6))
            .prop_map(|(doc, ops)| PatchCase { doc, ops })
            .boxed()
    }
}

/// A server document's version history as push frames.
#[derive(Debug, Clone)]
pub struct History {
    /// State at the snapshot version.
    pub initial: Value,
    /// Version the snapshot was taken at.
    pub version: u64,
    /// `(sequence, patch)` for every later version, in order.
    pub frames: Vec<(u64, Vec<Operation>)>,
    /// State after the last frame.
    pub last: Value,
}

impl Arbitrary for History {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (document(), prop::collection::vec(document(), 0..6), 1u64..1000)
            .prop_map(|(initial, states, version)| history_from_states(initial, states, version))
            .boxed()
    }
}

/// Build a history whose frames are the diffs between consecutive states.
pub fn history_from_states(initial: Value, states: Vec<Value>, version: u64) -> History {
    let mut frames = Vec::with_capacity(states.len());
    let mut prev = initial.clone();
    for (i, next) in states.into_iter().enumerate() {
        frames.push((version + 1 + i as u64, diff(&prev, &next)));
        prev = next;
    }
    History {
        initial,
        version,
        frames,
        last: prev,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltasync_core::{apply, apply_in_place, json_equal};
    use deltasync_replica::DocumentReplica;
    use deltasync_sync::{Action, Event, RetryPolicy, SubscriptionMachine};

    proptest! {
        #[test]
        fn test_failed_patch_leaves_document_untouched(case: PatchCase) {
            let before = case.doc.clone();
            let mut stepwise = case.doc.clone();
            let stepwise_result = apply_in_place(&mut stepwise, &case.ops);

            match apply(&case.doc, &case.ops) {
                Ok(patched) => {
                    prop_assert!(stepwise_result.is_ok());
                    prop_assert_eq!(patched, stepwise);
                }
                Err(conflict) => {
                    // Same failing operation as a step-by-step run.
                    prop_assert_eq!(
                        Some(conflict.index),
                        stepwise_result.err().map(|c| c.index)
                    );
                    prop_assert_eq!(&case.doc, &before);

                    let mut replica = DocumentReplica::with_snapshot("doc".into(), 1, before.clone());
                    prop_assert!(replica.apply_confirmed(2, &case.ops, None).is_err());
                    prop_assert_eq!(&*replica.confirmed(), &before);
                    prop_assert_eq!(&*replica.snapshot(), &before);
                    prop_assert_eq!(replica.server_version(), 1);
                }
            }
        }

        #[test]
        fn test_diff_roundtrip(src in document(), dst in document()) {
            let out = apply(&src, &diff(&src, &dst)).unwrap();
            prop_assert!(json_equal(&out, &dst));
        }

        #[test]
        fn test_duplicate_frames_are_discarded(
            history: History,
            repeats in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
        ) {
            // Deliver every frame in order, replaying earlier ones in between.
            let mut delivery = Vec::new();
            for (i, frame) in history.frames.iter().enumerate() {
                delivery.push(frame.clone());
                for r in &repeats {
                    if r.index(history.frames.len()) <= i {
                        delivery.push(history.frames[r.index(history.frames.len())].clone());
                    }
                }
            }

            let mut machine = SubscriptionMachine::new(RetryPolicy::default());
            machine.start();
            prop_assert_eq!(
                machine.handle(Event::SnapshotLoaded { version: history.version }),
                Action::InstallSnapshot
            );
            let mut replica = DocumentReplica::with_snapshot(
                "doc".into(),
                history.version,
                history.initial.clone(),
            );

            for (sequence, ops) in delivery {
                match machine.handle(Event::PatchReceived { sequence }) {
                    Action::ApplyPatch => replica.apply_confirmed(sequence, &ops, None).unwrap(),
                    action => {
                        prop_assert_eq!(action, Action::Discard);
                    }
                }
            }

            let confirmed = replica.confirmed();
            prop_assert!(json_equal(&confirmed, &history.last));
            prop_assert_eq!(
                replica.server_version(),
                history.version + history.frames.len() as u64
            );
        }
    }
}
