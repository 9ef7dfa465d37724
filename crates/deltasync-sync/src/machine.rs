//! Subscription state machine.
//!
//! Pure: it consumes events and returns the next action to perform. The
//! async driver in [`crate::subscription`] executes the actions.
//!
//! ```text
//! connecting ──snapshot──> live ──gap/conflict/stream end──> resyncing
//!      │                    ^                                   │
//!      │                    └─────────────snapshot──────────────┘
//!      └──── unsubscribe / retries exhausted ────> closed <─────┘
//! ```

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backoff::RetryPolicy;
use crate::error::{CallError, SyncError};

/// Coarse subscription state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Live,
    Resyncing,
    Closed,
}

/// Subscription state as exposed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionStatus {
    Connecting,
    Live,
    Resyncing {
        /// 1-based snapshot attempt of the current resync.
        attempt: u32,
        cause: Option<SyncError>,
    },
    /// Terminal. Carries the error when closed by failure.
    Closed(Option<SyncError>),
}

impl SubscriptionStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, SubscriptionStatus::Live)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SubscriptionStatus::Closed(_))
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A snapshot at `version` arrived.
    SnapshotLoaded { version: u64 },
    /// Opening the push stream or fetching the snapshot failed.
    SnapshotFailed { error: CallError },
    /// A pushed frame with this sequence arrived.
    PatchReceived { sequence: u64 },
    /// A frame accepted by [`Action::ApplyPatch`] failed to apply.
    PatchRejected { cause: SyncError },
    /// The push stream ended without an unsubscribe.
    StreamEnded,
    /// The last consumer left.
    Unsubscribed,
}

/// What the driver should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Nothing; wait for the next frame.
    Idle,
    /// Apply the frame to the replica.
    ApplyPatch,
    /// Drop the frame.
    Discard,
    /// Reset the replica to the snapshot just loaded.
    InstallSnapshot,
    /// Request a snapshot after `delay`, opening a push stream first if none
    /// is open.
    FetchSnapshot { attempt: u32, delay: Duration },
    /// Stop and release the replica.
    Release,
    /// Stop with a terminal error.
    Fail(SyncError),
}

/// Tracks one subscription's sequence position and state.
#[derive(Debug, Clone)]
pub struct SubscriptionMachine {
    state: SubscriptionState,
    last_seen: u64,
    failures: u32,
    cause: Option<SyncError>,
    terminal: Option<SyncError>,
    policy: RetryPolicy,
}

impl SubscriptionMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: SubscriptionState::Connecting,
            last_seen: 0,
            failures: 0,
            cause: None,
            terminal: None,
            policy,
        }
    }

    /// First action: fetch the initial snapshot.
    pub fn start(&mut self) -> Action {
        self.state = SubscriptionState::Connecting;
        self.failures = 0;
        Action::FetchSnapshot {
            attempt: 1,
            delay: Duration::ZERO,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Sequence of the last applied change (or of the snapshot).
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub fn status(&self) -> SubscriptionStatus {
        match self.state {
            SubscriptionState::Connecting => SubscriptionStatus::Connecting,
            SubscriptionState::Live => SubscriptionStatus::Live,
            SubscriptionState::Resyncing => SubscriptionStatus::Resyncing {
                attempt: self.failures + 1,
                cause: self.cause.clone(),
            },
            SubscriptionState::Closed => SubscriptionStatus::Closed(self.terminal.clone()),
        }
    }

    pub fn handle(&mut self, event: Event) -> Action {
        use SubscriptionState::*;

        match (self.state, event) {
            (Closed, Event::PatchReceived { .. }) => Action::Discard,
            (Closed, event) => {
                debug!(?event, "event after close ignored");
                Action::Idle
            }

            (_, Event::Unsubscribed) => {
                self.state = Closed;
                Action::Release
            }

            (_, Event::SnapshotLoaded { version }) => {
                info!(version, from = ?self.state, "subscription live");
                self.state = Live;
                self.last_seen = version;
                self.failures = 0;
                self.cause = None;
                Action::InstallSnapshot
            }

            (_, Event::SnapshotFailed { error }) => {
                self.failures += 1;
                if self.policy.exhausted(self.failures) {
                    let err = SyncError::ResyncExhausted {
                        attempts: self.failures,
                        last: error,
                    };
                    warn!(error = %err, "closing subscription");
                    self.state = Closed;
                    self.terminal = Some(err.clone());
                    return Action::Fail(err);
                }
                let delay = self.policy.delay(self.failures);
                warn!(%error, failures = self.failures, ?delay, "snapshot failed");
                self.cause = Some(SyncError::Call(error));
                Action::FetchSnapshot {
                    attempt: self.failures + 1,
                    delay,
                }
            }

            (Live, Event::PatchReceived { sequence }) => {
                let expected = self.last_seen + 1;
                if sequence < expected {
                    Action::Discard
                } else if sequence == expected {
                    self.last_seen = sequence;
                    Action::ApplyPatch
                } else {
                    self.begin_resync(SyncError::SequenceGap {
                        expected,
                        got: sequence,
                    })
                }
            }
            (_, Event::PatchReceived { .. }) => Action::Discard,

            (Live, Event::PatchRejected { cause }) => self.begin_resync(cause),
            (_, Event::PatchRejected { .. }) => Action::Idle,

            (_, Event::StreamEnded) => self.begin_resync(SyncError::StreamEnded),
        }
    }

    fn begin_resync(&mut self, cause: SyncError) -> Action {
        warn!(%cause, last_seen = self.last_seen, "resyncing");
        self.state = SubscriptionState::Resyncing;
        self.failures = 0;
        self.cause = Some(cause);
        Action::FetchSnapshot {
            attempt: 1,
            delay: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn live_at(version: u64) -> SubscriptionMachine {
        let mut m = SubscriptionMachine::new(RetryPolicy::default());
        m.start();
        assert_eq!(m.handle(Event::SnapshotLoaded { version }), Action::InstallSnapshot);
        m
    }

    fn transport_down() -> CallError {
        CallError::Transport("down".into())
    }

    #[test]
    fn test_start_fetches_snapshot() {
        let mut m = SubscriptionMachine::new(RetryPolicy::default());
        assert_eq!(
            m.start(),
            Action::FetchSnapshot {
                attempt: 1,
                delay: Duration::ZERO
            }
        );
        assert_eq!(m.status(), SubscriptionStatus::Connecting);
    }

    #[test]
    fn test_in_order_patches_apply() {
        let mut m = live_at(1);
        assert_eq!(m.handle(Event::PatchReceived { sequence: 2 }), Action::ApplyPatch);
        assert_eq!(m.handle(Event::PatchReceived { sequence: 3 }), Action::ApplyPatch);
        assert_eq!(m.last_seen(), 3);
    }

    #[test]
    fn test_duplicate_discarded() {
        let mut m = live_at(1);
        m.handle(Event::PatchReceived { sequence: 2 });
        assert_eq!(m.handle(Event::PatchReceived { sequence: 2 }), Action::Discard);
        assert_eq!(m.handle(Event::PatchReceived { sequence: 1 }), Action::Discard);
        assert_eq!(m.last_seen(), 2);
        assert_eq!(m.state(), SubscriptionState::Live);
    }

    #[test]
    fn test_gap_forces_resync() {
        let mut m = live_at(1);
        assert_eq!(
            m.handle(Event::PatchReceived { sequence: 3 }),
            Action::FetchSnapshot {
                attempt: 1,
                delay: Duration::ZERO
            }
        );
        assert_eq!(
            m.status(),
            SubscriptionStatus::Resyncing {
                attempt: 1,
                cause: Some(SyncError::SequenceGap {
                    expected: 2,
                    got: 3
                }),
            }
        );

        // Frames are dropped until the snapshot lands.
        assert_eq!(m.handle(Event::PatchReceived { sequence: 4 }), Action::Discard);
        assert_eq!(m.handle(Event::SnapshotLoaded { version: 5 }), Action::InstallSnapshot);
        assert_eq!(m.last_seen(), 5);
        assert_eq!(m.handle(Event::PatchReceived { sequence: 5 }), Action::Discard);
        assert_eq!(m.handle(Event::PatchReceived { sequence: 6 }), Action::ApplyPatch);
    }

    #[test]
    fn test_rejected_patch_resyncs() {
        let mut m = live_at(1);
        m.handle(Event::PatchReceived { sequence: 2 });
        let action = m.handle(Event::PatchRejected {
            cause: SyncError::InvalidMessage("bad".into()),
        });
        assert!(matches!(action, Action::FetchSnapshot { attempt: 1, .. }));
        assert_eq!(m.state(), SubscriptionState::Resyncing);
    }

    #[test]
    fn test_stream_end_resyncs() {
        let mut m = live_at(1);
        assert!(matches!(m.handle(Event::StreamEnded), Action::FetchSnapshot { .. }));
        assert_eq!(m.state(), SubscriptionState::Resyncing);
    }

    #[test]
    fn test_backoff_until_exhausted() {
        let policy = RetryPolicy::default()
            .with_initial(Duration::from_millis(10))
            .with_max_attempts(3);
        let mut m = SubscriptionMachine::new(policy);
        m.start();

        assert_eq!(
            m.handle(Event::SnapshotFailed { error: transport_down() }),
            Action::FetchSnapshot {
                attempt: 2,
                delay: Duration::from_millis(10)
            }
        );
        assert_eq!(
            m.handle(Event::SnapshotFailed { error: transport_down() }),
            Action::FetchSnapshot {
                attempt: 3,
                delay: Duration::from_millis(20)
            }
        );
        let expected = SyncError::ResyncExhausted {
            attempts: 3,
            last: transport_down(),
        };
        assert_eq!(
            m.handle(Event::SnapshotFailed { error: transport_down() }),
            Action::Fail(expected.clone())
        );
        assert_eq!(m.status(), SubscriptionStatus::Closed(Some(expected)));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let policy = RetryPolicy::default().with_max_attempts(2);
        let mut m = SubscriptionMachine::new(policy);
        m.start();
        m.handle(Event::SnapshotFailed { error: transport_down() });
        m.handle(Event::SnapshotLoaded { version: 1 });
        m.handle(Event::StreamEnded);
        assert!(matches!(
            m.handle(Event::SnapshotFailed { error: transport_down() }),
            Action::FetchSnapshot { attempt: 2, .. }
        ));
    }

    #[test]
    fn test_unsubscribe_releases_and_discards_late_snapshot() {
        let mut m = SubscriptionMachine::new(RetryPolicy::default());
        m.start();
        assert_eq!(m.handle(Event::Unsubscribed), Action::Release);
        assert_eq!(m.handle(Event::SnapshotLoaded { version: 9 }), Action::Idle);
        assert_eq!(m.handle(Event::PatchReceived { sequence: 10 }), Action::Discard);
        assert_eq!(m.status(), SubscriptionStatus::Closed(None));
    }

    proptest! {
        #[test]
        fn prop_duplicates_never_advance(
            start in 0u64..1000,
            seqs in proptest::collection::vec(0u64..1000, 0..50),
        ) {
            let mut m = live_at(start);
            for seq in seqs.into_iter().filter(|s| *s <= start) {
                prop_assert_eq!(m.handle(Event::PatchReceived { sequence: seq }), Action::Discard);
            }
            prop_assert_eq!(m.last_seen(), start);
            prop_assert_eq!(m.state(), SubscriptionState::Live);
        }
    }
}
