//! Async driver for one subscription.
//!
//! The driver owns the push stream and feeds the [`SubscriptionMachine`],
//! executing whatever it asks for against the transport and the replica.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use deltasync_core::ResourceKey;
use deltasync_replica::{RegistryEntry, ReplicaError, ReplicaHandle};

use crate::backoff::RetryPolicy;
use crate::error::{CallError, SyncError};
use crate::machine::{Action, Event, SubscriptionMachine, SubscriptionStatus};
use crate::messages::PushFrame;
use crate::transport::Transport;

/// Handle to a running subscription driver.
///
/// Clones share the same driver. The driver stops on [`close`](Self::close)
/// or when every handle is dropped.
#[derive(Clone)]
pub struct SubscriptionHandle {
    replica: ReplicaHandle,
    status: watch::Receiver<SubscriptionStatus>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SubscriptionHandle {
    /// Spawn a driver that keeps `replica` current.
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        replica: ReplicaHandle,
        policy: RetryPolicy,
    ) -> Self {
        let machine = SubscriptionMachine::new(policy);
        let (status_tx, status) = watch::channel(machine.status());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let driver = Driver {
            key: replica.key().clone(),
            transport,
            replica: replica.clone(),
            machine,
            status: status_tx,
            shutdown: shutdown_rx,
        };
        tokio::spawn(driver.run());

        Self {
            replica,
            status,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn key(&self) -> &ResourceKey {
        self.replica.key()
    }

    pub fn replica(&self) -> &ReplicaHandle {
        &self.replica
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status.clone()
    }

    /// Ask the driver to stop. An in-flight snapshot fetch runs to
    /// completion and its result is dropped.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait until the status satisfies `done`, returning that status.
    ///
    /// Returns the last known status if the driver is gone.
    pub async fn wait_until(&self, done: impl Fn(&SubscriptionStatus) -> bool) -> SubscriptionStatus {
        let mut rx = self.status.clone();
        loop {
            {
                let status = rx.borrow_and_update();
                if done(&status) {
                    return status.clone();
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Wait until the subscription is live.
    pub async fn wait_live(&self) -> Result<(), SyncError> {
        match self.wait_until(|s| s.is_live() || s.is_closed()).await {
            SubscriptionStatus::Live => Ok(()),
            SubscriptionStatus::Closed(Some(e)) => Err(e),
            _ => Err(SyncError::Closed),
        }
    }
}

impl RegistryEntry for SubscriptionHandle {
    fn replica(&self) -> &ReplicaHandle {
        &self.replica
    }

    fn is_retired(&self) -> bool {
        self.status.borrow().is_closed()
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", self.key())
            .field("status", &*self.status.borrow())
            .finish()
    }
}

struct Driver {
    key: ResourceKey,
    transport: Arc<dyn Transport>,
    replica: ReplicaHandle,
    machine: SubscriptionMachine,
    status: watch::Sender<SubscriptionStatus>,
    shutdown: watch::Receiver<bool>,
}

impl Driver {
    async fn run(mut self) {
        let mut stream: Option<mpsc::Receiver<PushFrame>> = None;
        let mut action = self.machine.start();
        loop {
            self.publish();
            action = match action {
                Action::FetchSnapshot { attempt, delay } => {
                    self.fetch(&mut stream, attempt, delay).await
                }
                Action::Release => {
                    info!(key = %self.key, "subscription closed");
                    break;
                }
                Action::Fail(error) => {
                    warn!(key = %self.key, %error, "subscription failed");
                    break;
                }
                Action::Idle | Action::Discard | Action::ApplyPatch | Action::InstallSnapshot => {
                    self.next_frame(&mut stream).await
                }
            };
        }
        self.publish();
    }

    async fn fetch(
        &mut self,
        stream: &mut Option<mpsc::Receiver<PushFrame>>,
        attempt: u32,
        delay: Duration,
    ) -> Action {
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut self.shutdown) => {
                    return self.machine.handle(Event::Unsubscribed);
                }
            }
        }

        // Open the stream first so nothing published after the snapshot is missed.
        if stream.is_none() {
            match self.transport.open_push(&self.key).await {
                Ok(rx) => *stream = Some(rx),
                Err(error) => return self.machine.handle(Event::SnapshotFailed { error }),
            }
        }

        debug!(key = %self.key, attempt, "fetching snapshot");
        let transport = Arc::clone(&self.transport);
        let key = self.key.clone();
        let fetch = tokio::spawn(async move { transport.fetch_snapshot(&key).await });

        let result = tokio::select! {
            joined = fetch => joined.unwrap_or_else(|e| Err(CallError::Transport(e.to_string()))),
            _ = shutdown_requested(&mut self.shutdown) => {
                return self.machine.handle(Event::Unsubscribed);
            }
        };

        match result {
            Ok(snapshot) => {
                let version = snapshot.version;
                match self.machine.handle(Event::SnapshotLoaded { version }) {
                    Action::InstallSnapshot => {
                        self.replica.update(|r| r.reset(version, snapshot.state));
                        Action::Idle
                    }
                    other => other,
                }
            }
            Err(error) => self.machine.handle(Event::SnapshotFailed { error }),
        }
    }

    async fn next_frame(&mut self, stream: &mut Option<mpsc::Receiver<PushFrame>>) -> Action {
        let Some(rx) = stream.as_mut() else {
            return self.machine.handle(Event::StreamEnded);
        };

        let frame = tokio::select! {
            frame = rx.recv() => frame,
            _ = shutdown_requested(&mut self.shutdown) => {
                return self.machine.handle(Event::Unsubscribed);
            }
        };

        let Some(frame) = frame else {
            *stream = None;
            return self.machine.handle(Event::StreamEnded);
        };

        match self.machine.handle(Event::PatchReceived { sequence: frame.sequence }) {
            Action::ApplyPatch => {
                if let Err(reason) = frame.validate_limits() {
                    warn!(key = %self.key, sequence = frame.sequence, reason, "frame rejected");
                    let cause = SyncError::InvalidMessage(reason.into());
                    return self.machine.handle(Event::PatchRejected { cause });
                }
                let applied = self
                    .replica
                    .update(|r| r.apply_confirmed(frame.sequence, &frame.patch, frame.mutation_id));
                match applied {
                    Ok(()) => Action::Idle,
                    Err(error) => {
                        let cause = match error {
                            ReplicaError::Patch(conflict) => SyncError::PatchConflict(conflict),
                            other => SyncError::InvalidMessage(other.to_string()),
                        };
                        self.machine.handle(Event::PatchRejected { cause })
                    }
                }
            }
            Action::Discard => {
                debug!(key = %self.key, sequence = frame.sequence, "frame discarded");
                Action::Idle
            }
            other => other,
        }
    }

    fn publish(&self) {
        let next = self.machine.status();
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Resolves once shutdown is requested or every handle is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
