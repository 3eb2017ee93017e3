//! Execution handle and progress stream of a running device action.
//!
//! Every execution owns a replaying multicast channel of [`Snapshot`]s:
//!
//! ```text
//!                         ┌──────────────────┐
//! ┌─────────────┐ publish │ emitted history  │ replay + live ┌────────────────┐
//! │ Interpreter │────────►│ subscribers      │──────────────►│ SnapshotStream │
//! │ task        │         │ closed flag      │               └────────────────┘
//! └─────────────┘         └──────────────────┘
//!                                  ▲
//!                                  │ Stopped
//!                           cancel()
//! ```
//!
//! The first terminal snapshot closes the channel. Whatever comes second,
//! the interpreter's outcome or a cancellation, is discarded, so each
//! execution ends exactly once.

use dmk_core::DeviceActionError;
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};
use uuid::Uuid;

use crate::snapshot::Snapshot;

struct Channel<O> {
    emitted: Vec<Snapshot<O>>,
    subscribers: Vec<mpsc::UnboundedSender<Snapshot<O>>>,
    closed: bool,
}

/// Publishing half of an execution's snapshot channel.
pub(crate) struct Publisher<O> {
    channel: Arc<Mutex<Channel<O>>>,
}

impl<O> Clone for Publisher<O> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<O: Clone> Publisher<O> {
    fn new() -> Self {
        Self {
            channel: Arc::new(Mutex::new(Channel {
                emitted: Vec::new(),
                subscribers: Vec::new(),
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Channel<O>> {
        self.channel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a snapshot to every subscriber.
    ///
    /// Returns `false`, dropping the snapshot, once a terminal snapshot has
    /// been published.
    pub(crate) fn publish(&self, snapshot: Snapshot<O>) -> bool {
        let mut channel = self.lock();
        if channel.closed {
            return false;
        }

        let terminal = snapshot.is_terminal();
        channel
            .subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
        channel.emitted.push(snapshot);

        if terminal {
            channel.closed = true;
            channel.subscribers.clear();
        }
        true
    }

    fn subscribe(&self) -> SnapshotStream<O> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channel = self.lock();
        for snapshot in &channel.emitted {
            // The receiver is alive in this scope.
            let _ = tx.send(snapshot.clone());
        }
        if !channel.closed {
            channel.subscribers.push(tx);
        }
        SnapshotStream { rx }
    }

    fn current(&self) -> Snapshot<O> {
        self.lock()
            .emitted
            .last()
            .cloned()
            .unwrap_or(Snapshot::NotStarted)
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Stream of snapshots of one execution.
///
/// Starts with every snapshot published before the subscription, then
/// follows live. Ends after the terminal snapshot.
#[derive(Debug)]
pub struct SnapshotStream<O> {
    rx: mpsc::UnboundedReceiver<Snapshot<O>>,
}

impl<O> SnapshotStream<O> {
    /// Receive the next snapshot, or `None` once the terminal one was seen.
    pub async fn recv(&mut self) -> Option<Snapshot<O>> {
        self.rx.recv().await
    }

    /// Drain the stream and return every snapshot it yields.
    pub async fn collect_all(mut self) -> Vec<Snapshot<O>> {
        let mut snapshots = Vec::new();
        while let Some(snapshot) = self.rx.recv().await {
            snapshots.push(snapshot);
        }
        snapshots
    }
}

impl<O> Stream for SnapshotStream<O> {
    type Item = Snapshot<O>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Handle on a running device action.
///
/// Cloning the handle yields another handle on the same execution.
/// Dropping every handle does not stop the execution; call
/// [`cancel`](DeviceActionExecution::cancel).
///
/// # Examples
///
/// ```
/// use dmk_action::DeviceAction;
/// use dmk_action::os::get_device_status::{GetDeviceStatusDeviceAction, GetDeviceStatusInput};
/// use dmk_device::mock::{MockDevice, MockDeviceConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let (device, _handle) = MockDevice::new(MockDeviceConfig::default());
///     let action = GetDeviceStatusDeviceAction::new(GetDeviceStatusInput::default());
///
///     let execution = action.execute(device.into_api());
///     let last = execution.subscribe().collect_all().await.pop().unwrap();
///
///     assert_eq!(last.output().unwrap().current_app, "BOLOS");
///     assert!(execution.is_finished());
/// }
/// ```
pub struct DeviceActionExecution<O> {
    id: Uuid,
    action: &'static str,
    publisher: Publisher<O>,
    token: CancellationToken,
}

impl<O> Clone for DeviceActionExecution<O> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            action: self.action,
            publisher: self.publisher.clone(),
            token: self.token.clone(),
        }
    }
}

impl<O> std::fmt::Debug for DeviceActionExecution<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceActionExecution")
            .field("id", &self.id)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

impl<O: Clone> DeviceActionExecution<O> {
    pub(crate) fn new(action: &'static str) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            publisher: Publisher::new(),
            token: CancellationToken::new(),
        }
    }

    /// An execution that failed before it could start.
    pub(crate) fn failed(action: &'static str, error: DeviceActionError) -> Self {
        let execution = Self::new(action);
        execution.publisher.publish(Snapshot::Error { error });
        execution
    }

    /// Identifier used to correlate the execution's log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the device action being executed.
    pub fn action(&self) -> &'static str {
        self.action
    }

    /// Subscribe to the execution's snapshots, replaying those already
    /// published.
    pub fn subscribe(&self) -> SnapshotStream<O> {
        self.publisher.subscribe()
    }

    /// Last published snapshot, or `NotStarted`.
    pub fn current(&self) -> Snapshot<O> {
        self.publisher.current()
    }

    /// Returns `true` once a terminal snapshot has been published.
    pub fn is_finished(&self) -> bool {
        self.publisher.is_closed()
    }

    /// Wait for the terminal snapshot.
    pub async fn outcome(&self) -> Snapshot<O> {
        let mut stream = self.subscribe();
        let mut last = Snapshot::NotStarted;
        while let Some(snapshot) = stream.recv().await {
            last = snapshot;
        }
        last
    }

    /// Stop the execution.
    ///
    /// Aborts the in-flight actor, then publishes `Stopped` unless the
    /// execution already ended. Calling it again has no effect.
    pub fn cancel(&self) {
        // Subscribers must never see `Stopped` while an actor can still start.
        self.token.cancel();
        if self.publisher.publish(Snapshot::Stopped) {
            info!(
                action = self.action,
                execution_id = %self.id,
                "Device action cancelled"
            );
        } else {
            trace!(
                action = self.action,
                execution_id = %self.id,
                "Cancel ignored, execution already ended"
            );
        }
    }

    pub(crate) fn publisher(&self) -> Publisher<O> {
        self.publisher.clone()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
