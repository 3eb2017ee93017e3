//! Observable session state store.

use dmk_core::DeviceSessionState;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

/// Holds the last known [`DeviceSessionState`] of one device session.
///
/// Reads and writes replace the whole value; the last writer wins. Every
/// replacement is broadcast to the receivers returned by [`subscribe`].
/// Cloning the store yields another handle to the same state.
///
/// [`subscribe`]: SessionStateStore::subscribe
#[derive(Debug, Clone)]
pub struct SessionStateStore {
    tx: Arc<watch::Sender<DeviceSessionState>>,
}

impl SessionStateStore {
    pub fn new(initial: DeviceSessionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    pub fn get(&self) -> DeviceSessionState {
        self.tx.borrow().clone()
    }

    /// Replace the state and return the stored value.
    ///
    /// Succeeds whether or not anybody is subscribed.
    pub fn set(&self, state: DeviceSessionState) -> DeviceSessionState {
        trace!(
            status = %state.device_status(),
            ready = state.is_ready(),
            "Session state replaced"
        );
        self.tx.send_replace(state.clone());
        state
    }

    /// Read-modify-write on the latest value.
    pub fn update<F>(&self, modify: F) -> DeviceSessionState
    where
        F: FnOnce(&mut DeviceSessionState),
    {
        self.tx.send_modify(modify);
        self.get()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<DeviceSessionState> {
        self.tx.subscribe()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
