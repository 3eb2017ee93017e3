//! Binding of a command channel to a session state store.

use dmk_core::{CommandResponse, CommandResult, DeviceCommand, DeviceSessionState};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::session::SessionStateStore;
use crate::traits::{CommandChannel, InternalApi};

/// One live session with a device.
///
/// Implements [`InternalApi`] by forwarding commands to its channel and
/// session state operations to its store.
#[derive(Clone)]
pub struct DeviceSession {
    channel: Arc<dyn CommandChannel>,
    store: SessionStateStore,
}

impl DeviceSession {
    pub fn new(channel: impl CommandChannel + 'static, store: SessionStateStore) -> Self {
        Self {
            channel: Arc::new(channel),
            store,
        }
    }

    /// The session's state store.
    pub fn store(&self) -> &SessionStateStore {
        &self.store
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("state", &self.store.get())
            .finish_non_exhaustive()
    }
}

impl InternalApi for DeviceSession {
    fn send_command(&self, command: DeviceCommand) -> BoxFuture<'_, CommandResult<CommandResponse>> {
        Box::pin(async move {
            debug!(command = %command, "Sending command");
            let result = self.channel.send_command(command.clone()).await;
            match &result {
                Ok(response) => debug!(command = %command, ?response, "Command succeeded"),
                Err(e) => warn!(command = %command, error = %e, "Command failed"),
            }
            result
        })
    }

    fn get_session_state(&self) -> DeviceSessionState {
        self.store.get()
    }

    fn session_state_stream(&self) -> watch::Receiver<DeviceSessionState> {
        self.store.subscribe()
    }

    fn set_session_state(&self, state: DeviceSessionState) -> DeviceSessionState {
        self.store.set(state)
    }
}
