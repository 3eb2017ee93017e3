//! Collaborator trait definitions.
//!
//! Device actions hold their collaborators as `Arc<dyn InternalApi>`, so the
//! traits here must be object-safe. Native `async fn` in traits (Edition 2024
//! RPITIT) is not, which is why the asynchronous methods return a
//! [`BoxFuture`] instead.

use dmk_core::{CommandResponse, CommandResult, DeviceCommand, DeviceSessionState};
use futures::future::BoxFuture;
use tokio::sync::watch;

/// Sends OS commands to a device.
///
/// Implementations own the transport and the APDU codec. They classify
/// failures into [`CommandError`](dmk_core::CommandError) values; in
/// particular a transport lost after the command was handed over must be
/// reported as `DisconnectedWhileSending`.
pub trait CommandChannel: Send + Sync {
    /// Send one command and wait for its decoded response.
    fn send_command(&self, command: DeviceCommand) -> BoxFuture<'_, CommandResult<CommandResponse>>;
}

/// Everything a device action may ask of its environment.
///
/// # Example
///
/// ```
/// use dmk_core::{DeviceCommand, DeviceStatus};
/// use dmk_device::InternalApi;
/// use dmk_device::mock::{MockDevice, MockDeviceConfig};
/// use std::sync::Arc;
///
/// async fn running_app_name(api: Arc<dyn InternalApi>) -> Option<String> {
///     let response = api.send_command(DeviceCommand::GetAppAndVersion).await.ok()?;
///     response.into_app_and_version().ok().map(|app| app.name)
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let (device, _handle) = MockDevice::new(MockDeviceConfig::default());
///     assert_eq!(running_app_name(device.into_api()).await.as_deref(), Some("BOLOS"));
/// }
/// ```
pub trait InternalApi: Send + Sync {
    /// Send one command through the session's command channel.
    fn send_command(&self, command: DeviceCommand) -> BoxFuture<'_, CommandResult<CommandResponse>>;

    /// Snapshot of the current session state.
    fn get_session_state(&self) -> DeviceSessionState;

    /// Subscribe to session state changes.
    ///
    /// The returned receiver sees the current value immediately and every
    /// later replacement. Dropping it releases the subscription.
    fn session_state_stream(&self) -> watch::Receiver<DeviceSessionState>;

    /// Replace the session state, returning the stored value.
    fn set_session_state(&self, state: DeviceSessionState) -> DeviceSessionState;
}
