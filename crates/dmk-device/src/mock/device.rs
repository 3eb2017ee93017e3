//! Mock device implementation.

use dmk_core::constants::{DASHBOARD_APP_NAME, STATUS_CLA_NOT_SUPPORTED, STATUS_UNKNOWN_APPLICATION};
use dmk_core::{
    CommandError, CommandResponse, CommandResult, DeviceCommand, DeviceModelId, DeviceSessionState,
    DeviceStatus, RunningApp,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::device_session::DeviceSession;
use crate::session::SessionStateStore;
use crate::traits::{CommandChannel, InternalApi};

/// Initial configuration of a [`MockDevice`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockDeviceConfig {
    /// Device model reported in the session state.
    pub model: DeviceModelId,

    /// Whether the device starts locked.
    pub locked: bool,

    /// Application running when the session starts.
    pub current_app: RunningApp,

    /// Applications that can be opened from the dashboard.
    pub installed_apps: Vec<RunningApp>,

    /// Whether the session starts in a ready state (running app known).
    pub session_ready: bool,

    /// Simulated time the device takes to answer each command.
    pub latency: Duration,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            model: DeviceModelId::NanoX,
            locked: false,
            current_app: RunningApp::new(DASHBOARD_APP_NAME, "1.0.0"),
            installed_apps: vec![
                RunningApp::new("Bitcoin", "2.1.0"),
                RunningApp::new("Ethereum", "1.10.0"),
            ],
            session_ready: true,
            latency: Duration::ZERO,
        }
    }
}

impl MockDeviceConfig {
    pub fn with_model(mut self, model: DeviceModelId) -> Self {
        self.model = model;
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    pub fn with_current_app(mut self, app: RunningApp) -> Self {
        self.current_app = app;
        self
    }

    pub fn with_installed_app(mut self, app: RunningApp) -> Self {
        self.installed_apps.push(app);
        self
    }

    pub fn with_session_ready(mut self, ready: bool) -> Self {
        self.session_ready = ready;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn initial_session_state(&self) -> DeviceSessionState {
        let status = if self.locked {
            DeviceStatus::Locked
        } else {
            DeviceStatus::Connected
        };
        if self.session_ready {
            DeviceSessionState::ready(status, self.model, self.current_app.clone())
        } else {
            DeviceSessionState::connected(status, self.model)
        }
    }
}

/// Reply forced onto the next command of a given kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Fail without touching the simulated device.
    Fail(CommandError),

    /// Apply the command's effect, then report the error.
    ///
    /// Models a transport that drops after the device executed the command,
    /// e.g. an application that relaunches the USB stack when it starts.
    ApplyThenFail(CommandError),
}

#[derive(Debug)]
struct DeviceModel {
    locked: bool,
    current_app: RunningApp,
    dashboard_version: String,
    installed_apps: Vec<RunningApp>,
    scripted: HashMap<&'static str, VecDeque<ScriptedReply>>,
    sent: Vec<DeviceCommand>,
}

impl DeviceModel {
    fn apply(&mut self, command: &DeviceCommand) -> CommandResult<CommandResponse> {
        if self.locked {
            return Err(CommandError::device_locked());
        }

        match command {
            DeviceCommand::GetAppAndVersion => {
                Ok(CommandResponse::AppAndVersion(self.current_app.clone()))
            }
            DeviceCommand::OpenApp { app_name } => {
                if !self.current_app.is_dashboard() {
                    return Err(CommandError::device(
                        STATUS_CLA_NOT_SUPPORTED,
                        "Open application is only available from the dashboard",
                    ));
                }
                let app = self
                    .installed_apps
                    .iter()
                    .find(|app| &app.name == app_name)
                    .cloned()
                    .ok_or_else(|| {
                        CommandError::device(
                            STATUS_UNKNOWN_APPLICATION,
                            format!("Application {app_name} is not installed"),
                        )
                    })?;
                self.current_app = app;
                Ok(CommandResponse::Ack)
            }
            DeviceCommand::CloseApp => {
                self.current_app =
                    RunningApp::new(DASHBOARD_APP_NAME, self.dashboard_version.clone());
                Ok(CommandResponse::Ack)
            }
        }
    }

    fn handle(&mut self, command: DeviceCommand) -> CommandResult<CommandResponse> {
        let scripted = self
            .scripted
            .get_mut(command.name())
            .and_then(VecDeque::pop_front);
        self.sent.push(command.clone());

        match scripted {
            Some(ScriptedReply::Fail(error)) => Err(error),
            Some(ScriptedReply::ApplyThenFail(error)) => {
                self.apply(&command)?;
                Err(error)
            }
            None => self.apply(&command),
        }
    }
}

type Shared = Arc<Mutex<DeviceModel>>;

fn guard(shared: &Shared) -> MutexGuard<'_, DeviceModel> {
    // A poisoned lock still holds a usable model.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Simulated device implementing [`CommandChannel`].
///
/// # Examples
///
/// ```
/// use dmk_core::{DeviceCommand, DeviceStatus};
/// use dmk_device::mock::{MockDevice, MockDeviceConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let (device, handle) = MockDevice::new(MockDeviceConfig::default().with_locked(true));
///     let api = device.into_api();
///
///     let locked = api.send_command(DeviceCommand::GetAppAndVersion).await;
///     assert!(locked.unwrap_err().is_device_locked());
///
///     handle.unlock();
///     assert_eq!(api.get_session_state().device_status(), DeviceStatus::Connected);
///     assert!(api.send_command(DeviceCommand::GetAppAndVersion).await.is_ok());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockDevice {
    model: Shared,
    store: SessionStateStore,
    latency: Duration,
}

impl MockDevice {
    /// Create a simulated device and the handle steering it.
    pub fn new(config: MockDeviceConfig) -> (Self, MockDeviceHandle) {
        let store = SessionStateStore::new(config.initial_session_state());
        let dashboard_version = if config.current_app.is_dashboard() {
            config.current_app.version.clone()
        } else {
            "1.0.0".to_string()
        };
        let model = Arc::new(Mutex::new(DeviceModel {
            locked: config.locked,
            current_app: config.current_app,
            dashboard_version,
            installed_apps: config.installed_apps,
            scripted: HashMap::new(),
            sent: Vec::new(),
        }));

        let device = Self {
            model: model.clone(),
            store: store.clone(),
            latency: config.latency,
        };
        let handle = MockDeviceHandle { model, store };

        (device, handle)
    }

    /// Session state store the device reports its lock state to.
    pub fn store(&self) -> &SessionStateStore {
        &self.store
    }

    /// Wrap the device in a [`DeviceSession`] bound to its own store.
    pub fn into_session(self) -> DeviceSession {
        let store = self.store.clone();
        DeviceSession::new(self, store)
    }

    /// Wrap the device in a session and erase its type.
    pub fn into_api(self) -> Arc<dyn InternalApi> {
        Arc::new(self.into_session())
    }
}

impl CommandChannel for MockDevice {
    fn send_command(&self, command: DeviceCommand) -> BoxFuture<'_, CommandResult<CommandResponse>> {
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let result = guard(&self.model).handle(command.clone());
            debug!(command = %command, ok = result.is_ok(), "Mock device answered");
            result
        })
    }
}

/// Handle for steering a [`MockDevice`].
///
/// Cloneable and usable from any task.
#[derive(Debug, Clone)]
pub struct MockDeviceHandle {
    model: Shared,
    store: SessionStateStore,
}

impl MockDeviceHandle {
    /// Simulate the user entering the PIN.
    pub fn unlock(&self) {
        guard(&self.model).locked = false;
        self.store
            .update(|state| *state = state.clone().with_device_status(DeviceStatus::Connected));
    }

    /// Simulate the device locking itself.
    pub fn lock(&self) {
        guard(&self.model).locked = true;
        self.store
            .update(|state| *state = state.clone().with_device_status(DeviceStatus::Locked));
    }

    pub fn is_locked(&self) -> bool {
        guard(&self.model).locked
    }

    /// Application the simulated device is running.
    pub fn current_app(&self) -> RunningApp {
        guard(&self.model).current_app.clone()
    }

    /// Force the running application without going through commands.
    pub fn set_current_app(&self, app: RunningApp) {
        guard(&self.model).current_app = app;
    }

    /// Force the reply to the next command of the same kind as `command`.
    ///
    /// Replies queue up per command kind and are consumed in order.
    pub fn script(&self, command: &DeviceCommand, reply: ScriptedReply) {
        guard(&self.model)
            .scripted
            .entry(command.name())
            .or_default()
            .push_back(reply);
    }

    /// Every command received so far, in order.
    pub fn sent_commands(&self) -> Vec<DeviceCommand> {
        guard(&self.model).sent.clone()
    }

    /// Session state store shared with the device.
    pub fn store(&self) -> &SessionStateStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmk_core::constants::STATUS_DEVICE_LOCKED;
    use rstest::rstest;

    #[tokio::test]
    async fn test_get_app_and_version() {
        let (device, handle) = MockDevice::new(MockDeviceConfig::default());

        let response = device
            .send_command(DeviceCommand::GetAppAndVersion)
            .await
            .unwrap();

        assert_eq!(
            response,
            CommandResponse::AppAndVersion(RunningApp::new("BOLOS", "1.0.0"))
        );
        assert_eq!(handle.sent_commands(), vec![DeviceCommand::GetAppAndVersion]);
    }

    #[tokio::test]
    async fn test_locked_device_rejects_commands() {
        let (device, handle) = MockDevice::new(MockDeviceConfig::default().with_locked(true));

        let err = device
            .send_command(DeviceCommand::CloseApp)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(STATUS_DEVICE_LOCKED));
        assert_eq!(device.store().get().device_status(), DeviceStatus::Locked);

        handle.unlock();
        assert!(!handle.is_locked());
        assert_eq!(device.store().get().device_status(), DeviceStatus::Connected);
        assert!(device.send_command(DeviceCommand::CloseApp).await.is_ok());
    }

    #[tokio::test]
    async fn test_open_then_close_app() {
        let (device, handle) = MockDevice::new(MockDeviceConfig::default());

        device
            .send_command(DeviceCommand::open_app("Bitcoin"))
            .await
            .unwrap();
        assert_eq!(handle.current_app(), RunningApp::new("Bitcoin", "2.1.0"));

        device.send_command(DeviceCommand::CloseApp).await.unwrap();
        assert_eq!(handle.current_app(), RunningApp::new("BOLOS", "1.0.0"));
    }

    #[rstest]
    #[case("Solana", STATUS_UNKNOWN_APPLICATION)]
    #[case("", STATUS_UNKNOWN_APPLICATION)]
    #[tokio::test]
    async fn test_open_unknown_app(#[case] app_name: &str, #[case] expected_status: u16) {
        let (device, handle) = MockDevice::new(MockDeviceConfig::default());

        let err = device
            .send_command(DeviceCommand::open_app(app_name))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(expected_status));
        assert!(handle.current_app().is_dashboard());
    }

    #[tokio::test]
    async fn test_open_app_outside_dashboard() {
        let config =
            MockDeviceConfig::default().with_current_app(RunningApp::new("Ethereum", "1.10.0"));
        let (device, _handle) = MockDevice::new(config);

        let err = device
            .send_command(DeviceCommand::open_app("Bitcoin"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(STATUS_CLA_NOT_SUPPORTED));
    }

    #[tokio::test]
    async fn test_scripted_replies_are_consumed_in_order() {
        let (device, handle) = MockDevice::new(MockDeviceConfig::default());
        handle.script(
            &DeviceCommand::GetAppAndVersion,
            ScriptedReply::Fail(CommandError::transport("stall")),
        );

        let first = device.send_command(DeviceCommand::GetAppAndVersion).await;
        let second = device.send_command(DeviceCommand::GetAppAndVersion).await;

        assert_eq!(first, Err(CommandError::transport("stall")));
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_apply_then_fail() {
        let (device, handle) = MockDevice::new(MockDeviceConfig::default());
        handle.script(
            &DeviceCommand::open_app("Bitcoin"),
            ScriptedReply::ApplyThenFail(CommandError::DisconnectedWhileSending),
        );

        let err = device
            .send_command(DeviceCommand::open_app("Bitcoin"))
            .await
            .unwrap_err();

        assert!(err.is_disconnected_while_sending());
        assert_eq!(handle.current_app().name, "Bitcoin");
    }

    #[test]
    fn test_initial_session_state() {
        let (device, _handle) = MockDevice::new(
            MockDeviceConfig::default()
                .with_session_ready(false)
                .with_locked(true),
        );
        let state = device.store().get();
        assert!(!state.is_ready());
        assert_eq!(state.device_status(), DeviceStatus::Locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_simulated() {
        let config = MockDeviceConfig::default().with_latency(Duration::from_millis(200));
        let (device, _handle) = MockDevice::new(config);

        let start = tokio::time::Instant::now();
        device
            .send_command(DeviceCommand::GetAppAndVersion)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
