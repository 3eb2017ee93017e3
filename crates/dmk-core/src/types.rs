use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::is_dashboard_name;

/// Connection status of a device, as tracked by its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    /// Connected and unlocked.
    Connected,
    /// Connected but waiting for the PIN.
    Locked,
    /// Connected and processing a command.
    Busy,
    /// Transport lost.
    NotConnected,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let status = match self {
            DeviceStatus::Connected => "CONNECTED",
            DeviceStatus::Locked => "LOCKED",
            DeviceStatus::Busy => "BUSY",
            DeviceStatus::NotConnected => "NOT CONNECTED",
        };
        write!(f, "{status}")
    }
}

/// Hardware model of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceModelId {
    NanoS,
    NanoSP,
    NanoX,
    Stax,
    Flex,
}

/// Application currently running on a device, as reported by the
/// get-app-and-version command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunningApp {
    pub name: String,
    pub version: String,
}

impl RunningApp {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Returns `true` if the running application is the dashboard.
    #[must_use]
    pub fn is_dashboard(&self) -> bool {
        is_dashboard_name(&self.name)
    }
}

impl fmt::Display for RunningApp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Session state of a device that is connected but whose running
/// application has not been read yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedState {
    pub device_status: DeviceStatus,
    pub device_model_id: DeviceModelId,
    pub device_name: Option<String>,
}

/// Session state of a device whose running application is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyState {
    pub device_status: DeviceStatus,
    pub device_model_id: DeviceModelId,
    pub device_name: Option<String>,
    pub current_app: RunningApp,
    pub installed_apps: Vec<String>,
    pub is_secure_connection_allowed: bool,
}

/// Last known state of a device session.
///
/// The session state is owned by the session and replaced as a whole value;
/// device actions read it, and write back a merged copy of the latest value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "session_state_type", rename_all = "snake_case")]
pub enum DeviceSessionState {
    Connected(ConnectedState),
    ReadyWithoutSecureChannel(ReadyState),
    ReadyWithSecureChannel(ReadyState),
}

impl DeviceSessionState {
    /// Create a connected state with no application information.
    pub fn connected(device_status: DeviceStatus, device_model_id: DeviceModelId) -> Self {
        Self::Connected(ConnectedState {
            device_status,
            device_model_id,
            device_name: None,
        })
    }

    /// Create a ready state (without secure channel) for the given running app.
    pub fn ready(
        device_status: DeviceStatus,
        device_model_id: DeviceModelId,
        current_app: RunningApp,
    ) -> Self {
        Self::ReadyWithoutSecureChannel(ReadyState {
            device_status,
            device_model_id,
            device_name: None,
            current_app,
            installed_apps: Vec::new(),
            is_secure_connection_allowed: false,
        })
    }

    #[must_use]
    pub fn device_status(&self) -> DeviceStatus {
        match self {
            Self::Connected(state) => state.device_status,
            Self::ReadyWithoutSecureChannel(state) | Self::ReadyWithSecureChannel(state) => {
                state.device_status
            }
        }
    }

    #[must_use]
    pub fn device_model_id(&self) -> DeviceModelId {
        match self {
            Self::Connected(state) => state.device_model_id,
            Self::ReadyWithoutSecureChannel(state) | Self::ReadyWithSecureChannel(state) => {
                state.device_model_id
            }
        }
    }

    /// The running application, for sessions that know it.
    #[must_use]
    pub fn current_app(&self) -> Option<&RunningApp> {
        match self {
            Self::Connected(_) => None,
            Self::ReadyWithoutSecureChannel(state) | Self::ReadyWithSecureChannel(state) => {
                Some(&state.current_app)
            }
        }
    }

    /// Returns `true` for the ready variants.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !matches!(self, Self::Connected(_))
    }

    /// Copy of this state with a new device status.
    #[must_use]
    pub fn with_device_status(mut self, device_status: DeviceStatus) -> Self {
        match &mut self {
            Self::Connected(state) => state.device_status = device_status,
            Self::ReadyWithoutSecureChannel(state) | Self::ReadyWithSecureChannel(state) => {
                state.device_status = device_status
            }
        }
        self
    }

    /// Copy of this state with the running application replaced.
    ///
    /// Returns `None` for a connected session: only ready sessions carry the
    /// running application.
    #[must_use]
    pub fn with_current_app(&self, current_app: RunningApp) -> Option<Self> {
        match self {
            Self::Connected(_) => None,
            Self::ReadyWithoutSecureChannel(state) => {
                Some(Self::ReadyWithoutSecureChannel(ReadyState {
                    current_app,
                    ..state.clone()
                }))
            }
            Self::ReadyWithSecureChannel(state) => Some(Self::ReadyWithSecureChannel(ReadyState {
                current_app,
                ..state.clone()
            })),
        }
    }
}

/// User interaction a device action is waiting for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserInteractionRequired {
    #[default]
    None,
    UnlockDevice,
    ConfirmOpenApp,
    AllowSecureConnection,
    ConfirmCommand,
}

impl fmt::Display for UserInteractionRequired {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let interaction = match self {
            UserInteractionRequired::None => "none",
            UserInteractionRequired::UnlockDevice => "unlock-device",
            UserInteractionRequired::ConfirmOpenApp => "confirm-open-app",
            UserInteractionRequired::AllowSecureConnection => "allow-secure-connection",
            UserInteractionRequired::ConfirmCommand => "confirm-command",
        };
        write!(f, "{interaction}")
    }
}

/// Externally visible progress of a running device action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateValue {
    pub required_user_interaction: UserInteractionRequired,
}

impl IntermediateValue {
    pub fn new(required_user_interaction: UserInteractionRequired) -> Self {
        Self {
            required_user_interaction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ready_state() -> DeviceSessionState {
        DeviceSessionState::ready(
            DeviceStatus::Connected,
            DeviceModelId::NanoX,
            RunningApp::new("Bitcoin", "2.1.0"),
        )
    }

    #[test]
    fn test_connected_state_has_no_current_app() {
        let state = DeviceSessionState::connected(DeviceStatus::Locked, DeviceModelId::Stax);
        assert_eq!(state.current_app(), None);
        assert!(!state.is_ready());
        assert_eq!(state.device_status(), DeviceStatus::Locked);
        assert!(state.with_current_app(RunningApp::new("BOLOS", "1.0.0")).is_none());
    }

    #[test]
    fn test_with_current_app_keeps_other_fields() {
        let state = ready_state();
        let next = state
            .with_current_app(RunningApp::new("Ethereum", "1.10.0"))
            .unwrap();

        assert_eq!(next.current_app(), Some(&RunningApp::new("Ethereum", "1.10.0")));
        assert_eq!(next.device_status(), DeviceStatus::Connected);
        assert_eq!(next.device_model_id(), DeviceModelId::NanoX);
        assert!(matches!(next, DeviceSessionState::ReadyWithoutSecureChannel(_)));
    }

    #[test]
    fn test_with_device_status() {
        let state = ready_state().with_device_status(DeviceStatus::Locked);
        assert_eq!(state.device_status(), DeviceStatus::Locked);
        assert_eq!(state.current_app().unwrap().name, "Bitcoin");
    }

    #[rstest]
    #[case("BOLOS", true)]
    #[case("Bitcoin", false)]
    fn test_running_app_is_dashboard(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(RunningApp::new(name, "1.0.0").is_dashboard(), expected);
    }

    #[rstest]
    #[case(UserInteractionRequired::None, "none")]
    #[case(UserInteractionRequired::UnlockDevice, "unlock-device")]
    #[case(UserInteractionRequired::ConfirmOpenApp, "confirm-open-app")]
    fn test_user_interaction_display(
        #[case] interaction: UserInteractionRequired,
        #[case] expected: &str,
    ) {
        assert_eq!(interaction.to_string(), expected);
        assert_eq!(
            serde_json::to_value(interaction).unwrap(),
            serde_json::json!(expected)
        );
    }

    #[test]
    fn test_intermediate_value_default() {
        assert_eq!(
            IntermediateValue::default().required_user_interaction,
            UserInteractionRequired::None
        );
    }

    #[test]
    fn test_device_status_display() {
        assert_eq!(DeviceStatus::Connected.to_string(), "CONNECTED");
        assert_eq!(DeviceStatus::NotConnected.to_string(), "NOT CONNECTED");
    }
}
