//! Error types shared by the command channel and the device actions.
//!
//! Two layers of errors exist:
//!
//! - [`CommandError`] is the classification produced by the command channel
//!   for a single command. It is opaque to the device action engine, which
//!   only inspects it through helpers such as [`CommandError::is_device_locked`].
//! - [`DeviceActionError`] is what a device action reports in its terminal
//!   `Error` snapshot.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{STATUS_ACTION_REFUSED, STATUS_DEVICE_LOCKED};

/// Classified failure of a single command sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "details", rename_all = "snake_case")]
pub enum CommandError {
    /// The device answered with a non-success status word.
    #[error("Device returned status {status_code:#06x}: {message}")]
    Device { status_code: u16, message: String },

    /// The transport was lost after the command was handed to it.
    ///
    /// The device may or may not have executed the command.
    #[error("Device disconnected while sending")]
    DisconnectedWhileSending,

    /// The transport failed before the command reached the device.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The device answered with a payload that does not match the command.
    #[error("Unexpected response to {command}: {response}")]
    UnexpectedResponse { command: String, response: String },
}

impl CommandError {
    /// Create a new device status error.
    pub fn device(status_code: u16, message: impl Into<String>) -> Self {
        Self::Device {
            status_code,
            message: message.into(),
        }
    }

    /// Create the error returned by the OS when the device is locked.
    pub fn device_locked() -> Self {
        Self::device(STATUS_DEVICE_LOCKED, "Device is locked")
    }

    /// Create the error returned when the user refuses an on-device prompt.
    pub fn action_refused() -> Self {
        Self::device(STATUS_ACTION_REFUSED, "Action refused on device")
    }

    /// Create a new transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new unexpected response error.
    pub fn unexpected_response(command: impl Into<String>, response: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            command: command.into(),
            response: response.into(),
        }
    }

    /// Status word carried by the error, if the device answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Device { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Returns `true` if the device refused the command because it is locked.
    pub fn is_device_locked(&self) -> bool {
        self.status_code() == Some(STATUS_DEVICE_LOCKED)
    }

    /// Returns `true` if the transport dropped while the command was in flight.
    pub fn is_disconnected_while_sending(&self) -> bool {
        matches!(self, Self::DisconnectedWhileSending)
    }
}

/// Error reported by a device action in its terminal snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "details", rename_all = "snake_case")]
pub enum DeviceActionError {
    /// The device has not been set up yet.
    #[error("Device is not onboarded")]
    DeviceNotOnboarded,

    /// The device stayed locked for longer than the unlock timeout.
    #[error("Device is locked")]
    DeviceLocked,

    /// A command failed with a classified error.
    #[error("Command failed: {0}")]
    Command(#[from] CommandError),

    /// An actor failed with an unclassified error.
    #[error("Unknown device action error: {0}")]
    Unknown(String),
}

impl DeviceActionError {
    /// Create a new unknown error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown(message.into())
    }

    /// The command error wrapped by this error, if any.
    pub fn as_command_error(&self) -> Option<&CommandError> {
        match self {
            Self::Command(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` if this wraps a disconnection that happened while a
    /// command was in flight.
    pub fn is_disconnected_while_sending(&self) -> bool {
        self.as_command_error()
            .is_some_and(CommandError::is_disconnected_while_sending)
    }
}
