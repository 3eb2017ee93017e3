//! Commands understood by the device OS and their decoded responses.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CommandError;
use crate::types::RunningApp;

/// Result of a single command sent through a command channel.
pub type CommandResult<T> = std::result::Result<T, CommandError>;

/// OS-level command sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DeviceCommand {
    /// Read the name and version of the running application.
    GetAppAndVersion,
    /// Ask the dashboard to launch an application. Requires user confirmation.
    OpenApp { app_name: String },
    /// Quit the running application and return to the dashboard.
    CloseApp,
}

impl DeviceCommand {
    pub fn open_app(app_name: impl Into<String>) -> Self {
        Self::OpenApp {
            app_name: app_name.into(),
        }
    }

    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::GetAppAndVersion => "get-app-and-version",
            DeviceCommand::OpenApp { .. } => "open-app",
            DeviceCommand::CloseApp => "close-app",
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceCommand::OpenApp { app_name } => write!(f, "open-app({app_name})"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Decoded response to a [`DeviceCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum CommandResponse {
    AppAndVersion(RunningApp),
    /// The command succeeded with an empty payload.
    Ack,
}

impl CommandResponse {
    /// Extract the running application from a get-app-and-version response.
    pub fn into_app_and_version(self) -> CommandResult<RunningApp> {
        match self {
            CommandResponse::AppAndVersion(app) => Ok(app),
            other => Err(CommandError::unexpected_response(
                DeviceCommand::GetAppAndVersion.name(),
                format!("{other:?}"),
            )),
        }
    }

    /// Check that a command expecting an empty payload got one.
    pub fn into_ack(self, command: &DeviceCommand) -> CommandResult<()> {
        match self {
            CommandResponse::Ack => Ok(()),
            other => Err(CommandError::unexpected_response(
                command.name(),
                format!("{other:?}"),
            )),
        }
    }
}
