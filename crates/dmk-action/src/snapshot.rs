//! Externally visible state of a device action execution.

use dmk_core::{DeviceActionError, IntermediateValue};
use serde::{Deserialize, Serialize};

/// One observation of a running device action.
///
/// An execution publishes any number of `Pending` snapshots followed by
/// exactly one terminal snapshot (`Completed`, `Error` or `Stopped`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Snapshot<O> {
    /// Nothing has been published yet.
    NotStarted,

    /// The action is running.
    Pending {
        intermediate_value: IntermediateValue,
    },

    /// The action was cancelled before reaching a final state.
    Stopped,

    /// The action reached its success state.
    Completed { output: O },

    /// The action reached its error state.
    Error { error: DeviceActionError },
}

impl<O> Snapshot<O> {
    pub fn pending(intermediate_value: IntermediateValue) -> Self {
        Self::Pending { intermediate_value }
    }

    /// Build the terminal snapshot for an action outcome.
    pub fn from_outcome(outcome: Result<O, DeviceActionError>) -> Self {
        match outcome {
            Ok(output) => Self::Completed { output },
            Err(error) => Self::Error { error },
        }
    }

    /// Returns `true` for `Completed`, `Error` and `Stopped`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::Completed { .. } | Self::Error { .. }
        )
    }

    pub fn intermediate_value(&self) -> Option<&IntermediateValue> {
        match self {
            Self::Pending { intermediate_value } => Some(intermediate_value),
            _ => None,
        }
    }

    pub fn output(&self) -> Option<&O> {
        match self {
            Self::Completed { output } => Some(output),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&DeviceActionError> {
        match self {
            Self::Error { error } => Some(error),
            _ => None,
        }
    }
}
