//! Shared vocabulary of the device management kit: session state, OS
//! commands, error classification and constants.

pub mod command;
pub mod constants;
pub mod error;
pub mod types;

pub use command::{CommandResponse, CommandResult, DeviceCommand};
pub use error::{CommandError, DeviceActionError};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
