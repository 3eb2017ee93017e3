//! Device action engine of the device management kit.
//!
//! A device action drives a device through a multi-step interaction (read
//! the running application, wait for the user to unlock the device, open
//! an application, ...). Each action is a state graph built with
//! [`MachineBuilder`] and run by an interpreter in its own tokio task.
//!
//! Callers see an execution through a [`DeviceActionExecution`] handle:
//!
//! - [`subscribe`](DeviceActionExecution::subscribe) returns a
//!   [`SnapshotStream`] replaying every [`Snapshot`] published so far;
//! - [`cancel`](DeviceActionExecution::cancel) stops the execution.
//!
//! The OS-level actions live in [`os`].
//!
//! # Example
//!
//! ```
//! use dmk_action::{DeviceAction, Snapshot};
//! use dmk_action::os::open_app::{OpenAppDeviceAction, OpenAppInput};
//! use dmk_device::mock::{MockDevice, MockDeviceConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (device, handle) = MockDevice::new(MockDeviceConfig::default());
//!     let action = OpenAppDeviceAction::new(OpenAppInput::new("Bitcoin"));
//!
//!     let outcome = action.execute(device.into_api()).outcome().await;
//!
//!     assert_eq!(outcome, Snapshot::Completed { output: () });
//!     assert_eq!(handle.current_app().name, "Bitcoin");
//! }
//! ```

pub mod actor;
pub mod device_action;
pub mod error;
pub mod execution;
mod interpreter;
pub mod machine;
pub mod os;
pub mod snapshot;

pub use actor::{Actor, NestedEvent};
pub use device_action::DeviceAction;
pub use error::MachineDefinitionError;
pub use execution::{DeviceActionExecution, SnapshotStream};
pub use machine::{
    FinalKind, Machine, MachineBuilder, MachineContext, MachineTypes, StateNode, Transition,
};
pub use snapshot::Snapshot;
