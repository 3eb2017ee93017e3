//! Collaborator layer of the device management kit.
//!
//! Device actions never touch a transport directly. They talk to an
//! [`InternalApi`], which combines two collaborators:
//!
//! - a [`CommandChannel`] that sends one OS command and returns its decoded
//!   response or a classified [`CommandError`](dmk_core::CommandError);
//! - a [`SessionStateStore`] holding the last known [`DeviceSessionState`]
//!   and notifying subscribers of every change.
//!
//! [`DeviceSession`] binds the two together. The [`mock`] module provides a
//! simulated device for tests and demos.
//!
//! # Example
//!
//! ```
//! use dmk_core::{DeviceCommand, DeviceStatus};
//! use dmk_device::InternalApi;
//! use dmk_device::mock::{MockDevice, MockDeviceConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (device, _handle) = MockDevice::new(MockDeviceConfig::default());
//!     let api = device.into_api();
//!
//!     let response = api.send_command(DeviceCommand::GetAppAndVersion).await;
//!     assert!(response.is_ok());
//!     assert_eq!(api.get_session_state().device_status(), DeviceStatus::Connected);
//! }
//! ```
//!
//! [`DeviceSessionState`]: dmk_core::DeviceSessionState

pub mod device_session;
pub mod mock;
pub mod session;
pub mod traits;

pub use device_session::DeviceSession;
pub use session::SessionStateStore;
pub use traits::{CommandChannel, InternalApi};
