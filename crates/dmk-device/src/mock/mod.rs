//! Simulated device for testing and development.
//!
//! The simulated device answers OS commands from an in-memory model of a
//! device (lock state, running application, installed applications) and can
//! be steered from a test through its handle.

pub mod device;

pub use device::{MockDevice, MockDeviceConfig, MockDeviceHandle, ScriptedReply};
