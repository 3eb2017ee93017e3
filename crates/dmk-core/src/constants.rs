//! Core constants shared by the device management kit crates.
//!
//! This module centralizes the values that several crates need to agree on:
//! device status words returned by the secure element, the names under which
//! the dashboard reports itself, and the default timings used by device
//! actions.
//!
//! # Status Words
//!
//! Every command answered by the device ends with a two-byte status word.
//! Most of them are application specific, but a handful are global and are
//! interpreted by the device actions themselves:
//!
//! | Status | Constant | Meaning |
//! |--------|----------|---------|
//! | `0x5515` | [`STATUS_DEVICE_LOCKED`] | Device is locked (PIN not entered) |
//! | `0x5501` | [`STATUS_ACTION_REFUSED`] | User refused the action on device |
//! | `0x6807` | [`STATUS_UNKNOWN_APPLICATION`] | Requested application is not installed |
//!
//! # Usage
//!
//! ```
//! use dmk_core::constants::*;
//! use std::time::Duration;
//!
//! assert_eq!(DASHBOARD_APP_NAME, "BOLOS");
//!
//! let timeout = Duration::from_millis(DEFAULT_UNLOCK_TIMEOUT_MS);
//! assert_eq!(timeout.as_secs(), 15);
//! ```

// ============================================================================
// Status Words
// ============================================================================

/// Status word returned by the OS for any command sent while the device is
/// locked.
///
/// Device actions treat this code as a recoverable condition: the user is
/// asked to unlock the device and the command is sent again.
///
/// # Examples
///
/// ```
/// use dmk_core::constants::STATUS_DEVICE_LOCKED;
///
/// assert_eq!(format!("{:04x}", STATUS_DEVICE_LOCKED), "5515");
/// ```
pub const STATUS_DEVICE_LOCKED: u16 = 0x5515;

/// Status word returned when the user rejected an on-device prompt.
pub const STATUS_ACTION_REFUSED: u16 = 0x5501;

/// Status word returned by the dashboard when asked to open an application
/// that is not installed.
pub const STATUS_UNKNOWN_APPLICATION: u16 = 0x6807;

/// Status word returned when an OS-only command reaches a running application.
pub const STATUS_CLA_NOT_SUPPORTED: u16 = 0x6e00;

// ============================================================================
// Application Names
// ============================================================================

/// Name reported by the dashboard in a get-app-and-version response.
pub const DASHBOARD_APP_NAME: &str = "BOLOS";

/// Legacy dashboard name still reported by older firmwares.
pub const LEGACY_DASHBOARD_APP_NAME: &str = "OLOS\0";

/// All names under which the dashboard can report itself.
pub const DASHBOARD_APP_NAMES: [&str; 2] = [DASHBOARD_APP_NAME, LEGACY_DASHBOARD_APP_NAME];

// ============================================================================
// Device Action Timings
// ============================================================================

/// Default time, in milliseconds, a device action waits for the user to
/// unlock the device before failing with a "device locked" error.
///
/// # Value: 15000 ms
pub const DEFAULT_UNLOCK_TIMEOUT_MS: u64 = 15_000;

/// Maximum number of consecutive non-suspending transitions an interpreter
/// performs before giving up on a run.
///
/// Decision nodes are evaluated synchronously; a graph whose decision nodes
/// loop onto each other would otherwise never yield.
pub const MAX_MICROSTEPS: usize = 256;

/// Maximum number of state transitions kept in an execution's history.
///
/// A full open-application run with a close, an open and two status reads
/// stays well below 30 transitions.
pub const MAX_HISTORY_SIZE: usize = 100;

/// Returns `true` if `name` is one of the names reported by the dashboard.
///
/// # Examples
///
/// ```
/// use dmk_core::constants::is_dashboard_name;
///
/// assert!(is_dashboard_name("BOLOS"));
/// assert!(is_dashboard_name("OLOS\0"));
/// assert!(!is_dashboard_name("Bitcoin"));
/// ```
pub fn is_dashboard_name(name: &str) -> bool {
    DASHBOARD_APP_NAMES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("BOLOS", true)]
    #[case("OLOS\0", true)]
    #[case("OLOS", false)]
    #[case("Ethereum", false)]
    #[case("", false)]
    fn test_is_dashboard_name(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_dashboard_name(name), expected);
    }

    #[test]
    fn test_default_unlock_timeout() {
        assert_eq!(DEFAULT_UNLOCK_TIMEOUT_MS, 15_000);
    }
}
