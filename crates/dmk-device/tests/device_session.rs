//! Integration tests for DeviceSession over the simulated device.
//!
//! These tests drive the session only through `Arc<dyn InternalApi>`, the way
//! device actions see it.

use dmk_core::{
    CommandError, CommandResponse, DeviceCommand, DeviceModelId, DeviceSessionState, DeviceStatus,
    RunningApp,
};
use dmk_device::InternalApi;
use dmk_device::mock::{MockDevice, MockDeviceConfig, ScriptedReply};
use std::time::Duration;

/// Test that a locked session becomes usable once the user unlocks the device
#[tokio::test]
async fn test_unlock_is_observed_through_stream() {
    let (device, handle) = MockDevice::new(MockDeviceConfig::default().with_locked(true));
    let api = device.into_api();

    let err = api
        .send_command(DeviceCommand::GetAppAndVersion)
        .await
        .unwrap_err();
    assert!(err.is_device_locked());

    let mut stream = api.session_state_stream();
    assert_eq!(stream.borrow().device_status(), DeviceStatus::Locked);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.unlock();
    });

    let state = stream
        .wait_for(|state| state.device_status() == DeviceStatus::Connected)
        .await
        .unwrap()
        .clone();
    assert_eq!(state.device_status(), DeviceStatus::Connected);

    let response = api
        .send_command(DeviceCommand::GetAppAndVersion)
        .await
        .unwrap();
    assert_eq!(
        response,
        CommandResponse::AppAndVersion(RunningApp::new("BOLOS", "1.0.0"))
    );
}

/// Test that set_session_state replaces the value seen by every reader
#[tokio::test]
async fn test_set_session_state_is_broadcast() {
    let (device, handle) = MockDevice::new(MockDeviceConfig::default());
    let api = device.into_api();
    let stream = api.session_state_stream();

    let next = DeviceSessionState::ready(
        DeviceStatus::Connected,
        DeviceModelId::Stax,
        RunningApp::new("Ethereum", "1.10.0"),
    );
    let stored = api.set_session_state(next.clone());

    assert_eq!(stored, next);
    assert_eq!(api.get_session_state(), next);
    assert_eq!(*stream.borrow(), next);
    assert_eq!(handle.store().get(), next);
}

/// Test a full dashboard round trip through the session
#[tokio::test]
async fn test_open_and_close_through_session() {
    let (device, handle) = MockDevice::new(MockDeviceConfig::default());
    let api = device.into_api();

    api.send_command(DeviceCommand::open_app("Ethereum"))
        .await
        .unwrap();
    api.send_command(DeviceCommand::CloseApp).await.unwrap();

    assert_eq!(
        handle.sent_commands(),
        vec![DeviceCommand::open_app("Ethereum"), DeviceCommand::CloseApp]
    );
    assert!(handle.current_app().is_dashboard());
}

/// Test that scripted disconnects surface unchanged through the session
#[tokio::test]
async fn test_scripted_disconnect_reaches_caller() {
    let (device, handle) = MockDevice::new(MockDeviceConfig::default());
    handle.script(
        &DeviceCommand::CloseApp,
        ScriptedReply::Fail(CommandError::DisconnectedWhileSending),
    );
    let api = device.into_api();

    let result = api.send_command(DeviceCommand::CloseApp).await;
    assert_eq!(result, Err(CommandError::DisconnectedWhileSending));
}
