//! Shared helpers for device action integration tests.

#![allow(dead_code)]

use dmk_action::{DeviceActionExecution, Snapshot};
use dmk_core::{IntermediateValue, UserInteractionRequired};
use dmk_device::mock::MockDeviceHandle;
use std::time::Duration;
use tokio::task::JoinHandle;

pub fn pending<O>(interaction: UserInteractionRequired) -> Snapshot<O> {
    Snapshot::pending(IntermediateValue::new(interaction))
}

pub fn asks_for<O>(snapshot: &Snapshot<O>, interaction: UserInteractionRequired) -> bool {
    snapshot
        .intermediate_value()
        .is_some_and(|value| value.required_user_interaction == interaction)
}

/// Unlock the simulated device as soon as `execution` asks the user to.
pub fn unlock_when_asked<O: Clone + Send + 'static>(
    execution: &DeviceActionExecution<O>,
    handle: MockDeviceHandle,
) -> JoinHandle<()> {
    let mut snapshots = execution.subscribe();
    tokio::spawn(async move {
        while let Some(snapshot) = snapshots.recv().await {
            if asks_for(&snapshot, UserInteractionRequired::UnlockDevice) {
                handle.unlock();
                return;
            }
        }
    })
}

/// Wait until `execution` publishes a snapshot matching `interaction`.
pub async fn wait_until_asked<O: Clone>(
    execution: &DeviceActionExecution<O>,
    interaction: UserInteractionRequired,
) {
    let mut snapshots = execution.subscribe();
    while let Some(snapshot) = snapshots.recv().await {
        if asks_for(&snapshot, interaction) {
            return;
        }
    }
    panic!("execution ended without asking for {interaction}");
}

/// Let spawned tasks run until `condition` holds.
pub async fn settle(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}
