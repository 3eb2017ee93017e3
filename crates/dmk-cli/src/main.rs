//! Run device actions against a simulated device and print every snapshot
//! as a JSON line.

mod logging;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use dmk_action::os::{
    GetDeviceStatusDeviceAction, GetDeviceStatusInput, GoToDashboardDeviceAction,
    GoToDashboardInput, OpenAppDeviceAction, OpenAppInput,
};
use dmk_action::{DeviceAction, Snapshot};
use dmk_core::constants::DASHBOARD_APP_NAME;
use dmk_core::{RunningApp, UserInteractionRequired};
use dmk_device::InternalApi;
use dmk_device::mock::{MockDevice, MockDeviceConfig, MockDeviceHandle};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Run device actions against a simulated device", long_about = None)]
struct Cli {
    #[command(subcommand)]
    action: ActionCommand,

    /// Start with the device locked
    #[arg(long, global = true)]
    locked: bool,

    /// Unlock the device this many milliseconds after the action asks for it
    #[arg(long, global = true)]
    unlock_after_ms: Option<u64>,

    /// Application running when the simulation starts
    #[arg(long, global = true, default_value = DASHBOARD_APP_NAME)]
    current_app: String,

    /// Simulated round-trip time of every command
    #[arg(long, global = true, default_value_t = 0)]
    latency_ms: u64,

    /// How long to wait for the user to unlock the device
    #[arg(long, global = true)]
    unlock_timeout_ms: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum ActionCommand {
    /// Read the application running on the device
    GetStatus,

    /// Open an application
    OpenApp {
        /// Name of the application, as reported by the device
        app_name: String,
    },

    /// Close the running application
    GoToDashboard,
}

impl Cli {
    fn device_config(&self) -> MockDeviceConfig {
        let defaults = MockDeviceConfig::default();
        let current_app = defaults
            .installed_apps
            .iter()
            .find(|app| app.name == self.current_app)
            .cloned()
            .unwrap_or_else(|| RunningApp::new(self.current_app.clone(), "1.0.0"));

        defaults
            .with_locked(self.locked)
            .with_current_app(current_app)
            .with_latency(Duration::from_millis(self.latency_ms))
    }

    fn unlock_timeout(&self) -> Option<Duration> {
        self.unlock_timeout_ms.map(Duration::from_millis)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init()?;

    let (device, handle) = MockDevice::new(cli.device_config());
    let api = device.into_api();
    let unlock_after = cli.unlock_after_ms.map(Duration::from_millis);

    match &cli.action {
        ActionCommand::GetStatus => {
            let input = GetDeviceStatusInput {
                unlock_timeout: cli.unlock_timeout(),
            };
            run(GetDeviceStatusDeviceAction::new(input), api, &handle, unlock_after).await
        }
        ActionCommand::OpenApp { app_name } => {
            let input = OpenAppInput {
                app_name: app_name.clone(),
                unlock_timeout: cli.unlock_timeout(),
            };
            run(OpenAppDeviceAction::new(input), api, &handle, unlock_after).await
        }
        ActionCommand::GoToDashboard => {
            let input = GoToDashboardInput {
                unlock_timeout: cli.unlock_timeout(),
            };
            run(GoToDashboardDeviceAction::new(input), api, &handle, unlock_after).await
        }
    }
}

/// Execute `action`, print its snapshots and simulate the user.
async fn run<A>(
    action: A,
    api: Arc<dyn InternalApi>,
    handle: &MockDeviceHandle,
    unlock_after: Option<Duration>,
) -> Result<()>
where
    A: DeviceAction,
    A::Output: Serialize,
{
    let execution = action.execute(api);
    info!(action = execution.action(), execution_id = %execution.id(), "Device action started");

    let mut snapshots = execution.subscribe();
    let mut unlock_scheduled = false;
    let mut interrupted = false;

    loop {
        tokio::select! {
            snapshot = snapshots.recv() => {
                let Some(snapshot) = snapshot else { break };
                println!("{}", serde_json::to_string(&snapshot)?);

                let asks_unlock = snapshot.intermediate_value().is_some_and(|value| {
                    value.required_user_interaction == UserInteractionRequired::UnlockDevice
                });
                if let Some(delay) = unlock_after
                    && asks_unlock
                    && !unlock_scheduled
                {
                    unlock_scheduled = true;
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        info!("Simulating device unlock");
                        handle.unlock();
                    });
                }

                if let Snapshot::Error { error } = &snapshot {
                    bail!("{} failed: {error}", execution.action());
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("Interrupted, cancelling the device action");
                interrupted = true;
                execution.cancel();
            }
        }
    }

    Ok(())
}
