//! Device actions built on OS commands.
//!
//! Each action declares the collaborators it needs as a plain struct of
//! closures (its *dependencies*) and a default `extract_dependencies`
//! mapping from an [`InternalApi`]. The mapping can be replaced per action
//! with `with_dependencies_extractor`, which is how tests substitute
//! individual collaborators.

pub mod get_device_status;
pub mod go_to_dashboard;
pub mod open_app;

use dmk_core::{CommandResult, DeviceActionError, DeviceCommand, DeviceSessionState, RunningApp};
use dmk_device::InternalApi;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::device_action::DeviceAction;
use crate::execution::DeviceActionExecution;

pub use get_device_status::{
    GetDeviceStatusDeviceAction, GetDeviceStatusInput, GetDeviceStatusOutput,
};
pub use go_to_dashboard::{GoToDashboardDeviceAction, GoToDashboardInput};
pub use open_app::{OpenAppDeviceAction, OpenAppInput};

/// Maps an [`InternalApi`] to an action's dependency set.
pub type DependenciesExtractor<D> = Arc<dyn Fn(&Arc<dyn InternalApi>) -> D + Send + Sync>;

pub type GetAppAndVersionFn =
    Arc<dyn Fn() -> BoxFuture<'static, CommandResult<RunningApp>> + Send + Sync>;
pub type OpenAppFn = Arc<dyn Fn(String) -> BoxFuture<'static, CommandResult<()>> + Send + Sync>;
pub type CloseAppFn = Arc<dyn Fn() -> BoxFuture<'static, CommandResult<()>> + Send + Sync>;
pub type IsOnboardedFn = Arc<dyn Fn() -> bool + Send + Sync>;
pub type GetSessionStateFn = Arc<dyn Fn() -> DeviceSessionState + Send + Sync>;
pub type SetSessionStateFn = Arc<dyn Fn(DeviceSessionState) -> DeviceSessionState + Send + Sync>;
pub type GetDeviceStatusFn = Arc<
    dyn Fn(GetDeviceStatusInput) -> DeviceActionExecution<GetDeviceStatusOutput> + Send + Sync,
>;

pub(crate) fn get_session_state(api: &Arc<dyn InternalApi>) -> GetSessionStateFn {
    let api = api.clone();
    Arc::new(move || api.get_session_state())
}

pub(crate) fn set_session_state(api: &Arc<dyn InternalApi>) -> SetSessionStateFn {
    let api = api.clone();
    Arc::new(move |state: DeviceSessionState| api.set_session_state(state))
}

/// Write `app` back to the session, if the session tracks the running app.
pub(crate) fn refresh_current_app(
    get_session_state: &GetSessionStateFn,
    set_session_state: &SetSessionStateFn,
    app: RunningApp,
) {
    if let Some(next) = get_session_state().with_current_app(app) {
        set_session_state(next);
    }
}

/// Start a nested get-device-status execution with its default dependencies.
pub(crate) fn get_device_status(api: &Arc<dyn InternalApi>) -> GetDeviceStatusFn {
    let api = api.clone();
    Arc::new(move |input: GetDeviceStatusInput| {
        GetDeviceStatusDeviceAction::new(input).execute(api.clone())
    })
}

pub(crate) fn get_app_and_version(api: &Arc<dyn InternalApi>) -> GetAppAndVersionFn {
    let api = api.clone();
    Arc::new(move || {
        let api = api.clone();
        async move {
            api.send_command(DeviceCommand::GetAppAndVersion)
                .await?
                .into_app_and_version()
        }
        .boxed()
    })
}

pub(crate) fn open_app(api: &Arc<dyn InternalApi>) -> OpenAppFn {
    let api = api.clone();
    Arc::new(move |app_name: String| {
        let api = api.clone();
        async move {
            let command = DeviceCommand::open_app(app_name);
            api.send_command(command.clone()).await?.into_ack(&command)
        }
        .boxed()
    })
}

pub(crate) fn close_app(api: &Arc<dyn InternalApi>) -> CloseAppFn {
    let api = api.clone();
    Arc::new(move || {
        let api = api.clone();
        async move {
            let command = DeviceCommand::CloseApp;
            api.send_command(command.clone()).await?.into_ack(&command)
        }
        .boxed()
    })
}

/// Onboarding status of the device.
///
/// Always `true` for now.
// TODO: derive it from the flags returned by the get-version command once
// that command is available.
pub(crate) fn is_onboarded() -> IsOnboardedFn {
    Arc::new(|| true)
}

/// Report an actor rejection as an unknown error.
pub(crate) fn into_unknown(error: DeviceActionError) -> DeviceActionError {
    match error {
        DeviceActionError::Unknown(_) => error,
        other => DeviceActionError::unknown(other.to_string()),
    }
}
