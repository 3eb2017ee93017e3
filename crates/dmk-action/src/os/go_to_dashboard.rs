//! Bring the device back to the dashboard.

use dmk_core::constants::is_dashboard_name;
use dmk_core::{CommandResult, DeviceActionError, RunningApp};
use dmk_device::InternalApi;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::actor::Actor;
use crate::device_action::{DeviceAction, launch};
use crate::error::MachineDefinitionError;
use crate::execution::DeviceActionExecution;
use crate::machine::{
    Context, Machine, MachineBuilder, MachineContext, MachineTypes, StateNode, Transition,
};
use crate::os::{
    self, CloseAppFn, DependenciesExtractor, GetAppAndVersionFn, GetDeviceStatusFn,
    GetDeviceStatusInput, GetDeviceStatusOutput, GetSessionStateFn, SetSessionStateFn,
};

const ACTION_NAME: &str = "go-to-dashboard";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoToDashboardInput {
    pub unlock_timeout: Option<Duration>,
}

impl GoToDashboardInput {
    pub fn with_unlock_timeout(mut self, unlock_timeout: Duration) -> Self {
        self.unlock_timeout = Some(unlock_timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoToDashboardState {
    GetDeviceStatus,
    CheckDeviceStatus,
    DashboardCheck,
    CloseApp,
    CloseAppCheck,
    GetAppAndVersion,
    Success,
    Error,
}

impl fmt::Display for GoToDashboardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GoToDashboardInternalState {
    pub current_app: Option<String>,
    pub error: Option<DeviceActionError>,
}

#[derive(Debug)]
pub enum GoToDashboardActorOutput {
    DeviceStatus(GetDeviceStatusOutput),
    Closed(CommandResult<()>),
    AppAndVersion(CommandResult<RunningApp>),
}

pub struct GoToDashboardMachine;

impl MachineTypes for GoToDashboardMachine {
    type Input = GoToDashboardInput;
    type InternalState = GoToDashboardInternalState;
    type ActorOutput = GoToDashboardActorOutput;
    type Output = ();
    type State = GoToDashboardState;
}

type State = GoToDashboardState;
type ActorOutput = GoToDashboardActorOutput;
type Node = StateNode<GoToDashboardMachine>;
type Edge = Transition<GoToDashboardMachine>;

/// Collaborators of [`GoToDashboardDeviceAction`].
#[derive(Clone)]
pub struct GoToDashboardDependencies {
    pub get_device_status: GetDeviceStatusFn,
    pub close_app: CloseAppFn,
    pub get_app_and_version: GetAppAndVersionFn,
    pub get_session_state: GetSessionStateFn,
    pub set_session_state: SetSessionStateFn,
}

pub fn extract_dependencies(api: &Arc<dyn InternalApi>) -> GoToDashboardDependencies {
    GoToDashboardDependencies {
        get_device_status: os::get_device_status(api),
        close_app: os::close_app(api),
        get_app_and_version: os::get_app_and_version(api),
        get_session_state: os::get_session_state(api),
        set_session_state: os::set_session_state(api),
    }
}

/// Closes the running application, if any, so that the dashboard is
/// displayed.
///
/// Completes with `()` as soon as the dashboard is running, without sending
/// any command when it already is.
pub struct GoToDashboardDeviceAction {
    input: GoToDashboardInput,
    extractor: DependenciesExtractor<GoToDashboardDependencies>,
}

impl GoToDashboardDeviceAction {
    pub fn new(input: GoToDashboardInput) -> Self {
        Self {
            input,
            extractor: Arc::new(extract_dependencies),
        }
    }

    pub fn with_dependencies_extractor(
        mut self,
        extractor: impl Fn(&Arc<dyn InternalApi>) -> GoToDashboardDependencies
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn make_state_machine(
        &self,
        api: &Arc<dyn InternalApi>,
    ) -> Result<Machine<GoToDashboardMachine>, MachineDefinitionError> {
        build_machine(&(self.extractor)(api))
    }
}

fn build_machine(
    deps: &GoToDashboardDependencies,
) -> Result<Machine<GoToDashboardMachine>, MachineDefinitionError> {
    let GoToDashboardDependencies {
        get_device_status,
        close_app,
        get_app_and_version,
        get_session_state,
        set_session_state,
    } = deps.clone();

    MachineBuilder::new(ACTION_NAME, State::GetDeviceStatus)
        .state(
            State::GetDeviceStatus,
            Node::invoke(move |ctx| {
                let input = GetDeviceStatusInput {
                    unlock_timeout: ctx.input.unlock_timeout,
                };
                Actor::nested(get_device_status(input), GoToDashboardActorOutput::DeviceStatus)
            })
            .on_snapshot(|ctx, intermediate_value| ctx.intermediate_value = intermediate_value)
            .on_done(State::CheckDeviceStatus, |ctx, output| {
                if let ActorOutput::DeviceStatus(status) = output {
                    ctx.internal_state.current_app = Some(status.current_app);
                }
            })
            .on_error(State::CheckDeviceStatus, |ctx, error| {
                ctx.internal_state.error = Some(error)
            }),
        )
        .state(
            State::CheckDeviceStatus,
            Node::decision()
                .transition(Edge::to(State::Error).guard(has_error))
                .transition(Edge::to(State::DashboardCheck)),
        )
        .state(
            State::DashboardCheck,
            Node::decision()
                .transition(Edge::to(State::Success).guard(|ctx| {
                    ctx.internal_state
                        .current_app
                        .as_deref()
                        .is_some_and(is_dashboard_name)
                }))
                .transition(Edge::to(State::Error).guard(has_error))
                .transition(
                    Edge::to(State::Error)
                        .guard(|ctx| ctx.internal_state.current_app.is_none())
                        .action(|ctx| {
                            ctx.internal_state.error =
                                Some(DeviceActionError::unknown("current app is unknown"))
                        }),
                )
                .transition(Edge::to(State::CloseApp)),
        )
        .state(
            State::CloseApp,
            Node::invoke(move |_| {
                let closed = close_app();
                Actor::future(async move { Ok(ActorOutput::Closed(closed.await)) })
            })
            .on_done(State::CloseAppCheck, |ctx, output| {
                if let ActorOutput::Closed(Err(e)) = output {
                    ctx.internal_state.error = Some(e.into());
                }
            })
            .on_error(State::Error, |ctx, error| {
                ctx.internal_state.error = Some(os::into_unknown(error))
            }),
        )
        .state(
            State::CloseAppCheck,
            Node::decision()
                .transition(Edge::to(State::Error).guard(has_error))
                .transition(Edge::to(State::GetAppAndVersion)),
        )
        .state(
            State::GetAppAndVersion,
            Node::invoke(move |_| {
                let response = get_app_and_version();
                Actor::future(async move { Ok(ActorOutput::AppAndVersion(response.await)) })
            })
            .on_done(State::DashboardCheck, move |ctx, output| {
                let ActorOutput::AppAndVersion(result) = output else {
                    return;
                };
                match result {
                    Ok(app) => {
                        os::refresh_current_app(&get_session_state, &set_session_state, app.clone());
                        ctx.internal_state.current_app = Some(app.name);
                    }
                    Err(e) => ctx.internal_state.error = Some(e.into()),
                }
            })
            .on_error(State::Error, |ctx, error| {
                ctx.internal_state.error = Some(os::into_unknown(error))
            }),
        )
        .state(State::Success, Node::success())
        .state(State::Error, Node::error())
        .output(|ctx, _| match &ctx.internal_state.error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        })
        .build()
}

fn has_error(ctx: &Context<GoToDashboardMachine>) -> bool {
    ctx.internal_state.error.is_some()
}

impl fmt::Debug for GoToDashboardDeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoToDashboardDeviceAction")
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

impl DeviceAction for GoToDashboardDeviceAction {
    type Output = ();

    fn execute(&self, api: Arc<dyn InternalApi>) -> DeviceActionExecution<()> {
        let deps = (self.extractor)(&api);
        let session = (deps.get_session_state)();
        let internal_state = GoToDashboardInternalState {
            current_app: session.current_app().map(|app| app.name.clone()),
            error: None,
        };
        launch(
            ACTION_NAME,
            build_machine(&deps),
            MachineContext::new(self.input.clone(), internal_state),
        )
    }
}
