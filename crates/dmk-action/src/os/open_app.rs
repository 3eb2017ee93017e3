//! Make a given application the one running on the device.
//!
//! The flow reads the device status (unlocking the device if needed), closes
//! the running application when it is not the dashboard, asks the dashboard
//! to open the requested application, and finally reads the status again to
//! confirm it.
//!
//! A transport that drops while the open command is in flight does not fail
//! the flow: the device may have executed the command anyway, so the status
//! is read again and the flow succeeds if the requested application is
//! running.

use dmk_core::constants::{DASHBOARD_APP_NAME, is_dashboard_name};
use dmk_core::{
    CommandResult, DeviceActionError, DeviceSessionState, IntermediateValue,
    UserInteractionRequired,
};
use dmk_device::InternalApi;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::actor::Actor;
use crate::device_action::{DeviceAction, launch};
use crate::error::MachineDefinitionError;
use crate::execution::DeviceActionExecution;
use crate::machine::{Machine, MachineBuilder, MachineContext, MachineTypes, StateNode, Transition};
use crate::os::{
    self, CloseAppFn, DependenciesExtractor, GetDeviceStatusFn, GetDeviceStatusInput,
    GetDeviceStatusOutput, GetSessionStateFn, IsOnboardedFn, OpenAppFn,
};

const ACTION_NAME: &str = "open-app";

/// Input of [`OpenAppDeviceAction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAppInput {
    /// Name of the application to open, as reported by the device.
    pub app_name: String,
    /// Passed to the nested get-device-status executions.
    pub unlock_timeout: Option<Duration>,
}

impl OpenAppInput {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            unlock_timeout: None,
        }
    }

    pub fn with_unlock_timeout(mut self, unlock_timeout: Duration) -> Self {
        self.unlock_timeout = Some(unlock_timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenAppState {
    OnboardingCheck,
    GetDeviceStatus,
    CheckDeviceStatus,
    DashboardCheck,
    OpenApplication,
    OpenApplicationResultCheck,
    CloseApplication,
    CloseApplicationResultCheck,
    Success,
    Error,
}

impl fmt::Display for OpenAppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenAppInternalState {
    pub currently_running_app: Option<String>,
    pub error: Option<DeviceActionError>,
}

impl OpenAppInternalState {
    fn from_session(session: &DeviceSessionState) -> Self {
        Self {
            currently_running_app: session.current_app().map(|app| app.name.clone()),
            error: None,
        }
    }

    fn is_running(&self, app_name: &str) -> bool {
        self.currently_running_app.as_deref() == Some(app_name)
    }

    fn has_disconnected_while_sending(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(DeviceActionError::is_disconnected_while_sending)
    }

    fn record(&mut self, result: CommandResult<()>, running_app: &str) {
        match result {
            Ok(()) => self.currently_running_app = Some(running_app.to_string()),
            Err(e) => self.error = Some(e.into()),
        }
    }
}

#[derive(Debug)]
pub enum OpenAppActorOutput {
    DeviceStatus(GetDeviceStatusOutput),
    Command(CommandResult<()>),
}

pub struct OpenAppMachine;

impl MachineTypes for OpenAppMachine {
    type Input = OpenAppInput;
    type InternalState = OpenAppInternalState;
    type ActorOutput = OpenAppActorOutput;
    type Output = ();
    type State = OpenAppState;
}

type State = OpenAppState;
type Node = StateNode<OpenAppMachine>;
type Edge = Transition<OpenAppMachine>;

/// Collaborators of [`OpenAppDeviceAction`].
#[derive(Clone)]
pub struct OpenAppDependencies {
    pub is_onboarded: IsOnboardedFn,
    pub get_device_status: GetDeviceStatusFn,
    pub open_app: OpenAppFn,
    pub close_app: CloseAppFn,
    /// Seeds the running application when an execution starts.
    pub get_session_state: GetSessionStateFn,
}

/// Default dependencies, backed by `api`.
pub fn extract_dependencies(api: &Arc<dyn InternalApi>) -> OpenAppDependencies {
    OpenAppDependencies {
        is_onboarded: os::is_onboarded(),
        get_device_status: os::get_device_status(api),
        open_app: os::open_app(api),
        close_app: os::close_app(api),
        get_session_state: os::get_session_state(api),
    }
}

/// Opens an application on the device.
///
/// Completes with `()` once the requested application is running. Pending
/// snapshots ask the user to unlock the device or to confirm the opening.
pub struct OpenAppDeviceAction {
    input: OpenAppInput,
    extractor: DependenciesExtractor<OpenAppDependencies>,
}

impl OpenAppDeviceAction {
    pub fn new(input: OpenAppInput) -> Self {
        Self {
            input,
            extractor: Arc::new(extract_dependencies),
        }
    }

    /// Replace the default dependency mapping.
    pub fn with_dependencies_extractor(
        mut self,
        extractor: impl Fn(&Arc<dyn InternalApi>) -> OpenAppDependencies + Send + Sync + 'static,
    ) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn input(&self) -> &OpenAppInput {
        &self.input
    }

    /// Build the state graph of this action against `api`.
    pub fn make_state_machine(
        &self,
        api: &Arc<dyn InternalApi>,
    ) -> Result<Machine<OpenAppMachine>, MachineDefinitionError> {
        build_machine(&(self.extractor)(api))
    }
}

fn build_machine(
    deps: &OpenAppDependencies,
) -> Result<Machine<OpenAppMachine>, MachineDefinitionError> {
    let OpenAppDependencies {
        is_onboarded,
        get_device_status,
        open_app,
        close_app,
        ..
    } = deps.clone();

    MachineBuilder::new(ACTION_NAME, State::OnboardingCheck)
        .state(
            State::OnboardingCheck,
            Node::decision()
                .transition(Edge::to(State::GetDeviceStatus).guard(move |_| is_onboarded()))
                .transition(Edge::to(State::Error).action(|ctx| {
                    ctx.internal_state.error = Some(DeviceActionError::DeviceNotOnboarded)
                })),
        )
        .state(
            State::GetDeviceStatus,
            Node::invoke(move |ctx| {
                let input = GetDeviceStatusInput {
                    unlock_timeout: ctx.input.unlock_timeout,
                };
                Actor::nested(get_device_status(input), OpenAppActorOutput::DeviceStatus)
            })
            .on_snapshot(|ctx, intermediate_value| ctx.intermediate_value = intermediate_value)
            .on_done(State::CheckDeviceStatus, |ctx, output| {
                // The nested action already refreshed the session.
                if let OpenAppActorOutput::DeviceStatus(status) = output {
                    ctx.internal_state.currently_running_app = Some(status.current_app);
                }
            })
            .on_error(State::CheckDeviceStatus, |ctx, error| {
                ctx.internal_state.currently_running_app = None;
                ctx.internal_state.error = Some(error);
            }),
        )
        .state(
            State::CheckDeviceStatus,
            Node::decision()
                .transition(
                    Edge::to(State::Success)
                        .guard(|ctx| ctx.internal_state.is_running(&ctx.input.app_name))
                        .action(|ctx| ctx.internal_state.error = None),
                )
                .transition(Edge::to(State::Error).guard(|ctx| ctx.internal_state.error.is_some()))
                .transition(Edge::to(State::DashboardCheck)),
        )
        .state(
            State::DashboardCheck,
            Node::decision()
                .transition(
                    Edge::to(State::Error)
                        .guard(|ctx| ctx.internal_state.currently_running_app.is_none())
                        .action(|ctx| {
                            ctx.internal_state.error =
                                Some(DeviceActionError::unknown("current app is unknown"))
                        }),
                )
                .transition(Edge::to(State::OpenApplication).guard(|ctx| {
                    ctx.internal_state
                        .currently_running_app
                        .as_deref()
                        .is_some_and(is_dashboard_name)
                }))
                .transition(Edge::to(State::CloseApplication)),
        )
        .state(
            State::OpenApplication,
            Node::invoke(move |ctx| {
                let opened = open_app(ctx.input.app_name.clone());
                Actor::future(async move { Ok(OpenAppActorOutput::Command(opened.await)) })
            })
            .entry(|ctx| {
                ctx.intermediate_value =
                    IntermediateValue::new(UserInteractionRequired::ConfirmOpenApp)
            })
            .exit(|ctx| ctx.intermediate_value = IntermediateValue::default())
            .on_done(State::OpenApplicationResultCheck, |ctx, output| {
                if let OpenAppActorOutput::Command(result) = output {
                    ctx.internal_state.record(result, &ctx.input.app_name);
                }
            })
            .on_error(State::OpenApplicationResultCheck, |ctx, error| {
                ctx.internal_state.error = Some(os::into_unknown(error))
            }),
        )
        .state(
            State::OpenApplicationResultCheck,
            Node::decision()
                .transition(
                    Edge::to(State::GetDeviceStatus)
                        .guard(|ctx| ctx.internal_state.has_disconnected_while_sending()),
                )
                .transition(Edge::to(State::Error).guard(|ctx| ctx.internal_state.error.is_some()))
                .transition(Edge::to(State::GetDeviceStatus)),
        )
        .state(
            State::CloseApplication,
            Node::invoke(move |_| {
                let closed = close_app();
                Actor::future(async move { Ok(OpenAppActorOutput::Command(closed.await)) })
            })
            .on_done(State::CloseApplicationResultCheck, |ctx, output| {
                if let OpenAppActorOutput::Command(result) = output {
                    ctx.internal_state.record(result, DASHBOARD_APP_NAME);
                }
            })
            .on_error(State::CloseApplicationResultCheck, |ctx, error| {
                ctx.internal_state.error = Some(os::into_unknown(error))
            }),
        )
        .state(
            State::CloseApplicationResultCheck,
            Node::decision()
                .transition(Edge::to(State::Error).guard(|ctx| ctx.internal_state.error.is_some()))
                .transition(Edge::to(State::OpenApplication)),
        )
        .state(State::Success, Node::success())
        .state(State::Error, Node::error())
        .output(|ctx, _| match &ctx.internal_state.error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        })
        .build()
}

impl fmt::Debug for OpenAppDeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAppDeviceAction")
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

impl DeviceAction for OpenAppDeviceAction {
    type Output = ();

    fn execute(&self, api: Arc<dyn InternalApi>) -> DeviceActionExecution<()> {
        let deps = (self.extractor)(&api);
        let internal_state = OpenAppInternalState::from_session(&(deps.get_session_state)());
        launch(
            ACTION_NAME,
            build_machine(&deps),
            MachineContext::new(self.input.clone(), internal_state),
        )
    }
}
