//! Read the running application, waiting for the user to unlock the device
//! if needed.
//!
//! ```text
//! OnboardingCheck ──▶ LockingCheck ──▶ AppAndVersionCheck ──▶ AppAndVersionResultCheck ──▶ Success
//!        │                 │                  ▲                   │          │
//!        ▼                 ▼                  │                   ▼          ▼
//!      Error          UnlockWait ─────────────┘ ◀──────────── (locked)     Error
//! ```
//!
//! A session reporting the device as locked sends the action straight to
//! the unlock wait, without sending any command. A get-app-and-version
//! command answered with the "device locked" status is not an error either:
//! the session was stale, so the action asks the user to unlock the device,
//! waits for the session to report it as connected, and sends the command
//! again. The wait is bounded by [`GetDeviceStatusInput::unlock_timeout`].

use dmk_core::constants::DEFAULT_UNLOCK_TIMEOUT_MS;
use dmk_core::{
    CommandResult, DeviceActionError, DeviceSessionState, DeviceStatus, IntermediateValue,
    RunningApp, UserInteractionRequired,
};
use dmk_device::InternalApi;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::actor::Actor;
use crate::device_action::{DeviceAction, launch};
use crate::error::MachineDefinitionError;
use crate::execution::DeviceActionExecution;
use crate::machine::{Machine, MachineBuilder, MachineContext, MachineTypes, StateNode, Transition};
use crate::os::{
    self, DependenciesExtractor, GetAppAndVersionFn, GetSessionStateFn, IsOnboardedFn,
    SetSessionStateFn,
};

const ACTION_NAME: &str = "get-device-status";

/// Input of [`GetDeviceStatusDeviceAction`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDeviceStatusInput {
    /// How long to wait for the user to unlock the device.
    ///
    /// Defaults to [`DEFAULT_UNLOCK_TIMEOUT_MS`].
    pub unlock_timeout: Option<Duration>,
}

impl GetDeviceStatusInput {
    pub fn with_unlock_timeout(mut self, unlock_timeout: Duration) -> Self {
        self.unlock_timeout = Some(unlock_timeout);
        self
    }

    /// Effective unlock timeout.
    pub fn unlock_timeout(&self) -> Duration {
        self.unlock_timeout
            .unwrap_or(Duration::from_millis(DEFAULT_UNLOCK_TIMEOUT_MS))
    }
}

/// Application running on the device when the action completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDeviceStatusOutput {
    pub current_app: String,
    pub current_app_version: String,
}

impl From<RunningApp> for GetDeviceStatusOutput {
    fn from(app: RunningApp) -> Self {
        Self {
            current_app: app.name,
            current_app_version: app.version,
        }
    }
}

/// States of [`GetDeviceStatusDeviceAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GetDeviceStatusState {
    OnboardingCheck,
    LockingCheck,
    AppAndVersionCheck,
    AppAndVersionResultCheck,
    UnlockWait,
    Success,
    Error,
}

impl fmt::Display for GetDeviceStatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetDeviceStatusInternalState {
    pub onboarded: bool,
    pub locked: bool,
    pub current_app: Option<String>,
    pub current_app_version: Option<String>,
    pub error: Option<DeviceActionError>,
}

impl GetDeviceStatusInternalState {
    /// Seed the lock state and the running application from the session.
    fn from_session(session: &DeviceSessionState) -> Self {
        Self {
            locked: session.device_status() == DeviceStatus::Locked,
            current_app: session.current_app().map(|app| app.name.clone()),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub enum GetDeviceStatusActorOutput {
    AppAndVersion(CommandResult<RunningApp>),
    Unlocked,
}

pub struct GetDeviceStatusMachine;

impl MachineTypes for GetDeviceStatusMachine {
    type Input = GetDeviceStatusInput;
    type InternalState = GetDeviceStatusInternalState;
    type ActorOutput = GetDeviceStatusActorOutput;
    type Output = GetDeviceStatusOutput;
    type State = GetDeviceStatusState;
}

type State = GetDeviceStatusState;
type ActorOutput = GetDeviceStatusActorOutput;
type Node = StateNode<GetDeviceStatusMachine>;
type Edge = Transition<GetDeviceStatusMachine>;

/// Collaborators of [`GetDeviceStatusDeviceAction`].
#[derive(Clone)]
pub struct GetDeviceStatusDependencies {
    pub get_app_and_version: GetAppAndVersionFn,
    pub get_session_state: GetSessionStateFn,
    pub set_session_state: SetSessionStateFn,
    /// Resolves once the session reports the device as connected.
    ///
    /// Each call takes a fresh subscription to the session state; dropping
    /// the returned future releases it.
    pub wait_for_unlock:
        Arc<dyn Fn() -> BoxFuture<'static, Result<(), DeviceActionError>> + Send + Sync>,
    pub is_onboarded: IsOnboardedFn,
}

/// Default dependencies, backed by `api`.
pub fn extract_dependencies(api: &Arc<dyn InternalApi>) -> GetDeviceStatusDependencies {
    let wait_for_unlock = {
        let api = api.clone();
        Arc::new(move || {
            let mut states = api.session_state_stream();
            async move {
                states
                    .wait_for(|state| state.device_status() == DeviceStatus::Connected)
                    .await
                    .map(|_| ())
                    .map_err(|_| DeviceActionError::unknown("device session closed"))
            }
            .boxed()
        })
    };

    GetDeviceStatusDependencies {
        get_app_and_version: os::get_app_and_version(api),
        get_session_state: os::get_session_state(api),
        set_session_state: os::set_session_state(api),
        wait_for_unlock,
        is_onboarded: os::is_onboarded(),
    }
}

/// Reports the application running on the device.
///
/// Completes with a [`GetDeviceStatusOutput`], or fails with
/// [`DeviceActionError::DeviceNotOnboarded`],
/// [`DeviceActionError::DeviceLocked`] when the device stays locked for
/// longer than the unlock timeout, or the error of the failed command.
///
/// On success the running application is also written back to the session
/// state, when the session is ready.
pub struct GetDeviceStatusDeviceAction {
    input: GetDeviceStatusInput,
    extractor: DependenciesExtractor<GetDeviceStatusDependencies>,
}

impl GetDeviceStatusDeviceAction {
    pub fn new(input: GetDeviceStatusInput) -> Self {
        Self {
            input,
            extractor: Arc::new(extract_dependencies),
        }
    }

    /// Replace the default dependency mapping.
    pub fn with_dependencies_extractor(
        mut self,
        extractor: impl Fn(&Arc<dyn InternalApi>) -> GetDeviceStatusDependencies
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn input(&self) -> &GetDeviceStatusInput {
        &self.input
    }

    /// Build the state graph of this action against `api`.
    pub fn make_state_machine(
        &self,
        api: &Arc<dyn InternalApi>,
    ) -> Result<Machine<GetDeviceStatusMachine>, MachineDefinitionError> {
        self.build_machine(&(self.extractor)(api))
    }

    fn build_machine(
        &self,
        deps: &GetDeviceStatusDependencies,
    ) -> Result<Machine<GetDeviceStatusMachine>, MachineDefinitionError> {
        let is_onboarded = deps.is_onboarded.clone();
        let get_app_and_version = deps.get_app_and_version.clone();
        let wait_for_unlock = deps.wait_for_unlock.clone();
        let get_session_state = deps.get_session_state.clone();
        let set_session_state = deps.set_session_state.clone();
        let session_state = deps.get_session_state.clone();

        MachineBuilder::new(ACTION_NAME, State::OnboardingCheck)
            .state(
                State::OnboardingCheck,
                Node::decision()
                    .transition(
                        Edge::to(State::LockingCheck)
                            .guard(move |_| is_onboarded())
                            .action(|ctx| ctx.internal_state.onboarded = true),
                    )
                    .transition(Edge::to(State::Error).action(|ctx| {
                        ctx.internal_state.error = Some(DeviceActionError::DeviceNotOnboarded)
                    })),
            )
            .state(
                State::LockingCheck,
                Node::decision()
                    .transition(
                        Edge::to(State::AppAndVersionCheck)
                            .guard(move |_| {
                                session_state().device_status() != DeviceStatus::Locked
                            })
                            .action(|ctx| ctx.internal_state.locked = false),
                    )
                    .transition(Edge::to(State::UnlockWait).action(|ctx| {
                        debug!("Session reports the device as locked");
                        ctx.internal_state.locked = true
                    })),
            )
            .state(
                State::AppAndVersionCheck,
                Node::invoke(move |_| {
                    let response = get_app_and_version();
                    Actor::future(async move { Ok(ActorOutput::AppAndVersion(response.await)) })
                })
                .on_done(State::AppAndVersionResultCheck, move |ctx, output| {
                    let ActorOutput::AppAndVersion(result) = output else {
                        return;
                    };
                    let state = &mut ctx.internal_state;
                    match result {
                        Ok(app) => {
                            os::refresh_current_app(
                                &get_session_state,
                                &set_session_state,
                                app.clone(),
                            );
                            state.locked = false;
                            state.current_app = Some(app.name);
                            state.current_app_version = Some(app.version);
                        }
                        Err(e) if e.is_device_locked() => {
                            debug!("Device is locked, waiting for the user");
                            state.locked = true;
                        }
                        Err(e) => state.error = Some(e.into()),
                    }
                })
                .on_error(State::Error, |ctx, error| {
                    ctx.internal_state.error = Some(os::into_unknown(error))
                }),
            )
            .state(
                State::AppAndVersionResultCheck,
                Node::decision()
                    .transition(
                        Edge::to(State::Error).guard(|ctx| ctx.internal_state.error.is_some()),
                    )
                    .transition(Edge::to(State::UnlockWait).guard(|ctx| ctx.internal_state.locked))
                    .transition(Edge::to(State::Success)),
            )
            .state(
                State::UnlockWait,
                Node::invoke(move |ctx| {
                    let unlock_timeout = ctx.input.unlock_timeout();
                    let unlocked = wait_for_unlock();
                    Actor::future(async move {
                        match tokio::time::timeout(unlock_timeout, unlocked).await {
                            Ok(result) => result.map(|()| ActorOutput::Unlocked),
                            Err(_) => Err(DeviceActionError::DeviceLocked),
                        }
                    })
                })
                .entry(|ctx| {
                    ctx.intermediate_value =
                        IntermediateValue::new(UserInteractionRequired::UnlockDevice)
                })
                .exit(|ctx| ctx.intermediate_value = IntermediateValue::default())
                .on_done(State::AppAndVersionCheck, |ctx, _| {
                    ctx.internal_state.locked = false
                })
                .on_error(State::Error, |ctx, error| {
                    ctx.internal_state.error = Some(error)
                }),
            )
            .state(State::Success, Node::success())
            .state(State::Error, Node::error())
            .output(|ctx, _| {
                let state = &ctx.internal_state;
                if let Some(error) = &state.error {
                    return Err(error.clone());
                }
                match (&state.current_app, &state.current_app_version) {
                    (Some(name), Some(version)) => Ok(GetDeviceStatusOutput {
                        current_app: name.clone(),
                        current_app_version: version.clone(),
                    }),
                    _ => Err(DeviceActionError::unknown(
                        "device status completed without a running application",
                    )),
                }
            })
            .build()
    }
}

impl fmt::Debug for GetDeviceStatusDeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetDeviceStatusDeviceAction")
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

impl DeviceAction for GetDeviceStatusDeviceAction {
    type Output = GetDeviceStatusOutput;

    fn execute(&self, api: Arc<dyn InternalApi>) -> DeviceActionExecution<Self::Output> {
        let deps = (self.extractor)(&api);
        let internal_state = GetDeviceStatusInternalState::from_session(&(deps.get_session_state)());
        launch(
            ACTION_NAME,
            self.build_machine(&deps),
            MachineContext::new(self.input.clone(), internal_state),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Snapshot;
    use dmk_core::{CommandError, DeviceModelId};
    use dmk_device::mock::{MockDevice, MockDeviceConfig};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn api(config: MockDeviceConfig) -> Arc<dyn InternalApi> {
        MockDevice::new(config).0.into_api()
    }

    #[test]
    fn test_input_defaults_to_fifteen_seconds() {
        let input = GetDeviceStatusInput::default();
        assert_eq!(input.unlock_timeout(), Duration::from_secs(15));

        let input = input.with_unlock_timeout(Duration::from_millis(500));
        assert_eq!(input.unlock_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_internal_state_seeded_from_ready_session() {
        let session = DeviceSessionState::ready(
            DeviceStatus::Connected,
            DeviceModelId::Flex,
            RunningApp::new("Ethereum", "1.10.0"),
        );
        let state = GetDeviceStatusInternalState::from_session(&session);
        assert_eq!(state.current_app.as_deref(), Some("Ethereum"));
        assert_eq!(state.current_app_version, None);

        let session = DeviceSessionState::connected(DeviceStatus::Connected, DeviceModelId::Flex);
        let state = GetDeviceStatusInternalState::from_session(&session);
        assert_eq!(state.current_app, None);
        assert!(!state.locked);

        let session = DeviceSessionState::connected(DeviceStatus::Locked, DeviceModelId::Flex);
        let state = GetDeviceStatusInternalState::from_session(&session);
        assert!(state.locked);
    }

    #[tokio::test]
    async fn test_locked_session_waits_before_any_command() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let reads_at_unlock = Arc::new(AtomicUsize::new(usize::MAX));
        let recorder = reads_at_unlock.clone();
        let action = GetDeviceStatusDeviceAction::new(GetDeviceStatusInput::default())
            .with_dependencies_extractor(move |api| {
                let counter = counter.clone();
                let observed = counter.clone();
                let reads = recorder.clone();
                let defaults = extract_dependencies(api);
                let get_app_and_version = defaults.get_app_and_version.clone();
                GetDeviceStatusDependencies {
                    get_session_state: Arc::new(|| {
                        DeviceSessionState::connected(DeviceStatus::Locked, DeviceModelId::Stax)
                    }),
                    get_app_and_version: Arc::new(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        get_app_and_version()
                    }),
                    wait_for_unlock: Arc::new(move || {
                        reads.store(observed.load(Ordering::SeqCst), Ordering::SeqCst);
                        async { Ok::<(), DeviceActionError>(()) }.boxed()
                    }),
                    ..defaults
                }
            });

        let snapshots = action
            .execute(api(MockDeviceConfig::default()))
            .subscribe()
            .collect_all()
            .await;

        assert_eq!(reads_at_unlock.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            snapshots.first(),
            Some(&Snapshot::pending(IntermediateValue::new(
                UserInteractionRequired::UnlockDevice
            )))
        );
        assert!(matches!(snapshots.last(), Some(Snapshot::Completed { .. })));
    }

    #[tokio::test]
    async fn test_make_state_machine() {
        let action = GetDeviceStatusDeviceAction::new(GetDeviceStatusInput::default());
        let machine = action
            .make_state_machine(&api(MockDeviceConfig::default()))
            .unwrap();

        assert_eq!(machine.initial_state(), GetDeviceStatusState::OnboardingCheck);
        assert!(machine.contains(GetDeviceStatusState::UnlockWait));
    }

    #[tokio::test]
    async fn test_not_onboarded() {
        let action = GetDeviceStatusDeviceAction::new(GetDeviceStatusInput::default())
            .with_dependencies_extractor(|api| GetDeviceStatusDependencies {
                is_onboarded: Arc::new(|| false),
                ..extract_dependencies(api)
            });

        let snapshots = action
            .execute(api(MockDeviceConfig::default()))
            .subscribe()
            .collect_all()
            .await;

        assert_eq!(
            snapshots,
            vec![Snapshot::Error {
                error: DeviceActionError::DeviceNotOnboarded
            }]
        );
    }

    #[tokio::test]
    async fn test_command_error_is_reported() {
        let action = GetDeviceStatusDeviceAction::new(GetDeviceStatusInput::default())
            .with_dependencies_extractor(|api| GetDeviceStatusDependencies {
                get_app_and_version: Arc::new(|| {
                    async { Err::<RunningApp, _>(CommandError::transport("USB stall")) }.boxed()
                }),
                ..extract_dependencies(api)
            });

        let outcome = action.execute(api(MockDeviceConfig::default())).outcome().await;

        assert_eq!(
            outcome,
            Snapshot::Error {
                error: DeviceActionError::Command(CommandError::transport("USB stall"))
            }
        );
    }

    #[tokio::test]
    async fn test_session_not_written_when_only_connected() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = written.clone();
        let action = GetDeviceStatusDeviceAction::new(GetDeviceStatusInput::default())
            .with_dependencies_extractor(move |api| {
                let sink = sink.clone();
                GetDeviceStatusDependencies {
                    get_session_state: Arc::new(|| {
                        DeviceSessionState::connected(DeviceStatus::Connected, DeviceModelId::NanoX)
                    }),
                    set_session_state: Arc::new(move |state: DeviceSessionState| {
                        sink.lock().unwrap().push(state.clone());
                        state
                    }),
                    ..extract_dependencies(api)
                }
            });

        let outcome = action.execute(api(MockDeviceConfig::default())).outcome().await;

        assert!(matches!(outcome, Snapshot::Completed { .. }));
        assert!(written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retries_after_unlock() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let action = GetDeviceStatusDeviceAction::new(GetDeviceStatusInput::default())
            .with_dependencies_extractor(move |api| {
                let counter = counter.clone();
                GetDeviceStatusDependencies {
                    get_app_and_version: Arc::new(move || {
                        let call = counter.fetch_add(1, Ordering::SeqCst);
                        async move {
                            if call == 0 {
                                Err(CommandError::device_locked())
                            } else {
                                Ok(RunningApp::new("Bitcoin", "2.1.0"))
                            }
                        }
                        .boxed()
                    }),
                    wait_for_unlock: Arc::new(|| async { Ok::<(), DeviceActionError>(()) }.boxed()),
                    ..extract_dependencies(api)
                }
            });

        let snapshots = action
            .execute(api(MockDeviceConfig::default()))
            .subscribe()
            .collect_all()
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            snapshots.last(),
            Some(&Snapshot::Completed {
                output: GetDeviceStatusOutput {
                    current_app: "Bitcoin".to_string(),
                    current_app_version: "2.1.0".to_string(),
                }
            })
        );
    }

    #[tokio::test]
    async fn test_wait_failure_is_reported() {
        let action = GetDeviceStatusDeviceAction::new(GetDeviceStatusInput::default())
            .with_dependencies_extractor(|api| GetDeviceStatusDependencies {
                get_app_and_version: Arc::new(|| {
                    async { Err::<RunningApp, _>(CommandError::device_locked()) }.boxed()
                }),
                wait_for_unlock: Arc::new(|| {
                    async { Err::<(), _>(DeviceActionError::unknown("device session closed")) }.boxed()
                }),
                ..extract_dependencies(api)
            });

        let outcome = action.execute(api(MockDeviceConfig::default())).outcome().await;

        assert_eq!(
            outcome.error(),
            Some(&DeviceActionError::unknown("device session closed"))
        );
    }
}
