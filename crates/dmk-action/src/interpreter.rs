//! Runtime of a device action's state machine.
//!
//! One interpreter runs per execution, inside its own tokio task. It owns
//! the machine and the context exclusively; transitions are applied one at
//! a time and only actor invocations suspend the task.
//!
//! # Snapshot Emission
//!
//! - Entering an invoking state publishes `Pending` with the intermediate
//!   value left by its entry actions.
//! - Every snapshot forwarded by an `on_snapshot` handler publishes
//!   `Pending`.
//! - A decision transition that changes the intermediate value and lands on
//!   another decision state publishes `Pending`.
//! - Reaching a final state publishes the terminal snapshot.

use chrono::{DateTime, Utc};
use dmk_core::DeviceActionError;
use dmk_core::constants::{MAX_HISTORY_SIZE, MAX_MICROSTEPS};
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::actor::{Actor, NestedEvent};
use crate::execution::{DeviceActionExecution, Publisher};
use crate::machine::{Action, Context, Machine, MachineTypes, NodeKind, StateNode};
use crate::snapshot::Snapshot;

/// A single state change, as recorded in an interpreter's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StateTransition<S> {
    pub(crate) from: S,
    pub(crate) to: S,
    pub(crate) timestamp: DateTime<Utc>,
}

impl<S> StateTransition<S> {
    pub(crate) fn new(from: S, to: S) -> Self {
        Self {
            from,
            to,
            timestamp: Utc::now(),
        }
    }
}

/// Start executing `machine` from `context` in a new task.
///
/// Must be called from within a tokio runtime.
pub(crate) fn start<T: MachineTypes>(
    machine: Machine<T>,
    context: Context<T>,
) -> DeviceActionExecution<T::Output> {
    let execution = DeviceActionExecution::new(machine.name());
    let publisher = execution.publisher();
    let token = execution.token();
    let span = info_span!(
        "device_action",
        action = machine.name(),
        execution_id = %execution.id()
    );

    let mut interpreter = Interpreter::new(machine, context);
    tokio::spawn(
        async move {
            interpreter.run(&publisher, &token).await;
        }
        .instrument(span),
    );

    execution
}

pub(crate) struct Interpreter<T: MachineTypes> {
    machine: Machine<T>,
    context: Context<T>,
    state: T::State,
    history: VecDeque<StateTransition<T::State>>,
    microsteps: usize,
}

impl<T: MachineTypes> Interpreter<T> {
    pub(crate) fn new(machine: Machine<T>, context: Context<T>) -> Self {
        let state = machine.initial_state();
        Self {
            machine,
            context,
            state,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
            microsteps: 0,
        }
    }

    /// Run until a final state is reached or `token` is cancelled, then
    /// publish the terminal snapshot.
    pub(crate) async fn run(&mut self, publisher: &Publisher<T::Output>, token: &CancellationToken) {
        info!(initial = %self.state, "Device action started");

        let terminal = self.drive(publisher, token).await;
        let first = self.history.front();
        debug!(
            transitions = self.history.len(),
            from = ?first.map(|t| t.from),
            since = ?first.map(|t| t.timestamp),
            path = ?self.history.iter().map(|t| t.to).collect::<Vec<_>>(),
            "Device action history"
        );

        match terminal {
            Some(snapshot) => {
                let failure = snapshot.error().map(ToString::to_string);
                if !publisher.publish(snapshot) {
                    trace!(state = %self.state, "Outcome dropped, execution already ended");
                } else if let Some(error) = failure {
                    warn!(state = %self.state, error = %error, "Device action failed");
                } else {
                    info!(state = %self.state, "Device action completed");
                }
            }
            None => {
                publisher.publish(Snapshot::Stopped);
                debug!(state = %self.state, "Device action stopped");
            }
        }
    }

    /// Returns the terminal snapshot, or `None` when cancelled.
    async fn drive(
        &mut self,
        publisher: &Publisher<T::Output>,
        token: &CancellationToken,
    ) -> Option<Snapshot<T::Output>> {
        let Self {
            machine,
            context,
            state,
            history,
            microsteps,
        } = self;
        let machine = &*machine;

        if let Some(node) = machine.node(*state) {
            run_actions::<T>(&node.entry, context);
        }

        loop {
            let Some(node) = machine.node(*state) else {
                return Some(Snapshot::Error {
                    error: DeviceActionError::unknown(format!("state {state} is not declared")),
                });
            };

            match &node.kind {
                NodeKind::Final(kind) => {
                    debug!(state = %state, kind = %kind, "Final state reached");
                    return Some(Snapshot::from_outcome((machine.output)(context, *kind)));
                }

                NodeKind::Decision(transitions) => {
                    *microsteps += 1;
                    if *microsteps > MAX_MICROSTEPS {
                        warn!(state = %state, "Too many transitions without suspension");
                        return Some(Snapshot::Error {
                            error: DeviceActionError::unknown(format!(
                                "more than {MAX_MICROSTEPS} transitions without suspension"
                            )),
                        });
                    }

                    let Some(transition) = transitions.iter().find(|t| t.is_enabled(context))
                    else {
                        return Some(Snapshot::Error {
                            error: DeviceActionError::unknown(format!(
                                "no transition enabled in state {state}"
                            )),
                        });
                    };

                    let before = context.intermediate_value;
                    let target = transition.target;
                    take_transition(machine, context, history, *state, target, |ctx| {
                        run_actions::<T>(&transition.actions, ctx)
                    });
                    *state = target;

                    let lands_on_decision = machine.node(target).is_some_and(StateNode::is_decision);
                    if lands_on_decision && context.intermediate_value != before {
                        publish_pending::<T>(publisher, context);
                    }
                }

                NodeKind::Invoke(invoke) => {
                    // No actor may start once `cancel()` has returned.
                    if token.is_cancelled() {
                        return None;
                    }
                    *microsteps = 0;
                    publish_pending::<T>(publisher, context);

                    let result = match (invoke.src)(context) {
                        Actor::Future(future) => tokio::select! {
                            biased;
                            _ = token.cancelled() => return None,
                            result = future => result,
                        },
                        Actor::Nested(mut nested) => loop {
                            let event = tokio::select! {
                                biased;
                                _ = token.cancelled() => return None,
                                event = nested.next() => event,
                            };
                            match event {
                                NestedEvent::Snapshot(intermediate_value) => {
                                    if let Some(on_snapshot) = &invoke.on_snapshot {
                                        on_snapshot(context, intermediate_value);
                                        publish_pending::<T>(publisher, context);
                                    }
                                }
                                NestedEvent::Done(result) => break result,
                            }
                        },
                    };

                    let target = match result {
                        Ok(output) => {
                            let Some((target, on_done)) = &invoke.on_done else {
                                return Some(missing_handler(*state, "on_done"));
                            };
                            take_transition(machine, context, history, *state, *target, |ctx| {
                                on_done(ctx, output)
                            });
                            *target
                        }
                        Err(error) => {
                            warn!(state = %state, error = %error, "Actor failed");
                            let Some((target, on_error)) = &invoke.on_error else {
                                return Some(missing_handler(*state, "on_error"));
                            };
                            take_transition(machine, context, history, *state, *target, |ctx| {
                                on_error(ctx, error)
                            });
                            *target
                        }
                    };
                    *state = target;
                }
            }
        }
    }
}

fn run_actions<T: MachineTypes>(actions: &[Action<T>], context: &mut Context<T>) {
    for action in actions {
        action(context);
    }
}

/// Exit `from`, run the transition's own actions, enter `to`.
fn take_transition<T: MachineTypes>(
    machine: &Machine<T>,
    context: &mut Context<T>,
    history: &mut VecDeque<StateTransition<T::State>>,
    from: T::State,
    to: T::State,
    actions: impl FnOnce(&mut Context<T>),
) {
    if let Some(node) = machine.node(from) {
        run_actions::<T>(&node.exit, context);
    }
    actions(context);
    if let Some(node) = machine.node(to) {
        run_actions::<T>(&node.entry, context);
    }

    debug!(from = %from, to = %to, "State transition");
    history.push_back(StateTransition::new(from, to));
    if history.len() > MAX_HISTORY_SIZE {
        history.pop_front();
    }
}

fn publish_pending<T: MachineTypes>(publisher: &Publisher<T::Output>, context: &Context<T>) {
    trace!(
        interaction = %context.intermediate_value.required_user_interaction,
        "Publishing pending snapshot"
    );
    publisher.publish(Snapshot::pending(context.intermediate_value));
}

fn missing_handler<S: std::fmt::Display, O>(state: S, handler: &str) -> Snapshot<O> {
    Snapshot::Error {
        error: DeviceActionError::unknown(format!("state {state} has no {handler} handler")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{FinalKind, MachineBuilder, MachineContext, Transition};
    use dmk_core::{IntermediateValue, UserInteractionRequired};
    use std::fmt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum S {
        Start,
        Work,
        Check,
        Ping,
        Pong,
        Done,
        Failed,
    }

    impl fmt::Display for S {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Debug::fmt(self, f)
        }
    }

    struct Trace;

    impl MachineTypes for Trace {
        type Input = u32;
        type InternalState = Vec<String>;
        type ActorOutput = u32;
        type Output = Vec<String>;
        type State = S;
    }

    type Node = StateNode<Trace>;
    type Edge = Transition<Trace>;

    fn log(entry: &'static str) -> impl Fn(&mut Context<Trace>) + Send + Sync + 'static {
        move |ctx| ctx.internal_state.push(entry.to_string())
    }

    fn with_finals(builder: MachineBuilder<Trace>) -> MachineBuilder<Trace> {
        builder
            .state(S::Done, Node::success())
            .state(S::Failed, Node::error())
            .output(|ctx, kind| match kind {
                FinalKind::Success => Ok(ctx.internal_state.clone()),
                FinalKind::Error => Err(DeviceActionError::unknown(ctx.internal_state.join(","))),
            })
    }

    fn context() -> Context<Trace> {
        MachineContext::new(1, Vec::new())
    }

    fn pending(interaction: UserInteractionRequired) -> Snapshot<Vec<String>> {
        Snapshot::pending(IntermediateValue::new(interaction))
    }

    #[tokio::test]
    async fn test_actions_run_exit_transition_entry() {
        let machine = with_finals(MachineBuilder::new("order", S::Start))
            .state(
                S::Start,
                Node::decision()
                    .entry(log("enter start"))
                    .exit(log("exit start"))
                    .transition(Edge::to(S::Work).action(log("start to work"))),
            )
            .state(
                S::Work,
                Node::invoke(|ctx| {
                    let n = ctx.input;
                    Actor::future(async move { Ok(n + 1) })
                })
                .entry(log("enter work"))
                .exit(log("exit work"))
                .on_done(S::Done, |ctx, n| ctx.internal_state.push(format!("done {n}")))
                .on_error(S::Failed, |_, _| {}),
            )
            .build()
            .unwrap();

        let execution = start(machine, context());
        let snapshots = execution.subscribe().collect_all().await;

        assert_eq!(
            snapshots,
            vec![
                pending(UserInteractionRequired::None),
                Snapshot::Completed {
                    output: vec![
                        "enter start".to_string(),
                        "exit start".to_string(),
                        "start to work".to_string(),
                        "enter work".to_string(),
                        "exit work".to_string(),
                        "done 2".to_string(),
                    ]
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_actor_failure_routes_to_on_error() {
        let machine = with_finals(MachineBuilder::new("failing", S::Work))
            .state(
                S::Work,
                Node::invoke(|_| Actor::future(async { Err(DeviceActionError::DeviceLocked) }))
                    .on_done(S::Done, |_, _| {})
                    .on_error(S::Failed, |ctx, error| {
                        ctx.internal_state.push(error.to_string())
                    }),
            )
            .build()
            .unwrap();

        let outcome = start(machine, context()).outcome().await;
        assert_eq!(
            outcome.error(),
            Some(&DeviceActionError::unknown("Device is locked"))
        );
    }

    #[tokio::test]
    async fn test_decision_publishes_changed_intermediate_value() {
        let machine = with_finals(MachineBuilder::new("decisions", S::Start))
            .state(
                S::Start,
                Node::decision().transition(Edge::to(S::Check).action(|ctx| {
                    ctx.intermediate_value =
                        IntermediateValue::new(UserInteractionRequired::UnlockDevice)
                })),
            )
            .state(S::Check, Node::decision().transition(Edge::to(S::Done)))
            .build()
            .unwrap();

        let snapshots = start(machine, context()).subscribe().collect_all().await;
        assert_eq!(
            snapshots,
            vec![
                pending(UserInteractionRequired::UnlockDevice),
                Snapshot::Completed { output: vec![] },
            ]
        );
    }

    #[tokio::test]
    async fn test_runaway_decisions_end_in_error() {
        let machine = with_finals(MachineBuilder::new("runaway", S::Ping))
            .state(S::Ping, Node::decision().transition(Edge::to(S::Pong)))
            .state(S::Pong, Node::decision().transition(Edge::to(S::Ping)))
            .build()
            .unwrap();

        let execution = DeviceActionExecution::new("runaway");
        let mut interpreter = Interpreter::new(machine, context());
        interpreter
            .run(&execution.publisher(), &execution.token())
            .await;

        assert!(matches!(
            execution.current(),
            Snapshot::Error {
                error: DeviceActionError::Unknown(_)
            }
        ));
        assert_eq!(interpreter.history.len(), MAX_HISTORY_SIZE);
    }

    #[tokio::test]
    async fn test_no_actor_starts_after_cancel() {
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        let machine = with_finals(MachineBuilder::new("cancelled", S::Start))
            .state(S::Start, Node::decision().transition(Edge::to(S::Work)))
            .state(
                S::Work,
                Node::invoke(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Actor::future(async { Ok(0) })
                })
                .on_done(S::Done, |_, _| {})
                .on_error(S::Failed, |_, _| {}),
            )
            .build()
            .unwrap();

        let execution = DeviceActionExecution::new("cancelled");
        execution.cancel();
        let mut interpreter = Interpreter::new(machine, context());
        interpreter
            .run(&execution.publisher(), &execution.token())
            .await;

        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert_eq!(
            execution.subscribe().collect_all().await,
            vec![Snapshot::Stopped]
        );
    }

    #[tokio::test]
    async fn test_history_records_transitions() {
        let machine = with_finals(MachineBuilder::new("history", S::Start))
            .state(S::Start, Node::decision().transition(Edge::to(S::Check)))
            .state(S::Check, Node::decision().transition(Edge::to(S::Done)))
            .build()
            .unwrap();

        let execution = DeviceActionExecution::new("history");
        let mut interpreter = Interpreter::new(machine, context());
        interpreter
            .run(&execution.publisher(), &execution.token())
            .await;

        let path: Vec<(S, S)> = interpreter
            .history
            .iter()
            .map(|t| (t.from, t.to))
            .collect();
        assert_eq!(path, vec![(S::Start, S::Check), (S::Check, S::Done)]);
        assert_eq!(interpreter.state, S::Done);
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_cancel_drops_in_flight_actor() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = dropped.clone();

        let machine = with_finals(MachineBuilder::new("cancel", S::Work))
            .state(
                S::Work,
                Node::invoke(move |_| {
                    let guard = DropFlag(flag.clone());
                    Actor::future(async move {
                        let _guard = guard;
                        futures::future::pending::<Result<u32, DeviceActionError>>().await
                    })
                })
                .on_done(S::Done, |_, _| {})
                .on_error(S::Failed, |_, _| {}),
            )
            .build()
            .unwrap();

        let execution = start(machine, context());
        let mut stream = execution.subscribe();
        assert_eq!(stream.recv().await, Some(pending(UserInteractionRequired::None)));

        execution.cancel();
        execution.cancel();

        assert_eq!(stream.recv().await, Some(Snapshot::Stopped));
        assert_eq!(stream.recv().await, None);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_nested_snapshots_are_forwarded() {
        let child = DeviceActionExecution::<u32>::new("child");
        let child_publisher = child.publisher();

        let machine = with_finals(MachineBuilder::new("parent", S::Work))
            .state(
                S::Work,
                Node::invoke(move |_| Actor::nested(child.clone(), |n| n))
                    .on_snapshot(|ctx, value| ctx.intermediate_value = value)
                    .on_done(S::Done, |ctx, n| ctx.internal_state.push(n.to_string()))
                    .on_error(S::Failed, |_, _| {}),
            )
            .build()
            .unwrap();

        child_publisher.publish(Snapshot::pending(IntermediateValue::new(
            UserInteractionRequired::UnlockDevice,
        )));
        child_publisher.publish(Snapshot::Completed { output: 9 });

        let snapshots = start(machine, context()).subscribe().collect_all().await;
        assert_eq!(
            snapshots,
            vec![
                pending(UserInteractionRequired::None),
                pending(UserInteractionRequired::UnlockDevice),
                Snapshot::Completed {
                    output: vec!["9".to_string()]
                },
            ]
        );
    }
}
