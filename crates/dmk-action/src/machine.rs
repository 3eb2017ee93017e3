//! State graph definition for device actions.
//!
//! A device action is described as a graph of named states, each of one of
//! three kinds:
//!
//! - **Decision**: an ordered list of guarded transitions. The first
//!   transition whose guard holds is taken immediately; the last one must be
//!   unguarded.
//! - **Invoke**: starts exactly one [`Actor`] and waits for it. Completion
//!   takes the `on_done` transition, failure the `on_error` transition.
//!   Progress of a nested device action can be folded into the context with
//!   `on_snapshot`.
//! - **Final**: either [`FinalKind::Success`] or [`FinalKind::Error`]. The
//!   machine's output function turns the context into the outcome.
//!
//! Every state may carry entry and exit actions. Taking a transition runs
//! the exit actions of the source, then the transition's own actions, then
//! the entry actions of the target.
//!
//! # Examples
//!
//! ```
//! use dmk_action::machine::{FinalKind, MachineBuilder, MachineTypes, StateNode, Transition};
//! use dmk_action::Actor;
//! use dmk_core::DeviceActionError;
//! use std::fmt;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Step {
//!     Fetch,
//!     Check,
//!     Success,
//!     Error,
//! }
//!
//! impl fmt::Display for Step {
//!     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
//!         fmt::Debug::fmt(self, f)
//!     }
//! }
//!
//! struct Counter;
//!
//! impl MachineTypes for Counter {
//!     type Input = u32;
//!     type InternalState = u32;
//!     type ActorOutput = u32;
//!     type Output = u32;
//!     type State = Step;
//! }
//!
//! type Node = StateNode<Counter>;
//!
//! let machine = MachineBuilder::<Counter>::new("counter", Step::Fetch)
//!     .state(
//!         Step::Fetch,
//!         Node::invoke(|ctx| {
//!             let n = ctx.input;
//!             Actor::future(async move { Ok(n + 1) })
//!         })
//!         .on_done(Step::Check, |ctx, n| ctx.internal_state = n)
//!         .on_error(Step::Error, |_, _| {}),
//!     )
//!     .state(
//!         Step::Check,
//!         Node::decision()
//!             .transition(Transition::to(Step::Error).guard(|ctx| ctx.internal_state == 0))
//!             .transition(Transition::to(Step::Success)),
//!     )
//!     .state(Step::Success, Node::success())
//!     .state(Step::Error, Node::error())
//!     .output(|ctx, kind| match kind {
//!         FinalKind::Success => Ok(ctx.internal_state),
//!         FinalKind::Error => Err(DeviceActionError::unknown("zero")),
//!     })
//!     .build();
//!
//! assert!(machine.is_ok());
//! ```

use dmk_core::{DeviceActionError, IntermediateValue};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::actor::Actor;
use crate::error::{MachineDefinitionError, Result};

/// Type family of one device action's state machine.
pub trait MachineTypes: Send + Sync + 'static {
    /// Immutable input of an execution.
    type Input: Send + Sync + 'static;

    /// Private bookkeeping of an execution.
    type InternalState: Send + 'static;

    /// Value produced by the action's actors.
    type ActorOutput: Send + 'static;

    /// Value reported in the `Completed` snapshot.
    type Output: Clone + Send + Sync + 'static;

    /// Names of the graph's states.
    type State: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;
}

/// Data owned by one running interpreter.
#[derive(Debug, Clone)]
pub struct MachineContext<I, S> {
    pub input: I,
    pub intermediate_value: IntermediateValue,
    pub internal_state: S,
}

impl<I, S> MachineContext<I, S> {
    pub fn new(input: I, internal_state: S) -> Self {
        Self {
            input,
            intermediate_value: IntermediateValue::default(),
            internal_state,
        }
    }
}

/// Context of the machine described by `T`.
pub type Context<T> =
    MachineContext<<T as MachineTypes>::Input, <T as MachineTypes>::InternalState>;

pub type Action<T> = Box<dyn Fn(&mut Context<T>) + Send + Sync>;
pub type Guard<T> = Box<dyn Fn(&Context<T>) -> bool + Send + Sync>;
pub type ActorFactory<T> =
    Box<dyn Fn(&Context<T>) -> Actor<<T as MachineTypes>::ActorOutput> + Send + Sync>;
pub type DoneAction<T> =
    Box<dyn Fn(&mut Context<T>, <T as MachineTypes>::ActorOutput) + Send + Sync>;
pub type ErrorAction<T> = Box<dyn Fn(&mut Context<T>, DeviceActionError) + Send + Sync>;
pub type SnapshotAction<T> = Box<dyn Fn(&mut Context<T>, IntermediateValue) + Send + Sync>;
pub type OutputFn<T> = Box<
    dyn Fn(&Context<T>, FinalKind) -> std::result::Result<<T as MachineTypes>::Output, DeviceActionError>
        + Send
        + Sync,
>;

/// Which terminal state a machine reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinalKind {
    Success,
    Error,
}

impl fmt::Display for FinalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalKind::Success => write!(f, "success"),
            FinalKind::Error => write!(f, "error"),
        }
    }
}

/// Guarded edge of a decision state.
pub struct Transition<T: MachineTypes> {
    pub(crate) target: T::State,
    pub(crate) guard: Option<Guard<T>>,
    pub(crate) actions: Vec<Action<T>>,
}

impl<T: MachineTypes> Transition<T> {
    /// Unconditional transition to `target`.
    pub fn to(target: T::State) -> Self {
        Self {
            target,
            guard: None,
            actions: Vec::new(),
        }
    }

    /// Only take the transition when `guard` holds.
    pub fn guard(mut self, guard: impl Fn(&Context<T>) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Box::new(guard));
        self
    }

    /// Run `action` when the transition is taken.
    pub fn action(mut self, action: impl Fn(&mut Context<T>) + Send + Sync + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    pub(crate) fn is_enabled(&self, context: &Context<T>) -> bool {
        self.guard.as_ref().is_none_or(|guard| guard(context))
    }
}

pub(crate) struct Invoke<T: MachineTypes> {
    pub(crate) src: ActorFactory<T>,
    pub(crate) on_done: Option<(T::State, DoneAction<T>)>,
    pub(crate) on_error: Option<(T::State, ErrorAction<T>)>,
    pub(crate) on_snapshot: Option<SnapshotAction<T>>,
}

pub(crate) enum NodeKind<T: MachineTypes> {
    Decision(Vec<Transition<T>>),
    Invoke(Invoke<T>),
    Final(FinalKind),
}

/// One state of a machine.
pub struct StateNode<T: MachineTypes> {
    pub(crate) kind: NodeKind<T>,
    pub(crate) entry: Vec<Action<T>>,
    pub(crate) exit: Vec<Action<T>>,
    misplaced: Vec<&'static str>,
}

impl<T: MachineTypes> StateNode<T> {
    fn with_kind(kind: NodeKind<T>) -> Self {
        Self {
            kind,
            entry: Vec::new(),
            exit: Vec::new(),
            misplaced: Vec::new(),
        }
    }

    /// State that picks its successor synchronously.
    pub fn decision() -> Self {
        Self::with_kind(NodeKind::Decision(Vec::new()))
    }

    /// State that starts the actor built by `src` and waits for it.
    pub fn invoke(
        src: impl Fn(&Context<T>) -> Actor<T::ActorOutput> + Send + Sync + 'static,
    ) -> Self {
        Self::with_kind(NodeKind::Invoke(Invoke {
            src: Box::new(src),
            on_done: None,
            on_error: None,
            on_snapshot: None,
        }))
    }

    /// Final state reporting success.
    pub fn success() -> Self {
        Self::with_kind(NodeKind::Final(FinalKind::Success))
    }

    /// Final state reporting failure.
    pub fn error() -> Self {
        Self::with_kind(NodeKind::Final(FinalKind::Error))
    }

    pub fn entry(mut self, action: impl Fn(&mut Context<T>) + Send + Sync + 'static) -> Self {
        self.entry.push(Box::new(action));
        self
    }

    pub fn exit(mut self, action: impl Fn(&mut Context<T>) + Send + Sync + 'static) -> Self {
        self.exit.push(Box::new(action));
        self
    }

    /// Append a transition to a decision state.
    pub fn transition(mut self, transition: Transition<T>) -> Self {
        match &mut self.kind {
            NodeKind::Decision(transitions) => transitions.push(transition),
            _ => self.misplaced.push("a guarded transition"),
        }
        self
    }

    /// Transition taken when the invoked actor completes.
    pub fn on_done(
        mut self,
        target: T::State,
        action: impl Fn(&mut Context<T>, T::ActorOutput) + Send + Sync + 'static,
    ) -> Self {
        match &mut self.kind {
            NodeKind::Invoke(invoke) => invoke.on_done = Some((target, Box::new(action))),
            _ => self.misplaced.push("an on_done transition"),
        }
        self
    }

    /// Transition taken when the invoked actor fails.
    pub fn on_error(
        mut self,
        target: T::State,
        action: impl Fn(&mut Context<T>, DeviceActionError) + Send + Sync + 'static,
    ) -> Self {
        match &mut self.kind {
            NodeKind::Invoke(invoke) => invoke.on_error = Some((target, Box::new(action))),
            _ => self.misplaced.push("an on_error transition"),
        }
        self
    }

    /// Fold a nested action's pending snapshots into the context.
    pub fn on_snapshot(
        mut self,
        action: impl Fn(&mut Context<T>, IntermediateValue) + Send + Sync + 'static,
    ) -> Self {
        match &mut self.kind {
            NodeKind::Invoke(invoke) => invoke.on_snapshot = Some(Box::new(action)),
            _ => self.misplaced.push("an on_snapshot handler"),
        }
        self
    }

    pub(crate) fn is_decision(&self) -> bool {
        matches!(self.kind, NodeKind::Decision(_))
    }

    fn targets(&self) -> Vec<T::State> {
        match &self.kind {
            NodeKind::Decision(transitions) => transitions.iter().map(|t| t.target).collect(),
            NodeKind::Invoke(invoke) => invoke
                .on_done
                .iter()
                .map(|(target, _)| *target)
                .chain(invoke.on_error.iter().map(|(target, _)| *target))
                .collect(),
            NodeKind::Final(_) => Vec::new(),
        }
    }

    fn validate(&self, state: T::State) -> Result<()> {
        if let Some(&what) = self.misplaced.first() {
            return Err(MachineDefinitionError::misplaced(state, what));
        }

        match &self.kind {
            NodeKind::Decision(transitions) => match transitions.last() {
                Some(last) if last.guard.is_none() => Ok(()),
                _ => Err(MachineDefinitionError::MissingFallback {
                    state: state.to_string(),
                }),
            },
            NodeKind::Invoke(invoke) => {
                if invoke.on_done.is_none() {
                    return Err(MachineDefinitionError::missing_handler(state, "on_done"));
                }
                if invoke.on_error.is_none() {
                    return Err(MachineDefinitionError::missing_handler(state, "on_error"));
                }
                Ok(())
            }
            NodeKind::Final(_) => Ok(()),
        }
    }
}

/// Validated state graph of a device action.
pub struct Machine<T: MachineTypes> {
    pub(crate) name: &'static str,
    pub(crate) initial: T::State,
    pub(crate) nodes: HashMap<T::State, StateNode<T>>,
    pub(crate) output: OutputFn<T>,
}

impl<T: MachineTypes> Machine<T> {
    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn initial_state(&self) -> T::State {
        self.initial
    }

    /// Returns `true` if `state` is declared.
    pub fn contains(&self, state: T::State) -> bool {
        self.nodes.contains_key(&state)
    }

    pub(crate) fn node(&self, state: T::State) -> Option<&StateNode<T>> {
        self.nodes.get(&state)
    }
}

impl<T: MachineTypes> fmt::Debug for Machine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.name)
            .field("initial", &self.initial)
            .field("states", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Machine`].
pub struct MachineBuilder<T: MachineTypes> {
    name: &'static str,
    initial: T::State,
    nodes: Vec<(T::State, StateNode<T>)>,
    output: Option<OutputFn<T>>,
}

impl<T: MachineTypes> MachineBuilder<T> {
    pub fn new(name: &'static str, initial: T::State) -> Self {
        Self {
            name,
            initial,
            nodes: Vec::new(),
            output: None,
        }
    }

    /// Declare a state.
    pub fn state(mut self, state: T::State, node: StateNode<T>) -> Self {
        self.nodes.push((state, node));
        self
    }

    /// Set the function computing the outcome when a final state is reached.
    pub fn output(
        mut self,
        output: impl Fn(&Context<T>, FinalKind) -> std::result::Result<T::Output, DeviceActionError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.output = Some(Box::new(output));
        self
    }

    /// Validate the graph.
    ///
    /// # Errors
    ///
    /// Returns a [`MachineDefinitionError`] describing the first problem
    /// found.
    pub fn build(self) -> Result<Machine<T>> {
        let output = self.output.ok_or(MachineDefinitionError::MissingOutput)?;

        let mut nodes = HashMap::with_capacity(self.nodes.len());
        for (state, node) in self.nodes {
            node.validate(state)?;
            if nodes.insert(state, node).is_some() {
                return Err(MachineDefinitionError::DuplicateState {
                    state: state.to_string(),
                });
            }
        }

        if !nodes.contains_key(&self.initial) {
            return Err(MachineDefinitionError::UnknownInitialState {
                state: self.initial.to_string(),
            });
        }

        for (state, node) in &nodes {
            if let Some(target) = node.targets().into_iter().find(|t| !nodes.contains_key(t)) {
                return Err(MachineDefinitionError::unknown_target(state, target));
            }
        }

        for (kind, name) in [(FinalKind::Success, "success"), (FinalKind::Error, "error")] {
            let declared = nodes
                .values()
                .any(|node| matches!(node.kind, NodeKind::Final(k) if k == kind));
            if !declared {
                return Err(MachineDefinitionError::MissingFinal { kind: name });
            }
        }

        Ok(Machine {
            name: self.name,
            initial: self.initial,
            nodes,
            output,
        })
    }
}
