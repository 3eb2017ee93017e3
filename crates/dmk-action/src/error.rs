//! Errors raised while assembling a state machine.

/// Result type alias for machine construction.
pub type Result<T> = std::result::Result<T, MachineDefinitionError>;

/// A state graph that cannot be interpreted.
///
/// States are reported by their display name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MachineDefinitionError {
    /// The initial state is not declared.
    #[error("Initial state {state} is not declared")]
    UnknownInitialState { state: String },

    /// A state was declared twice.
    #[error("State {state} is declared more than once")]
    DuplicateState { state: String },

    /// A transition targets a state that is not declared.
    #[error("Transition from {from} targets undeclared state {to}")]
    UnknownTarget { from: String, to: String },

    /// A decision state whose last transition carries a guard, or that has
    /// no transition at all.
    #[error("Decision state {state} has no unguarded fallback transition")]
    MissingFallback { state: String },

    /// An invoking state without an `on_done` or `on_error` transition.
    #[error("Invoking state {state} is missing its {handler} transition")]
    MissingHandler {
        state: String,
        handler: &'static str,
    },

    /// A transition or handler attached to a state kind that cannot use it.
    #[error("State {state} cannot declare {what}")]
    Misplaced { state: String, what: &'static str },

    /// The graph lacks a success or an error final state.
    #[error("Machine has no {kind} final state")]
    MissingFinal { kind: &'static str },

    /// No output function was supplied.
    #[error("Machine has no output function")]
    MissingOutput,
}

impl MachineDefinitionError {
    pub fn unknown_target(from: impl ToString, to: impl ToString) -> Self {
        Self::UnknownTarget {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn missing_handler(state: impl ToString, handler: &'static str) -> Self {
        Self::MissingHandler {
            state: state.to_string(),
            handler,
        }
    }

    pub fn misplaced(state: impl ToString, what: &'static str) -> Self {
        Self::Misplaced {
            state: state.to_string(),
            what,
        }
    }
}
