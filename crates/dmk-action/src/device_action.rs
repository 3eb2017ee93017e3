//! Caller-facing device action abstraction.

use dmk_core::DeviceActionError;
use dmk_device::InternalApi;
use std::sync::Arc;
use tracing::error;

use crate::error::MachineDefinitionError;
use crate::execution::DeviceActionExecution;
use crate::interpreter;
use crate::machine::{Context, Machine, MachineTypes};

/// A multi-step interaction with a device.
///
/// Implementations are cheap descriptions of work: nothing happens until
/// [`execute`](DeviceAction::execute) is called, and every call starts an
/// independent execution with a fresh context.
pub trait DeviceAction: Send + Sync {
    /// Value reported by a successful execution.
    type Output: Clone + Send + Sync + 'static;

    /// Start a new execution against `api`.
    ///
    /// Must be called from within a tokio runtime.
    fn execute(&self, api: Arc<dyn InternalApi>) -> DeviceActionExecution<Self::Output>;
}

/// Start `machine`, or report an execution that failed immediately if the
/// machine could not be built.
pub(crate) fn launch<T: MachineTypes>(
    name: &'static str,
    machine: Result<Machine<T>, MachineDefinitionError>,
    context: Context<T>,
) -> DeviceActionExecution<T::Output> {
    match machine {
        Ok(machine) => interpreter::start(machine, context),
        Err(e) => {
            error!(action = name, error = %e, "Invalid device action definition");
            DeviceActionExecution::failed(name, DeviceActionError::unknown(e.to_string()))
        }
    }
}
