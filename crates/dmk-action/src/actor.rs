//! Units of asynchronous work started by invoking states.

use dmk_core::{DeviceActionError, IntermediateValue};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use std::future::Future;

use crate::execution::DeviceActionExecution;
use crate::snapshot::Snapshot;

/// Work started when an invoking state is entered.
///
/// Dropping an actor aborts it: a future stops at its next suspension point
/// and releases whatever it holds, a nested execution is cancelled.
pub enum Actor<A> {
    /// A single asynchronous operation.
    Future(BoxFuture<'static, Result<A, DeviceActionError>>),

    /// A child device action whose progress is forwarded to the parent.
    Nested(NestedActor<A>),
}

impl<A: Send + 'static> Actor<A> {
    /// Wrap a future resolving to the actor's outcome.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = Result<A, DeviceActionError>> + Send + 'static,
    {
        Self::Future(Box::pin(future))
    }

    /// Adopt a child execution, mapping its output into the actor output.
    ///
    /// The child is cancelled if the parent leaves the invoking state, or is
    /// cancelled itself, before the child ends.
    pub fn nested<O, M>(execution: DeviceActionExecution<O>, map: M) -> Self
    where
        O: Clone + Send + 'static,
        M: Fn(O) -> A + Send + 'static,
    {
        let events = execution
            .subscribe()
            .filter_map(move |snapshot| {
                let event = match snapshot {
                    Snapshot::NotStarted => None,
                    Snapshot::Pending { intermediate_value } => {
                        Some(NestedEvent::Snapshot(intermediate_value))
                    }
                    Snapshot::Completed { output } => Some(NestedEvent::Done(Ok(map(output)))),
                    Snapshot::Error { error } => Some(NestedEvent::Done(Err(error))),
                    Snapshot::Stopped => Some(NestedEvent::Done(Err(DeviceActionError::unknown(
                        "nested device action was stopped",
                    )))),
                };
                futures::future::ready(event)
            })
            .boxed();

        let child = execution.clone();
        Self::Nested(NestedActor {
            events,
            cancel: Some(Box::new(move || child.cancel())),
        })
    }
}

/// Progress of a nested device action, as seen by its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedEvent<A> {
    /// The child published a pending snapshot.
    Snapshot(IntermediateValue),

    /// The child ended.
    Done(Result<A, DeviceActionError>),
}

/// Child execution owned by an invoking state.
pub struct NestedActor<A> {
    events: BoxStream<'static, NestedEvent<A>>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl<A> NestedActor<A> {
    /// Next event from the child.
    ///
    /// A child stream that ends without a terminal snapshot is reported as
    /// an unknown error.
    pub async fn next(&mut self) -> NestedEvent<A> {
        match self.events.next().await {
            Some(event) => event,
            None => NestedEvent::Done(Err(DeviceActionError::unknown(
                "nested device action ended without an outcome",
            ))),
        }
    }
}

impl<A> Drop for NestedActor<A> {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}
