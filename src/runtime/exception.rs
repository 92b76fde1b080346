//! Policy for errors raised by action, entry and exit callbacks.

use crate::core::CallbackError;
use crate::runtime::TransitionStage;
use std::sync::Arc;
use uuid::Uuid;

/// What to do with a failed callback.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ExceptionDirective {
    /// Stop the transition and return the error to the caller.
    #[default]
    Propagate,
    /// Log the error and continue with the next step.
    Continue,
}

/// Everything known about a failed callback.
#[derive(Debug)]
pub struct ExceptionContext<'a, S, T> {
    pub machine: &'a str,
    pub instance_id: Uuid,
    pub from: &'a S,
    pub to: &'a S,
    /// `None` while the machine is starting.
    pub trigger: Option<&'a T>,
    pub stage: TransitionStage,
    pub callback: &'a str,
    /// Whether the current state had already been reassigned.
    pub state_changed: bool,
    pub error: &'a CallbackError,
}

/// Machine-level handler deciding the directive for each failure.
pub type ExceptionHandler<S, T> =
    Arc<dyn Fn(&ExceptionContext<'_, S, T>) -> ExceptionDirective + Send + Sync>;

pub(crate) fn directive_for<S, T>(
    handler: Option<&ExceptionHandler<S, T>>,
    context: &ExceptionContext<'_, S, T>,
) -> ExceptionDirective {
    handler.map_or(ExceptionDirective::Propagate, |h| h(context))
}
