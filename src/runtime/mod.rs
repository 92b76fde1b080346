//! Execution core: machine instances that fire triggers through plans.
//!
//! A [`MachineDefinition`] is built once and shared. Each instance owns its
//! current state and history memory:
//! - [`StateMachine`] for synchronous use, serialized by the caller
//! - [`AsyncStateMachine`] with a single-slot gate around every mutation

mod async_machine;
mod definition;
mod exception;
mod extension;
mod machine;
mod transit;

use crate::core::CallbackError;
use std::fmt;
use thiserror::Error;

pub use async_machine::AsyncStateMachine;
pub use definition::MachineDefinition;
pub use exception::{ExceptionContext, ExceptionDirective, ExceptionHandler};
pub use extension::{MachineExtension, TransitionContext};
pub use machine::StateMachine;

pub(crate) use transit::Instance;

/// Where in a transition a failure happened.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TransitionStage {
    /// Waiting for the asynchronous gate.
    Gate,
    Guard,
    OnExit,
    Action,
    OnEntry,
}

impl fmt::Display for TransitionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransitionStage::Gate => "gate",
            TransitionStage::Guard => "guard",
            TransitionStage::OnExit => "exit",
            TransitionStage::Action => "action",
            TransitionStage::OnEntry => "entry",
        };
        f.write_str(label)
    }
}

/// Result of processing one trigger.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FireOutcome {
    /// An external transition ran.
    Transitioned,
    /// An internal transition ran its action without changing state.
    Internal,
    NoTransition,
    GuardRejected,
    /// The payload's type differs from the trigger's declared payload type.
    PayloadMismatch,
}

impl FireOutcome {
    pub fn fired(self) -> bool {
        matches!(self, FireOutcome::Transitioned | FireOutcome::Internal)
    }
}

/// Errors raised by machine instances.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("State machine is not started. Call start() before firing triggers")]
    NotStarted,

    #[error("No transition from state '{state}' on trigger '{trigger}'")]
    NoTransition { state: String, trigger: String },

    #[error("Guard rejected trigger '{trigger}' in state '{state}'")]
    GuardRejected { state: String, trigger: String },

    #[error("{stage} callback '{callback}' failed in state '{state}': {source}")]
    Callback {
        stage: TransitionStage,
        callback: String,
        state: String,
        #[source]
        source: CallbackError,
    },

    #[error("Transition cancelled during {stage} (state changed: {state_changed})")]
    Cancelled {
        stage: TransitionStage,
        state_changed: bool,
    },
}
