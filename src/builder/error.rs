//! Build errors for machine and transition builders.

use crate::core::StructuralError;
use thiserror::Error;

/// Errors that can occur when building machines and transitions.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Transition source state not specified. Call .from(state)")]
    MissingFromState,

    #[error("Transition trigger not specified. Call .on(trigger)")]
    MissingTrigger,

    #[error("Transition target state not specified. Call .to(state) or .internal()")]
    MissingToState,

    #[error("Invalid machine structure: {}", join(.0))]
    Structural(Vec<StructuralError>),

    #[error(
        "Machine '{machine}' is {} and cannot back a {} instance",
        scheduling(.asynchronous),
        counterpart(.asynchronous)
    )]
    SchedulingMismatch { machine: String, asynchronous: bool },
}

impl BuildError {
    /// Structural violations carried by this error, if any.
    pub fn structural_errors(&self) -> &[StructuralError] {
        match self {
            BuildError::Structural(errors) => errors,
            _ => &[],
        }
    }
}

fn join(errors: &[StructuralError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn scheduling(asynchronous: &bool) -> &'static str {
    if *asynchronous {
        "asynchronous"
    } else {
        "synchronous"
    }
}

fn counterpart(asynchronous: &bool) -> &'static str {
    scheduling(&!*asynchronous)
}
