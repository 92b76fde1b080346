//! Builder API for ergonomic machine construction.
//!
//! This module provides fluent builders and macros for declaring states,
//! transitions and callbacks. [`MachineBuilder::build`] validates the
//! declarations, plans every transition once and returns a shared
//! [`MachineDefinition`](crate::runtime::MachineDefinition).

pub mod error;
pub mod machine;
pub mod macros;
pub mod state;
pub mod transition;

pub use error::BuildError;
pub use machine::MachineBuilder;
pub use state::StateBuilder;
pub use transition::{TransitionBuilder, TransitionDef};

use crate::core::{State, Trigger};

/// Create an unconditional external transition.
///
/// # Example
///
/// ```
/// use nestfsm::builder::{simple_transition, MachineBuilder};
/// use nestfsm::{state_enum, trigger_enum};
///
/// state_enum! {
///     enum Phase { Start, End }
/// }
///
/// trigger_enum! {
///     enum Step { Next }
/// }
///
/// let definition = MachineBuilder::<Phase, Step, ()>::new("phases")
///     .initial(Phase::Start)
///     .add_transition(simple_transition(Phase::Start, Step::Next, Phase::End))
///     .build()
///     .unwrap();
/// assert_eq!(definition.triggers(), &[Step::Next]);
/// ```
pub fn simple_transition<S, T, C>(from: S, trigger: T, to: S) -> TransitionDef<S, T, C>
where
    S: State,
    T: Trigger,
{
    TransitionDef {
        from,
        trigger,
        to: Some(to),
        guard: None,
        action: None,
        priority: 0,
    }
}

/// Create an external transition gated by a predicate over the context.
pub fn guarded_transition<S, T, C, F>(
    from: S,
    trigger: T,
    to: S,
    name: impl Into<String>,
    guard: F,
) -> TransitionDef<S, T, C>
where
    S: State,
    T: Trigger,
    C: Send + Sync + 'static,
    F: Fn(&C) -> bool + Send + Sync + 'static,
{
    TransitionDef {
        guard: Some(crate::core::Guard::predicate(name, guard)),
        ..simple_transition(from, trigger, to)
    }
}
