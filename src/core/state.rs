//! Traits implemented by user state and trigger types.
//!
//! The engine never relies on the numeric representation of an enum.
//! States and triggers are identified by their `name()`, and the
//! hierarchy index assigns each declared state a dense [`StateId`].
//!
//! [`StateId`]: crate::core::StateId

use std::fmt::Debug;
use std::hash::Hash;

/// Trait for state machine states.
///
/// # Required Traits
///
/// - `Clone` + `Eq` + `Hash`: states are used as lookup keys
/// - `Debug`: states must be debuggable for diagnostics
/// - `Send` + `Sync` + `'static`: definitions are shared across threads
///
/// # Example
///
/// ```rust
/// use nestfsm::core::State;
///
/// #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
/// enum Door {
///     Open,
///     Closed,
/// }
///
/// impl State for Door {
///     fn name(&self) -> &str {
///         match self {
///             Self::Open => "Open",
///             Self::Closed => "Closed",
///         }
///     }
/// }
///
/// assert_eq!(Door::Open.name(), "Open");
/// ```
pub trait State: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// Unique name of the state within its machine.
    fn name(&self) -> &str;
}

/// Trait for triggers (events) fired at a machine.
pub trait Trigger: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// Unique name of the trigger within its machine.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    enum TestState {
        Idle,
        Running,
    }

    impl State for TestState {
        fn name(&self) -> &str {
            match self {
                Self::Idle => "Idle",
                Self::Running => "Running",
            }
        }
    }

    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    enum TestTrigger {
        Go,
    }

    impl Trigger for TestTrigger {
        fn name(&self) -> &str {
            "Go"
        }
    }

    #[test]
    fn state_name_returns_correct_value() {
        assert_eq!(TestState::Idle.name(), "Idle");
        assert_eq!(TestState::Running.name(), "Running");
        assert_eq!(TestTrigger::Go.name(), "Go");
    }

    #[test]
    fn states_work_as_set_members() {
        let set: HashSet<TestState> = [TestState::Idle, TestState::Idle, TestState::Running]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }
}
