//! Builder for constructing transitions.

use crate::builder::error::BuildError;
use crate::core::{Action, Callback, Guard, State, Trigger};

/// A validated transition ready to be added to a machine.
pub struct TransitionDef<S: State, T: Trigger, C> {
    pub from: S,
    pub trigger: T,
    /// `None` for internal transitions.
    pub to: Option<S>,
    pub guard: Option<Guard<C>>,
    pub action: Option<Action<C>>,
    pub priority: i32,
}

impl<S: State, T: Trigger, C> TransitionDef<S, T, C> {
    pub fn is_internal(&self) -> bool {
        self.to.is_none()
    }
}

/// Builder for constructing transitions with a fluent API.
pub struct TransitionBuilder<S: State, T: Trigger, C> {
    from: Option<S>,
    trigger: Option<T>,
    to: Option<S>,
    internal: bool,
    guard: Option<Guard<C>>,
    action: Option<Action<C>>,
    priority: i32,
}

impl<S: State, T: Trigger, C: Send + Sync + 'static> TransitionBuilder<S, T, C> {
    /// Create a new transition builder.
    pub fn new() -> Self {
        Self {
            from: None,
            trigger: None,
            to: None,
            internal: false,
            guard: None,
            action: None,
            priority: 0,
        }
    }

    /// Set the source state (required).
    pub fn from(mut self, state: S) -> Self {
        self.from = Some(state);
        self
    }

    /// Set the trigger (required).
    pub fn on(mut self, trigger: T) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Set the target state (required unless internal).
    pub fn to(mut self, state: S) -> Self {
        self.to = Some(state);
        self
    }

    /// Run guard and action only, without leaving the source state.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Higher priority wins among transitions sharing source and trigger.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a guard (optional).
    pub fn guard(mut self, guard: Guard<C>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Add a guard using a closure (optional).
    pub fn when<F>(self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.guard(Callback::predicate(name, predicate))
    }

    /// Set the action (optional).
    pub fn action(mut self, action: Action<C>) -> Self {
        self.action = Some(action);
        self
    }

    /// Set the action using a closure (optional).
    pub fn then<F>(self, name: impl Into<String>, effect: F) -> Self
    where
        F: Fn(&C) + Send + Sync + 'static,
    {
        self.action(Callback::effect(name, effect))
    }

    /// Build the transition.
    pub fn build(self) -> Result<TransitionDef<S, T, C>, BuildError> {
        let from = self.from.ok_or(BuildError::MissingFromState)?;
        let trigger = self.trigger.ok_or(BuildError::MissingTrigger)?;
        let to = if self.internal {
            None
        } else {
            Some(self.to.ok_or(BuildError::MissingToState)?)
        };

        Ok(TransitionDef {
            from,
            trigger,
            to,
            guard: self.guard,
            action: self.action,
            priority: self.priority,
        })
    }
}

impl<S: State, T: Trigger, C: Send + Sync + 'static> Default for TransitionBuilder<S, T, C> {
    fn default() -> Self {
        Self::new()
    }
}
