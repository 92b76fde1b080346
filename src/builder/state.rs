//! Builder for state declarations.

use crate::core::{Action, HistoryMode, State};
use crate::model::StateDecl;

/// Declares one state: its place in the hierarchy and its callbacks.
pub struct StateBuilder<S: State, C> {
    pub(crate) state: S,
    pub(crate) parent: Option<S>,
    pub(crate) initial: bool,
    pub(crate) history: HistoryMode,
    pub(crate) on_entry: Option<Action<C>>,
    pub(crate) on_exit: Option<Action<C>>,
}

impl<S: State, C> StateBuilder<S, C> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            parent: None,
            initial: false,
            history: HistoryMode::None,
            on_entry: None,
            on_exit: None,
        }
    }

    /// Nest this state under `parent`.
    pub fn parent(mut self, parent: S) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Mark this state as the initial child of its parent.
    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    /// History policy; only valid on composite states.
    pub fn history(mut self, mode: HistoryMode) -> Self {
        self.history = mode;
        self
    }

    pub fn on_entry(mut self, action: Action<C>) -> Self {
        self.on_entry = Some(action);
        self
    }

    /// Exit callbacks never receive a payload.
    pub fn on_exit(mut self, action: Action<C>) -> Self {
        self.on_exit = Some(action);
        self
    }

    pub(crate) fn decl(&self) -> StateDecl {
        StateDecl {
            name: self.state.name().to_string(),
            parent: self.parent.as_ref().map(|p| p.name().to_string()),
            initial: self.initial,
            history: self.history,
            on_entry: self.on_entry.as_ref().map(|a| a.reference()),
            on_exit: self.on_exit.as_ref().map(|a| a.reference()),
        }
    }
}
