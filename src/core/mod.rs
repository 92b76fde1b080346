//! Core types shared by the planner and the execution core.
//!
//! - State and trigger traits for user types
//! - The hierarchy index built from declared states
//! - Per-instance history memory and composite entry resolution
//! - Callbacks and the guard/payload resolver
//!
//! Everything here except callback invocation is pure.

mod guard;
mod hierarchy;
mod history;
mod state;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use guard::{
    resolve, Action, Callback, CallbackError, CallbackResult, Dispatch, Guard, InvocationError,
    Payload, PayloadType,
};
pub use hierarchy::{Ancestors, DenseArrays, HierarchyIndex, StructuralError};
pub use history::{resolve_composite, HistoryMemory};
pub use state::{State, Trigger};

/// Dense index of a declared state, assigned in declaration order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(usize);

impl StateId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// History policy of a composite state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum HistoryMode {
    /// Always re-enter through the initial child.
    #[default]
    None,
    /// Remember the immediate child that was last active.
    Shallow,
    /// Remember the exact leaf that was last active.
    Deep,
}

impl HistoryMode {
    pub fn is_enabled(self) -> bool {
        !matches!(self, HistoryMode::None)
    }
}
