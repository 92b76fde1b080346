//! Callback-free description of a machine.
//!
//! A [`Model`] is what the planner consumes. The typed builder produces
//! one, but it can equally be loaded from JSON so a renderer can compute
//! plans without any user types.

use crate::core::{HistoryMode, StructuralError};
use serde::{Deserialize, Serialize};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

/// Name and shape of a callback, without its body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRef {
    pub name: String,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub accepts_payload: bool,
    #[serde(default = "default_true")]
    pub has_plain: bool,
}

fn default_true() -> bool {
    true
}

impl CallbackRef {
    /// Parameterless synchronous callback reference.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_async: false,
            accepts_payload: false,
            has_plain: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Initial child of its parent. Ignored on root states.
    #[serde(default)]
    pub initial: bool,
    #[serde(default)]
    pub history: HistoryMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_entry: Option<CallbackRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exit: Option<CallbackRef>,
}

impl StateDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            initial: false,
            history: HistoryMode::None,
            on_entry: None,
            on_exit: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    pub fn with_history(mut self, mode: HistoryMode) -> Self {
        self.history = mode;
        self
    }

    pub fn with_entry(mut self, callback: CallbackRef) -> Self {
        self.on_entry = Some(callback);
        self
    }

    pub fn with_exit(mut self, callback: CallbackRef) -> Self {
        self.on_exit = Some(callback);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionDecl {
    pub from: String,
    pub trigger: String,
    /// Target state; absent for internal transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<CallbackRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<CallbackRef>,
    /// Higher wins among transitions sharing `(from, trigger)`.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub internal: bool,
    /// Declared payload type name for the trigger, for renderers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_type: Option<String>,
}

impl TransitionDecl {
    pub fn external(
        from: impl Into<String>,
        trigger: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            trigger: trigger.into(),
            to: Some(to.into()),
            guard: None,
            action: None,
            priority: 0,
            internal: false,
            payload_type: None,
        }
    }

    pub fn internal(from: impl Into<String>, trigger: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            trigger: trigger.into(),
            to: None,
            guard: None,
            action: None,
            priority: 0,
            internal: true,
            payload_type: None,
        }
    }

    pub fn with_guard(mut self, guard: CallbackRef) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_action(mut self, action: CallbackRef) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Machine-level switches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Plan with LCA-based chains. Implied when any state declares a parent.
    #[serde(default)]
    pub hierarchy: bool,
    #[serde(default)]
    pub asynchronous: bool,
    #[serde(default)]
    pub payloads: bool,
    /// Continuation policy for renderers targeting runtimes with a
    /// captured execution context.
    #[serde(default)]
    pub continue_on_captured_context: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub initial: Option<String>,
    pub states: Vec<StateDecl>,
    #[serde(default)]
    pub transitions: Vec<TransitionDecl>,
    #[serde(default)]
    pub config: MachineConfig,
    /// Payload type name used by triggers without their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_payload: Option<String>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: None,
            states: Vec::new(),
            transitions: Vec::new(),
            config: MachineConfig::default(),
            default_payload: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn hierarchy_enabled(&self) -> bool {
        self.config.hierarchy || self.states.iter().any(|s| s.parent.is_some())
    }

    /// Model-level checks that complement the hierarchy checks.
    pub fn validate(&self) -> Validation<(), NonEmptyVec<StructuralError>> {
        let mut checks: Vec<Validation<(), NonEmptyVec<StructuralError>>> = Vec::new();
        let declared = |name: &str| self.states.iter().any(|s| s.name == name);

        if self.states.is_empty() {
            checks.push(Validation::fail(StructuralError::NoStates));
        }

        match &self.initial {
            None => checks.push(Validation::fail(StructuralError::MissingInitialState)),
            Some(initial) if !declared(initial) => {
                checks.push(Validation::fail(StructuralError::UnknownState {
                    context: "initial state".to_string(),
                    state: initial.clone(),
                }))
            }
            Some(_) => {}
        }

        for t in &self.transitions {
            let context = format!("transition '{}' on '{}'", t.from, t.trigger);
            if !declared(&t.from) {
                checks.push(Validation::fail(StructuralError::UnknownState {
                    context: context.clone(),
                    state: t.from.clone(),
                }));
            }
            match &t.to {
                Some(to) if !t.internal && !declared(to) => {
                    checks.push(Validation::fail(StructuralError::UnknownState {
                        context,
                        state: to.clone(),
                    }));
                }
                None if !t.internal => {
                    checks.push(Validation::fail(StructuralError::MissingTarget {
                        from: t.from.clone(),
                        trigger: t.trigger.clone(),
                    }));
                }
                _ => {}
            }
        }

        for state in &self.states {
            if let Some(exit) = &state.on_exit {
                if exit.accepts_payload {
                    checks.push(Validation::fail(StructuralError::ExitExpectsPayload {
                        state: state.name.clone(),
                        callback: exit.name.clone(),
                    }));
                }
            }
        }

        for callback in self.callbacks() {
            if callback.is_async && !self.config.asynchronous {
                checks.push(Validation::fail(
                    StructuralError::AsyncCallbackOnSyncMachine {
                        callback: callback.name.clone(),
                    },
                ));
            }
            if callback.accepts_payload && !self.config.payloads {
                checks.push(Validation::fail(
                    StructuralError::PayloadCallbackWithoutPayloadSupport {
                        callback: callback.name.clone(),
                    },
                ));
            }
        }

        Validation::all_vec(checks).map(|_| ())
    }

    /// Every callback reference, states first, then transitions.
    pub fn callbacks(&self) -> impl Iterator<Item = &CallbackRef> {
        let states = self
            .states
            .iter()
            .flat_map(|s| s.on_entry.iter().chain(s.on_exit.iter()));
        let transitions = self
            .transitions
            .iter()
            .flat_map(|t| t.guard.iter().chain(t.action.iter()));
        states.chain(transitions)
    }
}
