//! Builder for constructing machine definitions.

use crate::builder::error::BuildError;
use crate::builder::state::StateBuilder;
use crate::builder::transition::{TransitionBuilder, TransitionDef};
use crate::core::{Callback, PayloadType, State, Trigger};
use crate::model::{MachineConfig, Model, TransitionDecl};
use crate::plan::PlanTable;
use crate::runtime::{ExceptionContext, ExceptionDirective, ExceptionHandler, MachineDefinition};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for constructing machine definitions with a fluent API.
///
/// States referenced by the initial state, a parent or a transition but
/// never declared with [`state`](Self::state) are declared as plain
/// states, after the explicit ones.
pub struct MachineBuilder<S: State, T: Trigger, C> {
    name: String,
    initial: Option<S>,
    states: Vec<StateBuilder<S, C>>,
    transitions: Vec<TransitionDef<S, T, C>>,
    hierarchy: bool,
    asynchronous: bool,
    payloads: bool,
    continue_on_captured_context: bool,
    payload_types: HashMap<String, PayloadType>,
    default_payload: Option<PayloadType>,
    exception_handler: Option<ExceptionHandler<S, T>>,
}

impl<S: State, T: Trigger, C: Send + Sync + 'static> MachineBuilder<S, T, C> {
    /// Create a new builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: None,
            states: Vec::new(),
            transitions: Vec::new(),
            hierarchy: false,
            asynchronous: false,
            payloads: false,
            continue_on_captured_context: false,
            payload_types: HashMap::new(),
            default_payload: None,
            exception_handler: None,
        }
    }

    /// Set the initial state (required). A composite resolves to a leaf on start.
    pub fn initial(mut self, state: S) -> Self {
        self.initial = Some(state);
        self
    }

    /// Declare a state with its hierarchy position and callbacks.
    pub fn state(mut self, state: StateBuilder<S, C>) -> Self {
        self.states.push(state);
        self
    }

    /// Add a transition using a builder.
    /// Returns an error if the builder fails validation.
    pub fn transition(mut self, builder: TransitionBuilder<S, T, C>) -> Result<Self, BuildError> {
        let transition = builder.build()?;
        self.transitions.push(transition);
        Ok(self)
    }

    /// Add a pre-built transition.
    pub fn add_transition(mut self, transition: TransitionDef<S, T, C>) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Plan with LCA-based chains even without nested states.
    pub fn hierarchical(mut self) -> Self {
        self.hierarchy = true;
        self
    }

    /// Allow asynchronous callbacks; instances must be `AsyncStateMachine`s.
    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    pub fn with_payloads(mut self) -> Self {
        self.payloads = true;
        self
    }

    /// Declare the payload type `trigger` carries. Enables payloads.
    pub fn trigger_payload<P: Any + Send + Sync>(mut self, trigger: T) -> Self {
        self.payload_types
            .insert(trigger.name().to_string(), PayloadType::of::<P>());
        self.payloads = true;
        self
    }

    /// Payload type for triggers without their own. Enables payloads.
    pub fn default_payload<P: Any + Send + Sync>(mut self) -> Self {
        self.default_payload = Some(PayloadType::of::<P>());
        self.payloads = true;
        self
    }

    /// Recorded in the model for renderers; instances ignore it.
    pub fn continue_on_captured_context(mut self, enabled: bool) -> Self {
        self.continue_on_captured_context = enabled;
        self
    }

    /// Decide what happens when an action, entry or exit callback fails.
    pub fn on_exception<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ExceptionContext<'_, S, T>) -> ExceptionDirective + Send + Sync + 'static,
    {
        self.exception_handler = Some(Arc::new(handler));
        self
    }

    /// Callback-free model of everything declared so far.
    pub fn model(&self) -> Model {
        let states = self
            .states
            .iter()
            .map(StateBuilder::decl)
            .chain(
                self.implicit_states()
                    .into_iter()
                    .map(|s| StateBuilder::<S, C>::new(s).decl()),
            )
            .collect();

        let transitions = self
            .transitions
            .iter()
            .map(|t| TransitionDecl {
                from: t.from.name().to_string(),
                trigger: t.trigger.name().to_string(),
                to: t.to.as_ref().map(|s| s.name().to_string()),
                guard: t.guard.as_ref().map(Callback::reference),
                action: t.action.as_ref().map(Callback::reference),
                priority: t.priority,
                internal: t.is_internal(),
                payload_type: self
                    .payload_types
                    .get(t.trigger.name())
                    .or(self.default_payload.as_ref())
                    .map(|p| p.name().to_string()),
            })
            .collect();

        Model {
            name: self.name.clone(),
            initial: self.initial.as_ref().map(|s| s.name().to_string()),
            states,
            transitions,
            config: MachineConfig {
                hierarchy: self.hierarchy,
                asynchronous: self.asynchronous,
                payloads: self.payloads,
                continue_on_captured_context: self.continue_on_captured_context,
            },
            default_payload: self.default_payload.map(|p| p.name().to_string()),
        }
    }

    /// Referenced but undeclared states, in order of first reference.
    fn implicit_states(&self) -> Vec<S> {
        let parents = self.states.iter().filter_map(|b| b.parent.clone());
        let endpoints = self
            .transitions
            .iter()
            .flat_map(|t| std::iter::once(t.from.clone()).chain(t.to.clone()));

        let mut implicit: Vec<S> = Vec::new();
        for state in self.initial.clone().into_iter().chain(parents).chain(endpoints) {
            if !self.states.iter().any(|b| b.state == state) && !implicit.contains(&state) {
                implicit.push(state);
            }
        }
        implicit
    }

    /// Validate, plan every transition and bind the callbacks.
    /// Returns every structural violation at once.
    pub fn build(self) -> Result<Arc<MachineDefinition<S, T, C>>, BuildError> {
        let table = PlanTable::build(self.model())?;
        let implicit = self.implicit_states();

        let MachineBuilder {
            mut states,
            transitions,
            payload_types,
            default_payload,
            exception_handler,
            ..
        } = self;
        states.extend(implicit.into_iter().map(StateBuilder::new));

        let mut triggers: Vec<T> = Vec::new();
        let mut guards = Vec::with_capacity(transitions.len());
        let mut actions = Vec::with_capacity(transitions.len());
        for transition in transitions {
            if !triggers.contains(&transition.trigger) {
                triggers.push(transition.trigger);
            }
            guards.push(transition.guard);
            actions.push(transition.action);
        }

        let mut ordered = Vec::with_capacity(states.len());
        let mut on_entry = Vec::with_capacity(states.len());
        let mut on_exit = Vec::with_capacity(states.len());
        for builder in states {
            ordered.push(builder.state);
            on_entry.push(builder.on_entry);
            on_exit.push(builder.on_exit);
        }

        Ok(Arc::new(MachineDefinition {
            table,
            states: ordered,
            triggers,
            guards,
            actions,
            on_entry,
            on_exit,
            payload_types,
            default_payload,
            exception_handler,
        }))
    }
}
