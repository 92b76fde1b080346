//! Synchronous machine instances.

use super::definition::{MachineDefinition, Selection};
use super::exception::{directive_for, ExceptionContext, ExceptionDirective};
use super::extension::{MachineExtension, TransitionContext};
use super::transit::{Instance, Invocation, Transit};
use super::{FireOutcome, MachineError};
use crate::builder::BuildError;
use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::core::{Payload, State, StateId, Trigger};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A machine instance driven from one thread at a time.
///
/// Nothing here locks: the caller serializes access. Every callback runs
/// inline on the calling thread.
///
/// # Example
///
/// ```rust
/// use nestfsm::builder::{MachineBuilder, TransitionBuilder};
/// use nestfsm::runtime::StateMachine;
/// use nestfsm::{state_enum, trigger_enum};
///
/// state_enum! {
///     enum Door { Closed, Open }
/// }
///
/// trigger_enum! {
///     enum Push { Open, Close }
/// }
///
/// let definition = MachineBuilder::<Door, Push, ()>::new("door")
///     .initial(Door::Closed)
///     .transition(TransitionBuilder::new().from(Door::Closed).on(Push::Open).to(Door::Open))
///     .unwrap()
///     .build()
///     .unwrap();
///
/// let mut door = StateMachine::new(definition, ()).unwrap();
/// door.start().unwrap();
/// assert!(door.try_fire(&Push::Open).unwrap());
/// assert!(door.is_in(&Door::Open));
/// assert!(!door.can_fire(&Push::Close));
/// ```
pub struct StateMachine<S, T, C> {
    id: Uuid,
    definition: Arc<MachineDefinition<S, T, C>>,
    context: C,
    instance: Instance,
    extensions: Vec<Arc<dyn MachineExtension<S, T>>>,
}

fn ensure_synchronous<S: State, T: Trigger, C>(
    definition: &MachineDefinition<S, T, C>,
) -> Result<(), BuildError> {
    if definition.is_asynchronous() {
        return Err(BuildError::SchedulingMismatch {
            machine: definition.name().to_string(),
            asynchronous: true,
        });
    }
    Ok(())
}

impl<S: State, T: Trigger, C> StateMachine<S, T, C> {
    /// Create an unstarted instance.
    ///
    /// Fails with [`BuildError::SchedulingMismatch`] when the definition was
    /// built `asynchronous()`; such machines run on [`AsyncStateMachine`].
    ///
    /// [`AsyncStateMachine`]: super::AsyncStateMachine
    pub fn new(
        definition: Arc<MachineDefinition<S, T, C>>,
        context: C,
    ) -> Result<Self, BuildError> {
        ensure_synchronous(&definition)?;
        let instance = Instance::new(definition.table());
        Ok(Self {
            id: Uuid::new_v4(),
            definition,
            context,
            instance,
            extensions: Vec::new(),
        })
    }

    /// Rebuild an instance from a checkpoint taken on the same machine.
    pub fn restore(
        definition: Arc<MachineDefinition<S, T, C>>,
        context: C,
        checkpoint: &Checkpoint,
    ) -> Result<Self, CheckpointError> {
        ensure_synchronous(&definition)?;
        let instance = checkpoint.instance(definition.table())?;
        Ok(Self {
            id: checkpoint.id,
            definition,
            context,
            instance,
            extensions: Vec::new(),
        })
    }

    pub fn with_extension(mut self, extension: Arc<dyn MachineExtension<S, T>>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn instance_id(&self) -> Uuid {
        self.id
    }

    pub fn definition(&self) -> &Arc<MachineDefinition<S, T, C>> {
        &self.definition
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn is_started(&self) -> bool {
        self.instance.started
    }

    /// Current leaf state, or `None` before `start`.
    pub fn current_state(&self) -> Option<&S> {
        self.instance
            .started
            .then(|| self.definition.state(self.instance.current))
    }

    /// Enter the initial state. Starting twice is a no-op.
    pub fn start(&mut self) -> Result<(), MachineError> {
        if self.instance.started {
            return Ok(());
        }
        let definition = Arc::clone(&self.definition);
        let mut transit = self.instance.begin(definition.table());
        let initial = definition.table().initial();
        self.run(&definition, &mut transit, None, None, initial, initial)?;
        info!(
            machine = %definition.name(),
            instance = %self.id,
            state = %definition.state(self.instance.current).name(),
            "machine started"
        );
        Ok(())
    }

    /// Fire `trigger`; `Ok(false)` when nothing fired.
    pub fn try_fire(&mut self, trigger: &T) -> Result<bool, MachineError> {
        self.process(trigger, None).map(FireOutcome::fired)
    }

    pub fn try_fire_with(&mut self, trigger: &T, payload: Payload) -> Result<bool, MachineError> {
        self.process(trigger, Some(payload)).map(FireOutcome::fired)
    }

    /// Fire `trigger`, failing when no transition ran.
    pub fn fire(&mut self, trigger: &T) -> Result<(), MachineError> {
        let outcome = self.process(trigger, None)?;
        self.require(trigger, outcome)
    }

    pub fn fire_with(&mut self, trigger: &T, payload: Payload) -> Result<(), MachineError> {
        let outcome = self.process(trigger, Some(payload))?;
        self.require(trigger, outcome)
    }

    fn require(&self, trigger: &T, outcome: FireOutcome) -> Result<(), MachineError> {
        let state = self.definition.state(self.instance.current).name().to_string();
        let trigger = trigger.name().to_string();
        match outcome {
            FireOutcome::Transitioned | FireOutcome::Internal => Ok(()),
            FireOutcome::GuardRejected => Err(MachineError::GuardRejected { state, trigger }),
            FireOutcome::NoTransition | FireOutcome::PayloadMismatch => {
                Err(MachineError::NoTransition { state, trigger })
            }
        }
    }

    /// Run the full fire protocol and report what happened.
    pub fn process(
        &mut self,
        trigger: &T,
        payload: Option<Payload>,
    ) -> Result<FireOutcome, MachineError> {
        if !self.instance.started {
            return Err(MachineError::NotStarted);
        }
        let definition = Arc::clone(&self.definition);
        let from = self.instance.current;

        let route = match definition.select(from, trigger, payload.as_ref()) {
            Selection::Route(route) => route,
            Selection::NoRoute => {
                debug!(
                    machine = %definition.name(),
                    instance = %self.id,
                    state = %definition.state(from).name(),
                    trigger = %trigger.name(),
                    "no transition"
                );
                return Ok(FireOutcome::NoTransition);
            }
            Selection::PayloadMismatch => {
                warn!(
                    machine = %definition.name(),
                    instance = %self.id,
                    trigger = %trigger.name(),
                    "payload type does not match trigger"
                );
                return Ok(FireOutcome::PayloadMismatch);
            }
        };

        let hook = TransitionContext::new(
            self.id,
            definition.state(from).clone(),
            definition.declared_target(route).clone(),
            trigger.clone(),
        );
        for extension in &self.extensions {
            extension.before_transition(&hook);
        }

        let guard = definition.guard(route.transition).map(|g| g.name());
        if let Some(name) = guard {
            for extension in &self.extensions {
                extension.guard_evaluation(&hook, name);
            }
        }
        let passed =
            definition.guard_passes_sync(route.transition, &self.context, payload.as_ref(), self.id);
        if let Some(name) = guard {
            for extension in &self.extensions {
                extension.guard_evaluated(&hook, name, passed);
            }
        }
        if !passed {
            warn!(
                machine = %definition.name(),
                instance = %self.id,
                state = %definition.state(from).name(),
                trigger = %trigger.name(),
                "guard rejected transition"
            );
            for extension in &self.extensions {
                extension.after_transition(&hook, false);
            }
            return Ok(FireOutcome::GuardRejected);
        }

        let plan = definition.table().plan(route.transition);
        let mut transit = Transit::new(definition.table(), route, from);
        let payload = definition.effective(payload.as_ref());
        let result = self.run(&definition, &mut transit, Some(trigger), payload, from, plan.to);
        for extension in &self.extensions {
            extension.after_transition(&hook, result.is_ok());
        }
        result?;

        info!(
            machine = %definition.name(),
            instance = %self.id,
            from = %definition.state(from).name(),
            to = %definition.state(self.instance.current).name(),
            trigger = %trigger.name(),
            internal = plan.is_internal,
            "transition completed"
        );
        Ok(if plan.is_internal {
            FireOutcome::Internal
        } else {
            FireOutcome::Transitioned
        })
    }

    fn run(
        &mut self,
        definition: &MachineDefinition<S, T, C>,
        transit: &mut Transit<'_>,
        trigger: Option<&T>,
        payload: Option<&Payload>,
        from: StateId,
        to: StateId,
    ) -> Result<(), MachineError> {
        while let Some(invocation) = transit.next(&mut self.instance) {
            let Some(callback) = definition.callback_for(invocation) else {
                continue;
            };
            let stage = invocation.stage();
            let payload = match invocation {
                Invocation::Exit(_) => None,
                _ => payload,
            };
            debug!(
                machine = %definition.name(),
                instance = %self.id,
                %stage,
                callback = %callback.name(),
                "invoking callback"
            );

            let Some(Err(error)) = callback.call_sync(&self.context, payload) else {
                continue;
            };
            let state = match invocation {
                Invocation::Exit(state) | Invocation::Entry(state) => state,
                Invocation::Action(_) => self.instance.current,
            };
            let context = ExceptionContext {
                machine: definition.name(),
                instance_id: self.id,
                from: definition.state(from),
                to: definition.state(to),
                trigger,
                stage,
                callback: callback.name(),
                state_changed: transit.assigned(),
                error: &error,
            };
            match directive_for(definition.exception_handler.as_ref(), &context) {
                ExceptionDirective::Continue => {
                    warn!(
                        machine = %definition.name(),
                        instance = %self.id,
                        %stage,
                        callback = %callback.name(),
                        %error,
                        "callback error ignored"
                    );
                }
                ExceptionDirective::Propagate => {
                    return Err(MachineError::Callback {
                        stage,
                        callback: callback.name().to_string(),
                        state: definition.state(state).name().to_string(),
                        source: error,
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether `trigger` would fire now. Guard errors count as `false`.
    pub fn can_fire(&self, trigger: &T) -> bool {
        self.evaluate(trigger, None)
    }

    pub fn can_fire_with(&self, trigger: &T, payload: &Payload) -> bool {
        self.evaluate(trigger, Some(payload))
    }

    fn evaluate(&self, trigger: &T, payload: Option<&Payload>) -> bool {
        if !self.instance.started {
            return false;
        }
        match self.definition.select(self.instance.current, trigger, payload) {
            Selection::Route(route) => self.definition.guard_passes_sync(
                route.transition,
                &self.context,
                payload,
                self.id,
            ),
            Selection::NoRoute | Selection::PayloadMismatch => false,
        }
    }

    /// Triggers whose guards currently pass, in declaration order.
    pub fn permitted_triggers(&self) -> Vec<T> {
        self.definition
            .triggers()
            .iter()
            .filter(|t| self.can_fire(t))
            .cloned()
            .collect()
    }

    /// Whether any transition handles `trigger` from here, ignoring guards.
    pub fn has_transition(&self, trigger: &T) -> bool {
        self.instance.started
            && self
                .definition
                .table()
                .route(self.instance.current, trigger.name())
                .is_some()
    }

    /// Triggers with a transition from here, ignoring guards.
    pub fn defined_triggers(&self) -> Vec<T> {
        if !self.instance.started {
            return Vec::new();
        }
        self.definition
            .table()
            .triggers_from(self.instance.current)
            .into_iter()
            .filter_map(|name| self.definition.trigger(name).cloned())
            .collect()
    }

    /// Whether `state` is the current leaf or one of its ancestors.
    pub fn is_in(&self, state: &S) -> bool {
        self.instance.started
            && self.definition.id_of(state).is_some_and(|id| {
                self.definition
                    .table()
                    .index()
                    .is_ancestor_or_self(id, self.instance.current)
            })
    }

    /// Root-to-leaf path of the current state.
    pub fn active_path(&self) -> Vec<S> {
        if !self.instance.started {
            return Vec::new();
        }
        self.definition
            .table()
            .index()
            .path_from_root(self.instance.current)
            .into_iter()
            .map(|id| self.definition.state(id).clone())
            .collect()
    }

    /// Debug rendering of the active path, e.g. `Work / Work_S1 / Work_S1_Calc`.
    pub fn dump_active_path(&self) -> String {
        if !self.instance.started {
            return String::new();
        }
        let path = self
            .definition
            .table()
            .index()
            .path_from_root(self.instance.current);
        self.definition.dump(&path)
    }

    /// Snapshot current state and history memory.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::capture(self.id, self.definition.table(), &self.instance)
    }
}
