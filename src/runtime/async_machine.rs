//! Asynchronous machine instances.
//!
//! Every mutating entry point takes a single-slot gate, so transitions on
//! one instance never interleave. Queries skip the gate and read the last
//! published state, which may be mid-transition.
//!
//! Cancellation is checked while waiting for the gate and raced against
//! every callback. Cancelling during the guard leaves the state untouched.
//! Cancelling later stops the pass where it is; exits already ran and the
//! state may already be reassigned, and nothing is rolled back.

use super::definition::{MachineDefinition, Selection};
use super::exception::{directive_for, ExceptionContext, ExceptionDirective};
use super::extension::{MachineExtension, TransitionContext};
use super::transit::{Instance, Invocation, Transit};
use super::{FireOutcome, MachineError, TransitionStage};
use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::core::{Guard, Payload, State, StateId, Trigger};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A machine instance shared between tasks.
///
/// # Example
///
/// ```rust
/// use nestfsm::builder::{MachineBuilder, TransitionBuilder};
/// use nestfsm::runtime::AsyncStateMachine;
/// use nestfsm::{state_enum, trigger_enum};
///
/// state_enum! {
///     enum Job { Queued, Running }
/// }
///
/// trigger_enum! {
///     enum Event { Run }
/// }
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let definition = MachineBuilder::<Job, Event, ()>::new("job")
///     .asynchronous()
///     .initial(Job::Queued)
///     .transition(TransitionBuilder::new().from(Job::Queued).on(Event::Run).to(Job::Running))
///     .unwrap()
///     .build()
///     .unwrap();
///
/// let job = AsyncStateMachine::new(definition, ());
/// job.start().await.unwrap();
/// assert!(job.try_fire(&Event::Run).await.unwrap());
/// assert!(job.is_in(&Job::Running));
/// # });
/// ```
pub struct AsyncStateMachine<S, T, C> {
    id: Uuid,
    definition: Arc<MachineDefinition<S, T, C>>,
    context: Arc<C>,
    gate: Mutex<Instance>,
    current: AtomicUsize,
    started: AtomicBool,
    extensions: Vec<Arc<dyn MachineExtension<S, T>>>,
}

impl<S: State, T: Trigger, C: Send + Sync + 'static> AsyncStateMachine<S, T, C> {
    /// Create an unstarted instance.
    pub fn new(definition: Arc<MachineDefinition<S, T, C>>, context: C) -> Self {
        Self::with_shared_context(definition, Arc::new(context))
    }

    /// Create an unstarted instance over a context shared with other owners.
    pub fn with_shared_context(definition: Arc<MachineDefinition<S, T, C>>, context: Arc<C>) -> Self {
        let instance = Instance::new(definition.table());
        Self::from_instance(Uuid::new_v4(), definition, context, instance)
    }

    /// Rebuild an instance from a checkpoint taken on the same machine.
    pub fn restore(
        definition: Arc<MachineDefinition<S, T, C>>,
        context: C,
        checkpoint: &Checkpoint,
    ) -> Result<Self, CheckpointError> {
        let instance = checkpoint.instance(definition.table())?;
        Ok(Self::from_instance(
            checkpoint.id,
            definition,
            Arc::new(context),
            instance,
        ))
    }

    fn from_instance(
        id: Uuid,
        definition: Arc<MachineDefinition<S, T, C>>,
        context: Arc<C>,
        instance: Instance,
    ) -> Self {
        Self {
            id,
            definition,
            context,
            current: AtomicUsize::new(instance.current.index()),
            started: AtomicBool::new(instance.started),
            gate: Mutex::new(instance),
            extensions: Vec::new(),
        }
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

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> Option<StateId> {
        self.is_started()
            .then(|| StateId::new(self.current.load(Ordering::Acquire)))
    }

    fn publish(&self, instance: &Instance) {
        self.current.store(instance.current.index(), Ordering::Release);
        self.started.store(instance.started, Ordering::Release);
    }

    async fn acquire(
        &self,
        token: &CancellationToken,
    ) -> Result<MutexGuard<'_, Instance>, MachineError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(MachineError::Cancelled {
                stage: TransitionStage::Gate,
                state_changed: false,
            }),
            instance = self.gate.lock() => Ok(instance),
        }
    }

    /// Current leaf state, or `None` before `start`.
    pub fn current_state(&self) -> Option<&S> {
        self.snapshot().map(|id| self.definition.state(id))
    }

    pub async fn start(&self) -> Result<(), MachineError> {
        self.start_with(&CancellationToken::new()).await
    }

    /// Enter the initial state. Starting twice is a no-op.
    pub async fn start_with(&self, token: &CancellationToken) -> Result<(), MachineError> {
        if self.is_started() {
            return Ok(());
        }
        let mut instance = self.acquire(token).await?;
        if instance.started {
            return Ok(());
        }

        let definition = Arc::clone(&self.definition);
        let mut transit = instance.begin(definition.table());
        self.publish(&instance);
        let initial = definition.table().initial();
        self.run(
            &definition,
            &mut transit,
            &mut instance,
            Pass {
                trigger: None,
                payload: None,
                from: initial,
                to: initial,
            },
            token,
        )
        .await?;

        info!(
            machine = %definition.name(),
            instance = %self.id,
            state = %definition.state(instance.current).name(),
            "machine started"
        );
        Ok(())
    }

    pub async fn try_fire(&self, trigger: &T) -> Result<bool, MachineError> {
        self.process(trigger, None, &CancellationToken::new())
            .await
            .map(FireOutcome::fired)
    }

    /// Same contract as [`StateMachine::try_fire_with`].
    ///
    /// [`StateMachine::try_fire_with`]: super::StateMachine::try_fire_with
    pub async fn try_fire_with(
        &self,
        trigger: &T,
        payload: Payload,
    ) -> Result<bool, MachineError> {
        self.try_fire_with_token(trigger, Some(payload), &CancellationToken::new())
            .await
    }

    /// Fire with an optional payload, aborting when `token` is cancelled.
    pub async fn try_fire_with_token(
        &self,
        trigger: &T,
        payload: Option<Payload>,
        token: &CancellationToken,
    ) -> Result<bool, MachineError> {
        self.process(trigger, payload, token)
            .await
            .map(FireOutcome::fired)
    }

    /// Fire `trigger`, failing when no transition ran.
    pub async fn fire(&self, trigger: &T) -> Result<(), MachineError> {
        self.fire_with_token(trigger, None, &CancellationToken::new())
            .await
    }

    pub async fn fire_with(&self, trigger: &T, payload: Payload) -> Result<(), MachineError> {
        self.fire_with_token(trigger, Some(payload), &CancellationToken::new())
            .await
    }

    /// Cancellable [`fire`](Self::fire); the payload is optional.
    pub async fn fire_with_token(
        &self,
        trigger: &T,
        payload: Option<Payload>,
        token: &CancellationToken,
    ) -> Result<(), MachineError> {
        let outcome = self.process(trigger, payload, token).await?;
        let state = self
            .snapshot()
            .map(|id| self.definition.state(id).name().to_string())
            .unwrap_or_default();
        let trigger = trigger.name().to_string();
        match outcome {
            FireOutcome::Transitioned | FireOutcome::Internal => Ok(()),
            FireOutcome::GuardRejected => Err(MachineError::GuardRejected { state, trigger }),
            FireOutcome::NoTransition | FireOutcome::PayloadMismatch => {
                Err(MachineError::NoTransition { state, trigger })
            }
        }
    }

    /// Run the full fire protocol under the gate.
    pub async fn process(
        &self,
        trigger: &T,
        payload: Option<Payload>,
        token: &CancellationToken,
    ) -> Result<FireOutcome, MachineError> {
        let mut instance = self.acquire(token).await?;
        if !instance.started {
            return Err(MachineError::NotStarted);
        }
        let definition = Arc::clone(&self.definition);
        let from = instance.current;

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
        let payload = definition.effective(payload.as_ref());

        let hook = TransitionContext::new(
            self.id,
            definition.state(from).clone(),
            definition.declared_target(route).clone(),
            trigger.clone(),
        );
        for extension in &self.extensions {
            extension.before_transition(&hook);
        }

        let passed = match definition.guard(route.transition) {
            None => true,
            Some(guard) => {
                for extension in &self.extensions {
                    extension.guard_evaluation(&hook, guard.name());
                }
                let Some(passed) = self.guard_passes(guard, payload, token).await else {
                    for extension in &self.extensions {
                        extension.after_transition(&hook, false);
                    }
                    return Err(MachineError::Cancelled {
                        stage: TransitionStage::Guard,
                        state_changed: false,
                    });
                };
                for extension in &self.extensions {
                    extension.guard_evaluated(&hook, guard.name(), passed);
                }
                passed
            }
        };
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
        let pass = Pass {
            trigger: Some(trigger),
            payload,
            from,
            to: plan.to,
        };
        let result = self
            .run(&definition, &mut transit, &mut instance, pass, token)
            .await;
        for extension in &self.extensions {
            extension.after_transition(&hook, result.is_ok());
        }
        result?;

        info!(
            machine = %definition.name(),
            instance = %self.id,
            from = %definition.state(from).name(),
            to = %definition.state(instance.current).name(),
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

    /// Evaluate a guard. `None` when cancelled; errors count as `false`.
    async fn guard_passes(
        &self,
        guard: &Guard<C>,
        payload: Option<&Payload>,
        token: &CancellationToken,
    ) -> Option<bool> {
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            outcome = guard.call(&self.context, payload, token) => Some(outcome),
        }?;
        match outcome {
            Some(Ok(passed)) => Some(passed),
            Some(Err(_)) if token.is_cancelled() => None,
            Some(Err(error)) => {
                warn!(
                    machine = %self.definition.name(),
                    instance = %self.id,
                    guard = %guard.name(),
                    %error,
                    "guard failed with error"
                );
                Some(false)
            }
            None => {
                debug!(
                    machine = %self.definition.name(),
                    instance = %self.id,
                    guard = %guard.name(),
                    "guard skipped without matching payload"
                );
                Some(false)
            }
        }
    }

    async fn run(
        &self,
        definition: &MachineDefinition<S, T, C>,
        transit: &mut Transit<'_>,
        instance: &mut Instance,
        pass: Pass<'_, T>,
        token: &CancellationToken,
    ) -> Result<(), MachineError> {
        loop {
            let next = transit.next(instance);
            self.publish(instance);
            let Some(invocation) = next else {
                return Ok(());
            };
            let Some(callback) = definition.callback_for(invocation) else {
                continue;
            };
            let stage = invocation.stage();
            let cancelled = MachineError::Cancelled {
                stage,
                state_changed: transit.assigned(),
            };
            let payload = match invocation {
                Invocation::Exit(_) => None,
                _ => pass.payload,
            };
            debug!(
                machine = %definition.name(),
                instance = %self.id,
                %stage,
                callback = %callback.name(),
                "invoking callback"
            );

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                outcome = callback.call(&self.context, payload, token) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                return Err(cancelled);
            };
            let Some(Err(error)) = outcome else {
                continue;
            };
            if token.is_cancelled() {
                return Err(cancelled);
            }

            let state = match invocation {
                Invocation::Exit(state) | Invocation::Entry(state) => state,
                Invocation::Action(_) => instance.current,
            };
            let context = ExceptionContext {
                machine: definition.name(),
                instance_id: self.id,
                from: definition.state(pass.from),
                to: definition.state(pass.to),
                trigger: pass.trigger,
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
    }

    /// Whether `trigger` would fire now. Does not take the gate.
    pub async fn can_fire(&self, trigger: &T) -> bool {
        self.evaluate(trigger, None).await
    }

    pub async fn can_fire_with(&self, trigger: &T, payload: &Payload) -> bool {
        self.evaluate(trigger, Some(payload)).await
    }

    async fn evaluate(&self, trigger: &T, payload: Option<&Payload>) -> bool {
        let Some(current) = self.snapshot() else {
            return false;
        };
        let route = match self.definition.select(current, trigger, payload) {
            Selection::Route(route) => route,
            Selection::NoRoute | Selection::PayloadMismatch => return false,
        };
        match self.definition.guard(route.transition) {
            None => true,
            Some(guard) => {
                let payload = self.definition.effective(payload);
                self.guard_passes(guard, payload, &CancellationToken::new())
                    .await
                    .unwrap_or(false)
            }
        }
    }

    /// Triggers whose guards currently pass, in declaration order.
    pub async fn permitted_triggers(&self) -> Vec<T> {
        let mut permitted = Vec::new();
        for trigger in self.definition.triggers() {
            if self.can_fire(trigger).await {
                permitted.push(trigger.clone());
            }
        }
        permitted
    }

    /// Whether any transition handles `trigger` from here, ignoring guards.
    pub fn has_transition(&self, trigger: &T) -> bool {
        self.snapshot().is_some_and(|current| {
            self.definition
                .table()
                .route(current, trigger.name())
                .is_some()
        })
    }

    /// Triggers with a transition from here, ignoring guards.
    pub fn defined_triggers(&self) -> Vec<T> {
        let Some(current) = self.snapshot() else {
            return Vec::new();
        };
        self.definition
            .table()
            .triggers_from(current)
            .into_iter()
            .filter_map(|name| self.definition.trigger(name).cloned())
            .collect()
    }

    /// Whether `state` is the current leaf or one of its ancestors.
    pub fn is_in(&self, state: &S) -> bool {
        match (self.snapshot(), self.definition.id_of(state)) {
            (Some(current), Some(id)) => self
                .definition
                .table()
                .index()
                .is_ancestor_or_self(id, current),
            _ => false,
        }
    }

    /// Root-to-leaf path of the current state.
    pub fn active_path(&self) -> Vec<S> {
        let Some(current) = self.snapshot() else {
            return Vec::new();
        };
        self.definition
            .table()
            .index()
            .path_from_root(current)
            .into_iter()
            .map(|id| self.definition.state(id).clone())
            .collect()
    }

    pub fn dump_active_path(&self) -> String {
        let Some(current) = self.snapshot() else {
            return String::new();
        };
        let path = self.definition.table().index().path_from_root(current);
        self.definition.dump(&path)
    }

    /// Snapshot current state and history memory, waiting for any
    /// in-flight transition to finish.
    pub async fn checkpoint(&self) -> Checkpoint {
        let instance = self.gate.lock().await;
        Checkpoint::capture(self.id, self.definition.table(), &instance)
    }
}

/// Per-fire values the callback loop needs.
struct Pass<'a, T> {
    trigger: Option<&'a T>,
    payload: Option<&'a Payload>,
    from: StateId,
    to: StateId,
}
