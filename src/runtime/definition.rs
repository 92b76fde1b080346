//! Machine definitions: a plan table bound to user types and callbacks.

use super::exception::ExceptionHandler;
use super::transit::Invocation;
use crate::core::{Action, Guard, Payload, PayloadType, State, StateId, Trigger};
use crate::plan::{PlanTable, Route};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Everything shared by the instances of one machine.
///
/// Built once by [`MachineBuilder`](crate::builder::MachineBuilder) and
/// handed out behind an `Arc`. Callback vectors are indexed like the
/// plan table: per transition declaration and per `StateId`.
pub struct MachineDefinition<S, T, C> {
    pub(crate) table: PlanTable,
    pub(crate) states: Vec<S>,
    pub(crate) triggers: Vec<T>,
    pub(crate) guards: Vec<Option<Guard<C>>>,
    pub(crate) actions: Vec<Option<Action<C>>>,
    pub(crate) on_entry: Vec<Option<Action<C>>>,
    pub(crate) on_exit: Vec<Option<Action<C>>>,
    pub(crate) payload_types: HashMap<String, PayloadType>,
    pub(crate) default_payload: Option<PayloadType>,
    pub(crate) exception_handler: Option<ExceptionHandler<S, T>>,
}

/// How a trigger resolves against the current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Selection {
    NoRoute,
    PayloadMismatch,
    Route(Route),
}

impl<S: State, T: Trigger, C> MachineDefinition<S, T, C> {
    pub fn table(&self) -> &PlanTable {
        &self.table
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub fn is_asynchronous(&self) -> bool {
        self.table.model().config.asynchronous
    }

    pub fn accepts_payloads(&self) -> bool {
        self.table.model().config.payloads
    }

    /// The declared initial state, before composite resolution.
    pub fn initial_state(&self) -> &S {
        self.state(self.table.initial())
    }

    pub fn states(&self) -> &[S] {
        &self.states
    }

    pub(crate) fn state(&self, id: StateId) -> &S {
        &self.states[id.index()]
    }

    pub(crate) fn id_of(&self, state: &S) -> Option<StateId> {
        self.table.index().id_of(state.name())
    }

    /// Triggers used by at least one transition, in declaration order.
    pub fn triggers(&self) -> &[T] {
        &self.triggers
    }

    pub(crate) fn trigger(&self, name: &str) -> Option<&T> {
        self.triggers.iter().find(|t| t.name() == name)
    }

    /// Payload type a trigger carries, if payloads are enabled.
    pub fn expected_payload(&self, trigger: &T) -> Option<PayloadType> {
        if !self.accepts_payloads() {
            return None;
        }
        self.payload_types
            .get(trigger.name())
            .copied()
            .or(self.default_payload)
    }

    /// Drop payloads the machine was not configured to carry.
    pub(crate) fn effective<'p>(&self, payload: Option<&'p Payload>) -> Option<&'p Payload> {
        payload.filter(|_| self.accepts_payloads())
    }

    pub(crate) fn select(
        &self,
        current: StateId,
        trigger: &T,
        payload: Option<&Payload>,
    ) -> Selection {
        let Some(route) = self.table.route(current, trigger.name()) else {
            return Selection::NoRoute;
        };
        let mismatch = match (self.expected_payload(trigger), self.effective(payload)) {
            (Some(expected), Some(payload)) => !expected.matches(payload),
            _ => false,
        };
        if mismatch {
            Selection::PayloadMismatch
        } else {
            Selection::Route(route)
        }
    }

    pub(crate) fn guard(&self, transition: usize) -> Option<&Guard<C>> {
        self.guards[transition].as_ref()
    }

    pub(crate) fn callback_for(&self, invocation: Invocation) -> Option<&Action<C>> {
        match invocation {
            Invocation::Exit(state) => self.on_exit[state.index()].as_ref(),
            Invocation::Action(transition) => self.actions[transition].as_ref(),
            Invocation::Entry(state) => self.on_entry[state.index()].as_ref(),
        }
    }

    /// Target reported to hooks: the declared target, or the source for
    /// internal transitions.
    pub(crate) fn declared_target(&self, route: Route) -> &S {
        self.state(self.table.plan(route.transition).to)
    }

    /// Evaluate a guard on a synchronous machine. Errors and skipped
    /// typed guards count as a rejection.
    pub(crate) fn guard_passes_sync(
        &self,
        transition: usize,
        context: &C,
        payload: Option<&Payload>,
        instance_id: Uuid,
    ) -> bool {
        let Some(guard) = self.guard(transition) else {
            return true;
        };
        match guard.call_sync(context, self.effective(payload)) {
            Some(Ok(passed)) => passed,
            Some(Err(error)) => {
                warn!(
                    machine = %self.name(),
                    instance = %instance_id,
                    guard = %guard.name(),
                    %error,
                    "guard failed with error"
                );
                false
            }
            None => {
                debug!(
                    machine = %self.name(),
                    instance = %instance_id,
                    guard = %guard.name(),
                    "guard skipped without matching payload"
                );
                false
            }
        }
    }

    /// Root-to-leaf names joined with `" / "`.
    pub(crate) fn dump(&self, path: &[StateId]) -> String {
        path.iter()
            .map(|&id| self.state(id).name())
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

impl<S, T, C> fmt::Debug for MachineDefinition<S, T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineDefinition")
            .field("name", &self.table.name())
            .field("states", &self.states.len())
            .field("transitions", &self.table.plans().len())
            .field("hierarchical", &self.table.is_hierarchical())
            .field("asynchronous", &self.table.model().config.asynchronous)
            .finish()
    }
}
