//! Walks one plan against one instance.
//!
//! [`Transit`] applies the state-only steps (history recording, state
//! assignment, composite resolution) itself and yields each callback the
//! caller must invoke, in order. The sync and async machines share it and
//! differ only in how they invoke what it yields.

use crate::core::{resolve_composite, HistoryMemory, StateId};
use crate::plan::{PlanTable, Route, Step};
use crate::runtime::TransitionStage;
use std::collections::VecDeque;

/// Mutable per-instance state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Instance {
    pub(crate) current: StateId,
    pub(crate) started: bool,
    pub(crate) history: Option<HistoryMemory>,
}

impl Instance {
    pub(crate) fn new(table: &PlanTable) -> Self {
        Self {
            current: table.initial(),
            started: false,
            history: None,
        }
    }

    /// Mark the instance started, resolve the initial leaf and return the
    /// walk that enters every state from the root down to it.
    pub(crate) fn begin<'a>(&mut self, table: &'a PlanTable) -> Transit<'a> {
        self.started = true;
        self.history = HistoryMemory::allocate(table.index());
        let leaf = resolve_composite(table.index(), self.history.as_ref(), table.initial());
        self.current = leaf;
        Transit::entering(table, table.index().path_from_root(leaf))
    }
}

/// A callback the caller must run next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Invocation {
    Exit(StateId),
    Action(usize),
    Entry(StateId),
}

impl Invocation {
    pub(crate) fn stage(self) -> TransitionStage {
        match self {
            Invocation::Exit(_) => TransitionStage::OnExit,
            Invocation::Action(_) => TransitionStage::Action,
            Invocation::Entry(_) => TransitionStage::OnEntry,
        }
    }
}

pub(crate) struct Transit<'a> {
    table: &'a PlanTable,
    transition: Option<usize>,
    steps: std::slice::Iter<'a, Step>,
    held: Option<&'a Step>,
    /// Active states below the route's source, leaf first. Exited once,
    /// after history is recorded and before anything else.
    descendants: Option<Vec<StateId>>,
    pending: VecDeque<Invocation>,
    /// Entries below the assigned target, run after the plan's own entries.
    deferred: Vec<StateId>,
    assigned: bool,
}

impl<'a> Transit<'a> {
    pub(crate) fn new(table: &'a PlanTable, route: Route, current: StateId) -> Self {
        let plan = table.plan(route.transition);
        let descendants = if plan.is_internal {
            Vec::new()
        } else {
            let mut below = table.index().chain_below(route.source, current);
            below.reverse();
            below
        };
        Self {
            table,
            transition: Some(route.transition),
            steps: plan.steps.iter(),
            held: None,
            descendants: Some(descendants),
            pending: VecDeque::new(),
            deferred: Vec::new(),
            assigned: false,
        }
    }

    fn entering(table: &'a PlanTable, path: Vec<StateId>) -> Self {
        let empty: &'a [Step] = &[];
        Self {
            table,
            transition: None,
            steps: empty.iter(),
            held: None,
            descendants: None,
            pending: VecDeque::new(),
            deferred: path,
            assigned: true,
        }
    }

    /// Whether the current state has been reassigned yet.
    pub(crate) fn assigned(&self) -> bool {
        self.assigned
    }

    /// Advance to the next callback, applying state-only steps on the way.
    pub(crate) fn next(&mut self, instance: &mut Instance) -> Option<Invocation> {
        loop {
            if let Some(invocation) = self.pending.pop_front() {
                return Some(invocation);
            }

            let Some(step) = self.held.take().or_else(|| self.steps.next()) else {
                if self.deferred.is_empty() {
                    return None;
                }
                for state in std::mem::take(&mut self.deferred) {
                    if self.table.state(state).on_entry.is_some() {
                        self.pending.push_back(Invocation::Entry(state));
                    }
                }
                continue;
            };

            let leaves_source = !matches!(step, Step::GuardCheck(_) | Step::RecordHistory);
            if leaves_source {
                if let Some(descendants) = self.descendants.take() {
                    for state in descendants {
                        if self.table.state(state).on_exit.is_some() {
                            self.pending.push_back(Invocation::Exit(state));
                        }
                    }
                    self.held = Some(step);
                    continue;
                }
            }

            self.apply(step, instance);
        }
    }

    fn apply(&mut self, step: &Step, instance: &mut Instance) {
        let index = self.table.index();
        match step {
            Step::GuardCheck(_) => {}
            Step::RecordHistory => {
                if let Some(memory) = instance.history.as_mut() {
                    memory.record(index, instance.current);
                }
            }
            Step::ExitState { state, .. } => self.pending.push_back(Invocation::Exit(*state)),
            Step::InternalAction(_) => {
                if let Some(transition) = self.transition {
                    self.pending.push_back(Invocation::Action(transition));
                }
            }
            Step::AssignState(target) => {
                let leaf = resolve_composite(index, instance.history.as_ref(), *target);
                instance.current = leaf;
                self.assigned = true;
                self.deferred = index.chain_below(*target, leaf);
            }
            Step::EntryState { state, .. } => self.pending.push_back(Invocation::Entry(*state)),
        }
    }
}
