//! Transition plans.
//!
//! A [`Plan`] is the exact ordered list of steps one transition performs.
//! Plans are computed once per transition when a machine is built and are
//! shared by every instance. Composite-to-leaf resolution is not part of a
//! plan because it depends on per-instance history.

mod flat;
mod hierarchical;
mod table;

use crate::core::{HierarchyIndex, StateId};
use crate::model::{CallbackRef, StateDecl, TransitionDecl};
use serde::{Deserialize, Serialize};

pub use flat::FlatPlanner;
pub use hierarchical::{entry_chain, exit_chain, HierarchicalPlanner};
pub use table::{Diagnostic, PlanTable, Route};

/// One operation of a plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    GuardCheck(CallbackRef),
    ExitState { state: StateId, callback: CallbackRef },
    /// Record the current leaf into every history ancestor.
    RecordHistory,
    InternalAction(CallbackRef),
    AssignState(StateId),
    EntryState { state: StateId, callback: CallbackRef },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub is_internal: bool,
    pub from: StateId,
    pub to: StateId,
    /// Transition domain: the LCA, or the parent for external self-transitions.
    pub lca: Option<StateId>,
    pub steps: Vec<Step>,
}

impl Plan {
    /// States exited by this plan, in execution order.
    pub fn exits(&self) -> Vec<StateId> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::ExitState { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    /// States entered by this plan, in execution order.
    pub fn entries(&self) -> Vec<StateId> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::EntryState { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }
}

/// Resolved endpoints of a transition handed to a planner.
#[derive(Clone, Copy, Debug)]
pub struct PlanInput<'a> {
    pub from: StateId,
    /// Equal to `from` for internal transitions.
    pub to: StateId,
    pub transition: &'a TransitionDecl,
}

/// Strategy that turns one transition into a plan.
pub trait TransitionPlanner {
    fn plan(&self, index: &HierarchyIndex, states: &[StateDecl], input: PlanInput<'_>) -> Plan;
}

fn guard_step(transition: &TransitionDecl) -> Option<Step> {
    transition.guard.clone().map(Step::GuardCheck)
}

fn action_step(transition: &TransitionDecl) -> Option<Step> {
    transition.action.clone().map(Step::InternalAction)
}

fn exit_step(states: &[StateDecl], state: StateId) -> Option<Step> {
    states[state.index()]
        .on_exit
        .clone()
        .map(|callback| Step::ExitState { state, callback })
}

fn entry_step(states: &[StateDecl], state: StateId) -> Option<Step> {
    states[state.index()]
        .on_entry
        .clone()
        .map(|callback| Step::EntryState { state, callback })
}

/// Guard and action only; shared by both strategies.
fn internal_plan(input: PlanInput<'_>) -> Plan {
    let steps = guard_step(input.transition)
        .into_iter()
        .chain(action_step(input.transition))
        .collect();
    Plan {
        is_internal: true,
        from: input.from,
        to: input.from,
        lca: None,
        steps,
    }
}
