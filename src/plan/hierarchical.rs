//! LCA-based planner for hierarchical machines.

use super::{action_step, entry_step, exit_step, guard_step, internal_plan};
use super::{Plan, PlanInput, Step, TransitionPlanner};
use crate::core::{HierarchyIndex, StateId};
use crate::model::StateDecl;

/// States from `from` up to, but excluding, `domain`; leaf first.
pub fn exit_chain(index: &HierarchyIndex, from: StateId, domain: Option<StateId>) -> Vec<StateId> {
    index
        .ancestors(from)
        .take_while(|&state| Some(state) != domain)
        .collect()
}

/// States below `domain` down to `to`; ancestor first.
pub fn entry_chain(index: &HierarchyIndex, to: StateId, domain: Option<StateId>) -> Vec<StateId> {
    let mut chain = exit_chain(index, to, domain);
    chain.reverse();
    chain
}

/// Exits up to the LCA, runs the action, assigns the declared target and
/// enters down from the LCA. History is recorded before anything is exited.
#[derive(Clone, Copy, Debug, Default)]
pub struct HierarchicalPlanner;

impl TransitionPlanner for HierarchicalPlanner {
    fn plan(&self, index: &HierarchyIndex, states: &[StateDecl], input: PlanInput<'_>) -> Plan {
        if input.transition.internal {
            return internal_plan(input);
        }

        let (from, to) = (input.from, input.to);
        // An external self-transition leaves and re-enters its source.
        let domain = if from == to {
            index.parent(from)
        } else {
            index.lca(from, to)
        };

        let mut steps = Vec::new();
        steps.extend(guard_step(input.transition));
        if index.has_history() {
            steps.push(Step::RecordHistory);
        }
        for state in exit_chain(index, from, domain) {
            steps.extend(exit_step(states, state));
        }
        steps.extend(action_step(input.transition));
        steps.push(Step::AssignState(to));
        for state in entry_chain(index, to, domain) {
            steps.extend(entry_step(states, state));
        }

        Plan {
            is_internal: false,
            from,
            to,
            lca: domain,
            steps,
        }
    }
}
