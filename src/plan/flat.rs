//! Planner for machines without a hierarchy.

use super::{action_step, entry_step, exit_step, guard_step, internal_plan};
use super::{Plan, PlanInput, Step, TransitionPlanner};
use crate::core::HierarchyIndex;
use crate::model::StateDecl;

/// Exit the source, run the action, enter the target.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatPlanner;

impl TransitionPlanner for FlatPlanner {
    fn plan(&self, _index: &HierarchyIndex, states: &[StateDecl], input: PlanInput<'_>) -> Plan {
        if input.transition.internal {
            return internal_plan(input);
        }

        let mut steps = Vec::new();
        steps.extend(guard_step(input.transition));
        steps.extend(exit_step(states, input.from));
        steps.extend(action_step(input.transition));
        steps.push(Step::AssignState(input.to));
        steps.extend(entry_step(states, input.to));

        Plan {
            is_internal: false,
            from: input.from,
            to: input.to,
            lca: None,
            steps,
        }
    }
}
