//! Plan table: every transition planned once, plus trigger routing.

use super::{FlatPlanner, HierarchicalPlanner, Plan, PlanInput, TransitionPlanner};
use crate::builder::BuildError;
use crate::core::{DenseArrays, HierarchyIndex, StateId, StructuralError};
use crate::model::{Model, StateDecl, TransitionDecl};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use stillwater::validation::Validation;
use tracing::{debug, warn};

/// Winning transition for a fired trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    /// Declaration index of the transition.
    pub transition: usize,
    /// State the transition is declared on: the current leaf or an ancestor.
    pub source: StateId,
}

/// Non-fatal findings reported while building a table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// A transition that can never fire because another one wins its
    /// `(state, trigger)` slot.
    Shadowed {
        state: String,
        trigger: String,
        winner: usize,
        shadowed: usize,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Shadowed {
                state,
                trigger,
                winner,
                shadowed,
            } => write!(
                f,
                "transition #{shadowed} from '{state}' on '{trigger}' is shadowed by transition #{winner}"
            ),
        }
    }
}

/// Immutable build-time artifact shared by every instance of a machine.
#[derive(Clone, Debug)]
pub struct PlanTable {
    model: Model,
    index: HierarchyIndex,
    initial: StateId,
    hierarchical: bool,
    plans: Vec<Plan>,
    routes: Vec<HashMap<String, usize>>,
    diagnostics: Vec<Diagnostic>,
}

impl PlanTable {
    /// Validate `model`, index its hierarchy and plan every transition.
    pub fn build(mut model: Model) -> Result<Self, BuildError> {
        let checks = vec![model.validate(), HierarchyIndex::validate(&model.states)];
        if let Validation::Failure(errors) = Validation::all_vec(checks) {
            return Err(BuildError::Structural(errors.iter().cloned().collect()));
        }

        let index = HierarchyIndex::build(&model.states).map_err(BuildError::Structural)?;
        let initial = lookup(&index, model.initial.as_deref().unwrap_or_default(), "initial state")?;
        let hierarchical = model.hierarchy_enabled();
        model.config.hierarchy = hierarchical;

        let planner: &dyn TransitionPlanner = if hierarchical {
            &HierarchicalPlanner
        } else {
            &FlatPlanner
        };

        let mut plans = Vec::with_capacity(model.transitions.len());
        for transition in &model.transitions {
            let context = format!("transition '{}' on '{}'", transition.from, transition.trigger);
            let from = lookup(&index, &transition.from, &context)?;
            let to = match (&transition.to, transition.internal) {
                (Some(to), false) => lookup(&index, to, &context)?,
                _ => from,
            };
            plans.push(planner.plan(
                &index,
                &model.states,
                PlanInput {
                    from,
                    to,
                    transition,
                },
            ));
        }

        let (routes, diagnostics) = resolve_winners(&index, &model.transitions, &plans);
        for diagnostic in &diagnostics {
            warn!(machine = %model.name, %diagnostic, "unreachable transition");
        }
        debug!(
            machine = %model.name,
            states = index.len(),
            plans = plans.len(),
            hierarchical,
            "plan table built"
        );

        Ok(Self {
            model,
            index,
            initial,
            hierarchical,
            plans,
            routes,
            diagnostics,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn name(&self) -> &str {
        &self.model.name
    }

    pub fn index(&self) -> &HierarchyIndex {
        &self.index
    }

    pub fn dense_arrays(&self) -> DenseArrays {
        self.index.dense_arrays()
    }

    pub fn initial(&self) -> StateId {
        self.initial
    }

    pub fn is_hierarchical(&self) -> bool {
        self.hierarchical
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    pub fn plan(&self, transition: usize) -> &Plan {
        &self.plans[transition]
    }

    pub fn transition(&self, transition: usize) -> &TransitionDecl {
        &self.model.transitions[transition]
    }

    pub fn state(&self, id: StateId) -> &StateDecl {
        &self.model.states[id.index()]
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Winning transition declared directly on `state` for `trigger`.
    pub fn winner(&self, state: StateId, trigger: &str) -> Option<usize> {
        self.routes[state.index()].get(trigger).copied()
    }

    /// Transition that fires for `trigger` while `current` is active.
    ///
    /// With a hierarchy, transitions declared on ancestors are inherited.
    /// The nearest state declaring the trigger handles it; priority only
    /// ranks transitions declared on that same state.
    pub fn route(&self, current: StateId, trigger: &str) -> Option<Route> {
        if !self.hierarchical {
            return self.winner(current, trigger).map(|transition| Route {
                transition,
                source: current,
            });
        }

        self.index.ancestors(current).find_map(|state| {
            self.winner(state, trigger).map(|transition| Route {
                transition,
                source: state,
            })
        })
    }

    /// Trigger names with a route from `current`, in declaration order.
    pub fn triggers_from(&self, current: StateId) -> Vec<&str> {
        let mut triggers: Vec<&str> = Vec::new();
        for transition in &self.model.transitions {
            let trigger = transition.trigger.as_str();
            if !triggers.contains(&trigger) && self.route(current, trigger).is_some() {
                triggers.push(trigger);
            }
        }
        triggers
    }
}

fn lookup(index: &HierarchyIndex, name: &str, context: &str) -> Result<StateId, BuildError> {
    index.id_of(name).ok_or_else(|| {
        BuildError::Structural(vec![StructuralError::UnknownState {
            context: context.to_string(),
            state: name.to_string(),
        }])
    })
}

/// Pick one transition per `(state, trigger)`: priority descending, then
/// declaration order. Losers are reported, never planned as reachable.
fn resolve_winners(
    index: &HierarchyIndex,
    transitions: &[TransitionDecl],
    plans: &[Plan],
) -> (Vec<HashMap<String, usize>>, Vec<Diagnostic>) {
    let mut candidates: BTreeMap<(StateId, &str), Vec<usize>> = BTreeMap::new();
    for (i, (transition, plan)) in transitions.iter().zip(plans).enumerate() {
        candidates
            .entry((plan.from, transition.trigger.as_str()))
            .or_default()
            .push(i);
    }

    let mut routes = vec![HashMap::new(); index.len()];
    let mut diagnostics = Vec::new();
    for ((state, trigger), mut group) in candidates {
        group.sort_by_key(|&i| Reverse(transitions[i].priority));
        let winner = group[0];
        routes[state.index()].insert(trigger.to_string(), winner);
        for &shadowed in &group[1..] {
            diagnostics.push(Diagnostic::Shadowed {
                state: index.name(state).to_string(),
                trigger: trigger.to_string(),
                winner,
                shadowed,
            });
        }
    }

    (routes, diagnostics)
}
