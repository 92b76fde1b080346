//! Hierarchy index: dense, state-indexed arrays built from declared states.
//!
//! Building the index validates the structural invariants of the
//! hierarchy. Every violation is accumulated with `Validation` so a
//! single build reports all of them at once.

use crate::core::{HistoryMode, StateId};
use crate::model::StateDecl;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use thiserror::Error;

/// Structural problems detected before any plan is built.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StructuralError {
    #[error("state '{state}' is declared more than once")]
    DuplicateState { state: String },

    #[error("state '{state}' names unknown parent '{parent}'")]
    UnknownParent { state: String, parent: String },

    #[error("cyclic hierarchy: {}", .path.join(" -> "))]
    CyclicHierarchy { path: Vec<String> },

    #[error("composite state '{state}' has no initial child and no history mode")]
    MissingInitialChild { state: String },

    #[error("composite state '{state}' has multiple initial children: {}", .children.join(", "))]
    MultipleInitialChildren { state: String, children: Vec<String> },

    #[error("history mode declared on leaf state '{state}'")]
    HistoryOnLeaf { state: String },

    #[error("machine declares no states")]
    NoStates,

    #[error("machine has no initial state")]
    MissingInitialState,

    #[error("{context} references unknown state '{state}'")]
    UnknownState { context: String, state: String },

    #[error("external transition from '{from}' on '{trigger}' has no target state")]
    MissingTarget { from: String, trigger: String },

    #[error("callback '{callback}' is asynchronous but the machine is synchronous")]
    AsyncCallbackOnSyncMachine { callback: String },

    #[error("callback '{callback}' expects a payload but payload support is disabled")]
    PayloadCallbackWithoutPayloadSupport { callback: String },

    #[error("exit callback '{callback}' of state '{state}' expects a payload")]
    ExitExpectsPayload { state: String, callback: String },
}

/// The four parallel arrays handed to renderers, with `-1` for "none".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseArrays {
    pub parent: Vec<i32>,
    pub depth: Vec<i32>,
    pub initial_child: Vec<i32>,
    pub history: Vec<HistoryMode>,
}

/// Immutable, validated view of the state hierarchy.
#[derive(Clone, Debug)]
pub struct HierarchyIndex {
    names: Vec<String>,
    by_name: HashMap<String, StateId>,
    parent: Vec<Option<StateId>>,
    depth: Vec<usize>,
    initial_child: Vec<Option<StateId>>,
    history: Vec<HistoryMode>,
    children: Vec<Vec<StateId>>,
}

/// Iterator over a state and its ancestors, nearest first.
pub struct Ancestors<'a> {
    index: &'a HierarchyIndex,
    next: Option<StateId>,
}

impl Iterator for Ancestors<'_> {
    type Item = StateId;

    fn next(&mut self) -> Option<StateId> {
        let current = self.next?;
        self.next = self.index.parent(current);
        Some(current)
    }
}

impl HierarchyIndex {
    /// Validate and index the declared states.
    pub fn build(states: &[StateDecl]) -> Result<Self, Vec<StructuralError>> {
        match Self::validate(states) {
            Validation::Success(_) => Ok(Self::assemble(states)),
            Validation::Failure(errors) => Err(errors.iter().cloned().collect()),
        }
    }

    /// Check every structural invariant, accumulating ALL violations.
    pub fn validate(states: &[StateDecl]) -> Validation<(), NonEmptyVec<StructuralError>> {
        let mut checks: Vec<Validation<(), NonEmptyVec<StructuralError>>> = Vec::new();

        let mut lookup: HashMap<&str, usize> = HashMap::new();
        for (i, decl) in states.iter().enumerate() {
            if lookup.contains_key(decl.name.as_str()) {
                checks.push(Validation::fail(StructuralError::DuplicateState {
                    state: decl.name.clone(),
                }));
            } else {
                lookup.insert(decl.name.as_str(), i);
            }
        }

        let mut parents: Vec<Option<usize>> = Vec::with_capacity(states.len());
        for decl in states {
            let resolved = match decl.parent.as_deref() {
                Some(parent) => {
                    let found = lookup.get(parent).copied();
                    if found.is_none() {
                        checks.push(Validation::fail(StructuralError::UnknownParent {
                            state: decl.name.clone(),
                            parent: parent.to_string(),
                        }));
                    }
                    found
                }
                None => None,
            };
            parents.push(resolved);
        }

        for cycle in find_cycles(&parents) {
            let path = cycle.iter().map(|&i| states[i].name.clone()).collect();
            checks.push(Validation::fail(StructuralError::CyclicHierarchy { path }));
        }

        let children = children_of(&parents);
        for (i, decl) in states.iter().enumerate() {
            if children[i].is_empty() {
                if decl.history.is_enabled() {
                    checks.push(Validation::fail(StructuralError::HistoryOnLeaf {
                        state: decl.name.clone(),
                    }));
                }
                continue;
            }

            let initials: Vec<usize> = children[i]
                .iter()
                .copied()
                .filter(|&c| states[c].initial)
                .collect();
            match initials.len() {
                0 if !decl.history.is_enabled() => {
                    checks.push(Validation::fail(StructuralError::MissingInitialChild {
                        state: decl.name.clone(),
                    }));
                }
                0 | 1 => {}
                _ => checks.push(Validation::fail(StructuralError::MultipleInitialChildren {
                    state: decl.name.clone(),
                    children: initials.iter().map(|&c| states[c].name.clone()).collect(),
                })),
            }
        }

        Validation::all_vec(checks).map(|_| ())
    }

    fn assemble(states: &[StateDecl]) -> Self {
        let names: Vec<String> = states.iter().map(|s| s.name.clone()).collect();
        let by_name: HashMap<String, StateId> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), StateId::new(i)))
            .collect();

        let parent: Vec<Option<StateId>> = states
            .iter()
            .map(|s| s.parent.as_deref().and_then(|p| by_name.get(p).copied()))
            .collect();

        let mut children: Vec<Vec<StateId>> = vec![Vec::new(); states.len()];
        for (i, p) in parent.iter().enumerate() {
            if let Some(p) = p {
                children[p.index()].push(StateId::new(i));
            }
        }

        // A history composite without an explicit initial child falls back
        // to its first declared child when its history is empty.
        let initial_child = children
            .iter()
            .map(|kids| {
                kids.iter()
                    .copied()
                    .find(|c| states[c.index()].initial)
                    .or_else(|| kids.first().copied())
            })
            .collect();

        let depth = (0..states.len())
            .map(|i| {
                let mut depth = 0;
                let mut cursor = parent[i];
                while let Some(p) = cursor {
                    depth += 1;
                    cursor = parent[p.index()];
                }
                depth
            })
            .collect();

        Self {
            names,
            by_name,
            parent,
            depth,
            initial_child,
            history: states.iter().map(|s| s.history).collect(),
            children,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = StateId> {
        (0..self.names.len()).map(StateId::new)
    }

    pub fn id_of(&self, name: &str) -> Option<StateId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: StateId) -> &str {
        &self.names[id.index()]
    }

    pub fn parent(&self, id: StateId) -> Option<StateId> {
        self.parent[id.index()]
    }

    pub fn depth(&self, id: StateId) -> usize {
        self.depth[id.index()]
    }

    pub fn initial_child(&self, id: StateId) -> Option<StateId> {
        self.initial_child[id.index()]
    }

    pub fn history(&self, id: StateId) -> HistoryMode {
        self.history[id.index()]
    }

    pub fn children(&self, id: StateId) -> &[StateId] {
        &self.children[id.index()]
    }

    pub fn is_composite(&self, id: StateId) -> bool {
        !self.children[id.index()].is_empty()
    }

    /// True when any composite declares a history mode.
    pub fn has_history(&self) -> bool {
        self.history.iter().any(|h| h.is_enabled())
    }

    /// `id` followed by each of its ancestors up to the root.
    pub fn ancestors(&self, id: StateId) -> Ancestors<'_> {
        Ancestors {
            index: self,
            next: Some(id),
        }
    }

    pub fn is_ancestor_or_self(&self, ancestor: StateId, id: StateId) -> bool {
        self.ancestors(id).any(|a| a == ancestor)
    }

    /// Lowest common ancestor-or-self of `a` and `b`, `None` for disjoint trees.
    pub fn lca(&self, a: StateId, b: StateId) -> Option<StateId> {
        let from_chain: HashSet<StateId> = self.ancestors(a).collect();
        self.ancestors(b).find(|s| from_chain.contains(s))
    }

    /// Leaf reached by repeatedly following initial-child pointers.
    pub fn initial_leaf(&self, id: StateId) -> StateId {
        let mut current = id;
        while let Some(child) = self.initial_child(current) {
            current = child;
        }
        current
    }

    /// Root-to-`id` path, inclusive.
    pub fn path_from_root(&self, id: StateId) -> Vec<StateId> {
        let mut path: Vec<StateId> = self.ancestors(id).collect();
        path.reverse();
        path
    }

    /// States strictly below `top` down to `leaf`, ancestor first.
    /// Empty when `leaf` is `top` or not beneath it.
    pub fn chain_below(&self, top: StateId, leaf: StateId) -> Vec<StateId> {
        let mut chain = Vec::new();
        for state in self.ancestors(leaf) {
            if state == top {
                chain.reverse();
                return chain;
            }
            chain.push(state);
        }
        Vec::new()
    }

    pub fn dense_arrays(&self) -> DenseArrays {
        let encode = |id: Option<StateId>| id.map_or(-1, |s| s.index() as i32);
        DenseArrays {
            parent: self.parent.iter().copied().map(encode).collect(),
            depth: self.depth.iter().map(|&d| d as i32).collect(),
            initial_child: self.initial_child.iter().copied().map(encode).collect(),
            history: self.history.clone(),
        }
    }
}

fn children_of(parents: &[Option<usize>]) -> Vec<Vec<usize>> {
    let mut children = vec![Vec::new(); parents.len()];
    for (i, p) in parents.iter().enumerate() {
        if let Some(p) = *p {
            children[p].push(i);
        }
    }
    children
}

/// Each cycle once, as a closed path (first member repeated at the end).
fn find_cycles(parents: &[Option<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: u8 = 0;
    const ON_PATH: u8 = 1;
    const DONE: u8 = 2;

    let mut mark = vec![UNVISITED; parents.len()];
    let mut cycles = Vec::new();

    for start in 0..parents.len() {
        let mut walk = Vec::new();
        let mut cursor = Some(start);
        while let Some(current) = cursor {
            match mark[current] {
                DONE => break,
                ON_PATH => {
                    if let Some(pos) = walk.iter().position(|&s| s == current) {
                        let mut cycle = walk[pos..].to_vec();
                        cycle.push(current);
                        cycles.push(cycle);
                    }
                    break;
                }
                _ => {
                    mark[current] = ON_PATH;
                    walk.push(current);
                    cursor = parents[current];
                }
            }
        }
        for s in walk {
            mark[s] = DONE;
        }
    }

    cycles
}
