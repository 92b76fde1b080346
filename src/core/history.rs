//! Per-instance history memory and composite entry resolution.

use crate::core::{HierarchyIndex, HistoryMode, StateId};

/// Last-active-child slots, one per state.
///
/// Only slots of composites that declare a history mode are ever written.
/// Shallow slots hold the immediate child that was last active, Deep
/// slots hold the exact leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryMemory {
    slots: Vec<Option<StateId>>,
}

impl HistoryMemory {
    /// Allocate memory for `index`, or `None` when no composite has history.
    pub fn allocate(index: &HierarchyIndex) -> Option<Self> {
        index.has_history().then(|| Self {
            slots: vec![None; index.len()],
        })
    }

    /// Record `leaf` into every ancestor that declares a history mode.
    ///
    /// Must run before any exit so the departing leaf is captured, even for
    /// Shallow ancestors several levels up.
    pub fn record(&mut self, index: &HierarchyIndex, leaf: StateId) {
        let mut child = leaf;
        let mut cursor = index.parent(leaf);
        while let Some(ancestor) = cursor {
            let slot = &mut self.slots[ancestor.index()];
            match index.history(ancestor) {
                HistoryMode::Shallow => *slot = Some(child),
                HistoryMode::Deep => *slot = Some(leaf),
                HistoryMode::None => {}
            }
            child = ancestor;
            cursor = index.parent(ancestor);
        }
    }

    pub fn remembered(&self, composite: StateId) -> Option<StateId> {
        self.slots.get(composite.index()).copied().flatten()
    }

    pub(crate) fn remember(&mut self, composite: StateId, state: StateId) {
        if let Some(slot) = self.slots.get_mut(composite.index()) {
            *slot = Some(state);
        }
    }

    /// Recorded `(composite, remembered)` pairs in state order.
    pub fn entries(&self) -> impl Iterator<Item = (StateId, StateId)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|s| (StateId::new(i), s)))
    }
}

/// Resolve the leaf to enter when `target` is assigned.
///
/// Uses recorded history where the composite declares it, falling back to
/// the initial child when nothing was recorded or the recorded state is not
/// beneath the composite.
pub fn resolve_composite(
    index: &HierarchyIndex,
    memory: Option<&HistoryMemory>,
    target: StateId,
) -> StateId {
    let mut current = target;
    while let Some(initial) = index.initial_child(current) {
        let remembered = memory.and_then(|m| m.remembered(current));
        current = match (index.history(current), remembered) {
            (HistoryMode::Shallow, Some(child)) if index.parent(child) == Some(current) => child,
            (HistoryMode::Deep, Some(leaf))
                if leaf != current && index.is_ancestor_or_self(current, leaf) =>
            {
                leaf
            }
            _ => initial,
        };
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StateDecl;

    fn nested(mode: HistoryMode) -> HierarchyIndex {
        HierarchyIndex::build(&[
            StateDecl::new("Out"),
            StateDecl::new("P").with_history(mode),
            StateDecl::new("A").with_parent("P").initial(),
            StateDecl::new("B").with_parent("P"),
            StateDecl::new("B1").with_parent("B").initial(),
            StateDecl::new("B2").with_parent("B"),
        ])
        .unwrap()
    }

    #[test]
    fn no_memory_without_history() {
        let index = nested(HistoryMode::None);
        assert!(HistoryMemory::allocate(&index).is_none());
    }

    #[test]
    fn shallow_records_immediate_child_of_original_leaf() {
        let index = nested(HistoryMode::Shallow);
        let id = |name| index.id_of(name).unwrap();
        let mut memory = HistoryMemory::allocate(&index).unwrap();

        memory.record(&index, id("B2"));

        assert_eq!(memory.remembered(id("P")), Some(id("B")));
        assert_eq!(memory.remembered(id("B")), None);
        // Shallow restores B, which then enters through its own initial child.
        assert_eq!(resolve_composite(&index, Some(&memory), id("P")), id("B1"));
    }

    #[test]
    fn deep_restores_exact_leaf() {
        let index = nested(HistoryMode::Deep);
        let id = |name| index.id_of(name).unwrap();
        let mut memory = HistoryMemory::allocate(&index).unwrap();

        memory.record(&index, id("B2"));

        assert_eq!(memory.remembered(id("P")), Some(id("B2")));
        assert_eq!(resolve_composite(&index, Some(&memory), id("P")), id("B2"));
    }

    #[test]
    fn empty_history_follows_initial_children() {
        let index = nested(HistoryMode::Deep);
        let id = |name| index.id_of(name).unwrap();
        let memory = HistoryMemory::allocate(&index).unwrap();

        assert_eq!(resolve_composite(&index, Some(&memory), id("P")), id("A"));
        assert_eq!(resolve_composite(&index, None, id("B")), id("B1"));
        assert_eq!(resolve_composite(&index, None, id("Out")), id("Out"));
    }

    #[test]
    fn unreconcilable_memory_falls_back_to_initial() {
        let index = nested(HistoryMode::Shallow);
        let id = |name| index.id_of(name).unwrap();
        let mut memory = HistoryMemory::allocate(&index).unwrap();

        memory.remember(id("P"), id("Out"));

        assert_eq!(resolve_composite(&index, Some(&memory), id("P")), id("A"));
    }

    #[test]
    fn entries_lists_recorded_slots() {
        let index = nested(HistoryMode::Deep);
        let id = |name| index.id_of(name).unwrap();
        let mut memory = HistoryMemory::allocate(&index).unwrap();

        memory.record(&index, id("A"));

        let entries: Vec<_> = memory.entries().collect();
        assert_eq!(entries, vec![(id("P"), id("A"))]);
    }
}
