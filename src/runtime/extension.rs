//! Observer hooks attached to machine instances.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Snapshot handed to extension hooks for one transition attempt.
#[derive(Clone, Debug)]
pub struct TransitionContext<S, T> {
    pub instance_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub from: S,
    /// Declared target; equals `from` for internal transitions.
    pub to: S,
    pub trigger: T,
}

impl<S, T> TransitionContext<S, T> {
    pub fn new(instance_id: Uuid, from: S, to: S, trigger: T) -> Self {
        Self {
            instance_id,
            timestamp: Utc::now(),
            from,
            to,
            trigger,
        }
    }
}

/// Hooks invoked around each transition attempt. All default to no-ops.
///
/// Hooks run synchronously on the firing task and must not block.
pub trait MachineExtension<S, T>: Send + Sync {
    fn before_transition(&self, _context: &TransitionContext<S, T>) {}

    fn after_transition(&self, _context: &TransitionContext<S, T>, _success: bool) {}

    fn guard_evaluation(&self, _context: &TransitionContext<S, T>, _guard: &str) {}

    fn guard_evaluated(&self, _context: &TransitionContext<S, T>, _guard: &str, _result: bool) {}
}
