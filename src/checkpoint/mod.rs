//! Checkpoint and restore for machine instances.
//!
//! A checkpoint records one instance's current state and history memory
//! by state name, so it survives reordering of state declarations. It
//! never includes callbacks or the context; restoring needs the same
//! machine definition.

use crate::core::{HierarchyIndex, HistoryMemory, StateId};
use crate::plan::PlanTable;
use crate::runtime::Instance;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::CheckpointError;

/// Version identifier for checkpoint format
pub const CHECKPOINT_VERSION: u32 = 1;

/// One recorded history slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub composite: String,
    /// Immediate child for Shallow history, leaf for Deep.
    pub remembered: String,
}

/// Serializable snapshot of one machine instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version
    pub version: u32,

    /// Instance id; restored instances keep it
    pub id: Uuid,

    /// When checkpoint was created
    pub timestamp: DateTime<Utc>,

    /// Name of the machine definition
    pub machine: String,

    pub started: bool,

    /// Current leaf state
    pub current: String,

    pub history: Vec<HistoryEntry>,
}

impl Checkpoint {
    pub(crate) fn capture(id: Uuid, table: &PlanTable, instance: &Instance) -> Self {
        let index = table.index();
        let history = instance
            .history
            .iter()
            .flat_map(HistoryMemory::entries)
            .map(|(composite, remembered)| HistoryEntry {
                composite: index.name(composite).to_string(),
                remembered: index.name(remembered).to_string(),
            })
            .collect();

        Self {
            version: CHECKPOINT_VERSION,
            id,
            timestamp: Utc::now(),
            machine: table.name().to_string(),
            started: instance.started,
            current: index.name(instance.current).to_string(),
            history,
        }
    }

    /// Validate against `table` and rebuild the instance state.
    pub(crate) fn instance(&self, table: &PlanTable) -> Result<Instance, CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: self.version,
                supported: CHECKPOINT_VERSION,
            });
        }
        if self.machine != table.name() {
            return Err(CheckpointError::MachineMismatch {
                expected: table.name().to_string(),
                found: self.machine.clone(),
            });
        }

        let index = table.index();
        let current = lookup(index, &self.current)?;
        if self.started && index.is_composite(current) {
            return Err(CheckpointError::ValidationFailed(format!(
                "current state '{}' is composite",
                self.current
            )));
        }

        let mut history = HistoryMemory::allocate(index);
        for entry in &self.history {
            let composite = lookup(index, &entry.composite)?;
            let remembered = lookup(index, &entry.remembered)?;
            let beneath = remembered != composite && index.is_ancestor_or_self(composite, remembered);
            match history.as_mut() {
                Some(memory) if index.history(composite).is_enabled() && beneath => {
                    memory.remember(composite, remembered)
                }
                _ => {
                    return Err(CheckpointError::ValidationFailed(format!(
                        "history of '{}' cannot remember '{}'",
                        entry.composite, entry.remembered
                    )))
                }
            }
        }

        Ok(Instance {
            current,
            started: self.started,
            history: history.filter(|_| self.started),
        })
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CheckpointError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        serde_json::from_str(json).map_err(|e| CheckpointError::DeserializationFailed(e.to_string()))
    }

    pub fn to_binary(&self) -> Result<Vec<u8>, CheckpointError> {
        bincode::serialize(self).map_err(|e| CheckpointError::SerializationFailed(e.to_string()))
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self, CheckpointError> {
        bincode::deserialize(bytes)
            .map_err(|e| CheckpointError::DeserializationFailed(e.to_string()))
    }
}

fn lookup(index: &HierarchyIndex, name: &str) -> Result<StateId, CheckpointError> {
    index
        .id_of(name)
        .ok_or_else(|| CheckpointError::UnknownState(name.to_string()))
}
