//! Errors raised while saving or restoring an instance.

use crate::builder::BuildError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    /// JSON or bincode encoding failed
    #[error("Could not encode checkpoint: {0}")]
    SerializationFailed(String),

    /// Input was not a well-formed checkpoint
    #[error("Could not decode checkpoint: {0}")]
    DeserializationFailed(String),

    #[error("Checkpoint format {found} is not readable, expected {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Taken on a different machine definition
    #[error("Checkpoint belongs to machine '{found}', expected '{expected}'")]
    MachineMismatch { expected: String, found: String },

    #[error("Checkpoint references unknown state '{0}'")]
    UnknownState(String),

    /// States exist but their combination is impossible for this hierarchy
    #[error("Checkpoint does not fit the hierarchy: {0}")]
    ValidationFailed(String),

    /// Definition cannot back the kind of instance being restored
    #[error(transparent)]
    Scheduling(#[from] BuildError),
}
