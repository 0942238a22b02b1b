//! Pipeline-specific error types.

use crate::pipeline::id::StageId;
use thiserror::Error;

/// Errors that can occur while assembling or simulating a pipeline.
///
/// An `InvariantViolation` means the simulation produced state it must never
/// reach; the run is aborted because the keyframe stream would be wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Invariant violated at stage {stage:?}: {message}")]
    InvariantViolation { stage: StageId, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn invariant(stage: StageId, message: impl Into<String>) -> Self {
        PipelineError::InvariantViolation {
            stage,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }

    /// Whether this error is an internal scheduling bug rather than bad input.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, PipelineError::InvariantViolation { .. })
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
