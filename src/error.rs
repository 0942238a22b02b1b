//! Error handling for FlowVis-RS
//!
//! This module defines the crate-level error type and a Result alias used by
//! configuration loading, timeline export and the CLI.

use crate::pipeline::error::PipelineError;
use thiserror::Error;

/// Main error type for FlowVis-RS operations
#[derive(Error, Debug)]
pub enum FlowVisError {
    /// Errors raised while assembling or simulating a pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FlowVisError>,
    },
}

impl FlowVisError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FlowVisError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The pipeline error at the bottom of a context chain, if any.
    pub fn pipeline_error(&self) -> Option<&PipelineError> {
        match self {
            FlowVisError::Pipeline(err) => Some(err),
            FlowVisError::WithContext { source, .. } => source.pipeline_error(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FlowVisError {
    fn from(err: serde_json::Error) -> Self {
        FlowVisError::Serialization(err.to_string())
    }
}

/// Result type alias for FlowVis-RS operations
pub type Result<T> = std::result::Result<T, FlowVisError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<FlowVisError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
