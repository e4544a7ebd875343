//! Error taxonomy for pipeline runs

use crate::enrichment::EnrichmentError;
use thiserror::Error;

/// Invalid pipeline or step definition, detected before any row is touched
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Pipeline has no steps")]
    NoSteps,

    #[error("Step at position {0} has no id")]
    MissingStepId(usize),

    #[error("Duplicate step ID: {0}")]
    DuplicateStepId(String),

    #[error("Step '{step_id}' references unknown service '{service}'")]
    UnknownService { step_id: String, service: String },

    #[error("Invalid filter rule on step '{step_id}' (field '{field}'): {reason}")]
    InvalidRule {
        step_id: String,
        field: String,
        reason: String,
    },

    #[error("Batch size must be at least 1")]
    InvalidBatchSize,

    #[error("A run is already in progress")]
    RunInProgress,
}

/// A step failed while calling its enrichment service
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Step '{step_id}' failed on batch {batch}: {source}")]
    Batch {
        step_id: String,
        batch: usize,
        #[source]
        source: EnrichmentError,
    },

    #[error("No service registered for step '{step_id}' ('{service}')")]
    ServiceUnavailable { step_id: String, service: String },
}

impl ExecutionError {
    /// Step that raised the error
    pub fn step_id(&self) -> &str {
        match self {
            ExecutionError::Batch { step_id, .. } => step_id,
            ExecutionError::ServiceUnavailable { step_id, .. } => step_id,
        }
    }
}

/// Storage failures. Logged by the persistence adapter, never raised to the run.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Failed to encode run state: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode run state: {0}")]
    Decode(#[source] serde_json::Error),
}
