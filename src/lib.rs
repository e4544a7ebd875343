//! leadflow - lead enrichment pipeline engine
//!
//! Rows pass through an ordered list of enrichment steps. Each step sends
//! the still-relevant rows to its service in batches, then applies its
//! filter rules, tagging rows that drop out. Tagged rows are never sent to
//! later steps but stay in the export.

pub mod cli;
pub mod core;
pub mod enrichment;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use core::{
    ConfigurationError, ExecutionError, FilterAction, FilterOperator, FilterRule, FilterSpec,
    PersistenceError, Row, RowKey, RunState, RunStatus, RunSummary, StepDefinition, StepMetrics,
};
pub use core::config::PipelineConfig;
pub use enrichment::{CommandService, EnrichmentError, EnrichmentService, ServiceRegistry};
pub use execution::{CancelHandle, ExecutionEvent, PipelineOrchestrator};
pub use persistence::{InMemoryStorage, StatePersistence, Storage};
