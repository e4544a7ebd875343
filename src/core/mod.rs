//! Core domain models for the enrichment pipeline
//!
//! Rows, step definitions, filter rules, metrics, analytics and run state.

pub mod analytics;
pub mod config;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod row;
pub mod state;
pub mod step;

pub use analytics::{RunAnalytics, RunSummary};
pub use error::*;
pub use filter::*;
pub use metrics::*;
pub use row::*;
pub use state::*;
pub use step::*;
