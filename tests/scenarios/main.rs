//! Scenario-based tests for leadflow

mod helpers;

mod batch_progress;
mod cancellation;
mod idempotent_retry;
mod monotonic_tagging;
mod row_conservation;
