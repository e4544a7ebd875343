//! Run analytics - per-step metrics and run-level rollups

use crate::core::metrics::StepMetrics;
use serde::{Deserialize, Serialize};

/// Accumulated metrics for one run
///
/// Entries are kept in the order they arrive. Sub-step metrics reported by a
/// service are appended after their parent, flagged `is_substep`, and never
/// overwrite the parent entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAnalytics {
    /// Rows in the run when it was initialized
    pub original_count: usize,
    entries: Vec<StepMetrics>,
}

/// Run-level rollup consumed by reporting and export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub original_count: usize,
    pub final_count: usize,
    /// `final_count / original_count`, 0.0 for an empty run
    pub pass_rate: f64,
    pub total_processing_time_ms: u64,
    pub total_api_calls: u64,
    pub total_tokens: u64,
    pub total_credits: u64,
    pub total_cache_hits: u64,
    pub total_errors: u64,
    pub steps: Vec<StepMetrics>,
}

impl RunAnalytics {
    pub fn new(original_count: usize) -> Self {
        Self {
            original_count,
            entries: Vec::new(),
        }
    }

    /// Forget earlier metrics for a step that is starting (again)
    pub fn begin_step(&mut self, step_id: &str) {
        self.entries.retain(|m| {
            m.step_id != step_id && m.parent_step.as_deref() != Some(step_id)
        });
    }

    /// Record the finalized metrics of a step
    pub fn record_step(&mut self, mut metrics: StepMetrics) {
        metrics.is_substep = false;
        metrics.parent_step = None;
        self.entries.push(metrics);
    }

    /// Append sub-step metrics under a parent step
    pub fn record_substep(&mut self, parent: &str, mut metrics: StepMetrics) {
        metrics.is_substep = true;
        metrics.parent_step = Some(parent.to_string());
        self.entries.push(metrics);
    }

    /// Every entry, steps and sub-steps, in arrival order
    pub fn get_all_metrics(&self) -> &[StepMetrics] {
        &self.entries
    }

    /// Main entry for a step
    pub fn step(&self, step_id: &str) -> Option<&StepMetrics> {
        self.entries
            .iter()
            .find(|m| !m.is_substep && m.step_id == step_id)
    }

    pub fn substeps<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a StepMetrics> + 'a {
        self.entries
            .iter()
            .filter(move |m| m.is_substep && m.parent_step.as_deref() == Some(parent))
    }

    /// Roll the run up. Totals count main step entries only; sub-steps are a breakdown.
    pub fn summary(&self, final_count: usize) -> RunSummary {
        let main = || self.entries.iter().filter(|m| !m.is_substep);

        let pass_rate = if self.original_count == 0 {
            0.0
        } else {
            final_count as f64 / self.original_count as f64
        };

        RunSummary {
            original_count: self.original_count,
            final_count,
            pass_rate,
            total_processing_time_ms: main().map(|m| m.processing_time_ms).sum(),
            total_api_calls: main().map(|m| m.api_calls).sum(),
            total_tokens: main().map(|m| m.tokens_used).sum(),
            total_credits: main().map(|m| m.credits_used).sum(),
            total_cache_hits: main().map(|m| m.cache_hits).sum(),
            total_errors: main().map(|m| m.errors).sum(),
            steps: self.entries.clone(),
        }
    }
}
