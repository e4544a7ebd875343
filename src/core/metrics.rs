//! Per-step metrics and the context services report usage through

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metrics for one step (or one sub-step reported by a service)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMetrics {
    pub step_id: String,
    /// Eligible rows when the step began
    pub input_count: usize,
    /// Rows still eligible after the step's filter
    pub output_count: usize,
    /// Rows tagged by the step's filter
    pub filtered_count: usize,
    pub processing_time_ms: u64,
    pub api_calls: u64,
    pub tokens_used: u64,
    pub credits_used: u64,
    /// Lookups served from the shared enrichment store instead of an API
    pub cache_hits: u64,
    pub errors: u64,
    #[serde(default)]
    pub is_substep: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepMetrics {
    /// Empty metrics for a step that is about to start
    pub fn begin(step_id: &str, input_count: usize) -> Self {
        Self {
            step_id: step_id.to_string(),
            input_count,
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Fold service-reported usage into these metrics
    pub fn absorb(&mut self, usage: &MetricsContext) {
        self.api_calls += usage.api_calls;
        self.tokens_used += usage.tokens_used;
        self.credits_used += usage.credits_used;
        self.cache_hits += usage.cache_hits;
        self.errors += usage.errors;
    }
}

/// Usage counters passed by `&mut` into every enrichment call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsContext {
    pub api_calls: u64,
    pub tokens_used: u64,
    pub credits_used: u64,
    pub cache_hits: u64,
    pub errors: u64,
    substeps: Vec<StepMetrics>,
}

impl MetricsContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_api_call(&mut self) {
        self.api_calls += 1;
    }

    pub fn record_tokens(&mut self, tokens: u64) {
        self.tokens_used += tokens;
    }

    pub fn record_credits(&mut self, credits: u64) {
        self.credits_used += credits;
    }

    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Report metrics for a sub-step (e.g. website analysis inside a profile lookup)
    pub fn report_substep(&mut self, metrics: StepMetrics) {
        self.substeps.push(metrics);
    }

    pub fn substeps(&self) -> &[StepMetrics] {
        &self.substeps
    }

    /// Take the reported sub-steps, leaving none behind
    pub fn take_substeps(&mut self) -> Vec<StepMetrics> {
        std::mem::take(&mut self.substeps)
    }
}
