//! Execution state models

use crate::core::analytics::RunAnalytics;
use crate::core::row::Row;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Ready to process the step at the cursor
    Idle,
    /// A step is in flight
    Processing,
    /// Cancellation requested, waiting for the in-flight batch
    Cancelling,
    /// Run stopped early by request
    Cancelled,
    /// All steps processed
    Complete,
    /// The step at the cursor failed; retry re-enters processing
    Error,
}

impl RunStatus {
    /// No further transitions happen from these states
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Cancelled)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, RunStatus::Processing | RunStatus::Cancelling)
    }
}

/// Status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    Pending,
    Processing,
    Complete,
    Error,
    Cancelled,
}

/// Status entry reported for each step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub status: StepPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepStatus {
    pub fn new(status: StepPhase) -> Self {
        Self {
            status,
            message: None,
        }
    }

    pub fn with_message(status: StepPhase, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

/// Why the run halted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub step_id: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn new(step_id: &str, message: impl Into<String>) -> Self {
        Self {
            step_id: step_id.to_string(),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// A human-readable run log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Most recent log entries kept in the run state
pub const MAX_LOG_ENTRIES: usize = 500;

/// Snapshot of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    /// Unique run ID
    pub run_id: Uuid,

    /// Index of the next step to process; only moves forward
    pub current_step_index: usize,

    pub status: RunStatus,

    /// step id -> status
    pub step_status: HashMap<String, StepStatus>,

    pub analytics: RunAnalytics,

    /// Every row of the run, tagged or not
    pub processed_rows: Vec<Row>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    /// Recent run log, oldest first
    #[serde(default)]
    pub logs: Vec<LogEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Create an empty, idle state
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            current_step_index: 0,
            status: RunStatus::Idle,
            step_status: HashMap::new(),
            analytics: RunAnalytics::new(0),
            processed_rows: Vec::new(),
            error: None,
            logs: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Append to the run log, dropping the oldest entries past the cap
    pub fn push_log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
        if self.logs.len() > MAX_LOG_ENTRIES {
            let excess = self.logs.len() - MAX_LOG_ENTRIES;
            self.logs.drain(..excess);
        }
    }

    /// Rows not yet excluded by any filter
    pub fn eligible_count(&self) -> usize {
        self.processed_rows.iter().filter(|r| r.is_eligible()).count()
    }

    /// True when every step ran and no error is pending
    pub fn processing_complete(&self, total_steps: usize) -> bool {
        total_steps > 0 && self.current_step_index == total_steps && self.error.is_none()
    }

    /// Fraction of steps completed (0.0 to 1.0)
    pub fn progress(&self, total_steps: usize) -> f64 {
        if total_steps == 0 {
            return 0.0;
        }
        self.current_step_index as f64 / total_steps as f64
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
