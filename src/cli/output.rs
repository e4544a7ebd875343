//! CLI output formatting

use crate::{
    core::{RunState, RunStatus, RunSummary, StepDefinition, StepMetrics, StepPhase},
    execution::ExecutionEvent,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Progress bar over a step's 0-100 percent
pub fn create_progress_bar() -> ProgressBar {
    let progress = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Reflect an event on the progress bar
pub fn render_event(progress: &ProgressBar, event: &ExecutionEvent) {
    match event {
        ExecutionEvent::Log(entry) => {
            progress.println(format!(
                "{} {} {}",
                INFO,
                style(entry.timestamp.format("%H:%M:%S")).dim(),
                entry.message
            ));
        }
        ExecutionEvent::Progress { percent, message } => {
            progress.set_position(percent.clamp(0.0, 100.0) as u64);
            if let Some(message) = message {
                progress.set_message(message.clone());
            }
        }
        ExecutionEvent::StepStatus(_) => {}
        ExecutionEvent::RunStatus { status, .. } => {
            if *status == RunStatus::Cancelling {
                progress.println(format!("{} Cancelling after the current batch...", WARN));
            }
        }
    }
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Idle => style("IDLE").dim().to_string(),
        RunStatus::Processing => style("PROCESSING").yellow().to_string(),
        RunStatus::Cancelling => style("CANCELLING").yellow().to_string(),
        RunStatus::Cancelled => style("CANCELLED").yellow().to_string(),
        RunStatus::Complete => style("COMPLETE").green().to_string(),
        RunStatus::Error => style("ERROR").red().to_string(),
    }
}

/// Format a step phase for display
pub fn format_step_phase(phase: StepPhase) -> String {
    match phase {
        StepPhase::Pending => style("PENDING").dim().to_string(),
        StepPhase::Processing => style("PROCESSING").yellow().to_string(),
        StepPhase::Complete => style("COMPLETE").green().to_string(),
        StepPhase::Error => style("ERROR").red().to_string(),
        StepPhase::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// One line per step with its status
pub fn format_step_lines(steps: &[StepDefinition], state: &RunState) -> Vec<String> {
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let marker = if i == state.current_step_index && !state.status.is_terminal() {
                style(">").cyan().to_string()
            } else {
                " ".to_string()
            };
            let (phase, message) = match state.step_status.get(&step.id) {
                Some(status) => (format_step_phase(status.status), status.message.clone()),
                None => (format_step_phase(StepPhase::Pending), None),
            };
            match message {
                Some(message) => format!(
                    "{} {}. {} {} {}",
                    marker,
                    i + 1,
                    style(step.display_name()).bold(),
                    phase,
                    style(message).dim()
                ),
                None => format!(
                    "{} {}. {} {}",
                    marker,
                    i + 1,
                    style(step.display_name()).bold(),
                    phase
                ),
            }
        })
        .collect()
}

fn format_step_metrics(metrics: &StepMetrics) -> String {
    let name = if metrics.is_substep {
        format!("  - {}", metrics.step_id)
    } else {
        metrics.step_id.clone()
    };
    format!(
        "{}: {} in, {} out, {} filtered, {} api calls, {} tokens, {} cache hits, {}",
        style(name).bold(),
        metrics.input_count,
        style(metrics.output_count).green(),
        style(metrics.filtered_count).yellow(),
        metrics.api_calls,
        metrics.tokens_used,
        metrics.cache_hits,
        style(format_duration(Duration::from_millis(metrics.processing_time_ms))).dim()
    )
}

/// Summary block printed after a run
pub fn format_summary(summary: &RunSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "{} of {} rows remain relevant ({})",
        style(summary.final_count).green().bold(),
        summary.original_count,
        style(format!("{:.1}% pass rate", summary.pass_rate * 100.0)).cyan()
    )];
    lines.extend(summary.steps.iter().map(format_step_metrics));
    lines.push(format!(
        "Totals: {} api calls, {} tokens, {} credits, {} errors in {}",
        summary.total_api_calls,
        summary.total_tokens,
        summary.total_credits,
        summary.total_errors,
        format_duration(Duration::from_millis(summary.total_processing_time_ms))
    ));
    lines
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
