//! Test: Idempotent retry - a retried step lands where a clean run would

use crate::helpers::*;
use leadflow::core::{RunStatus, StepPhase};
use leadflow::{FilterAction, FilterOperator, ServiceRegistry, StepDefinition};
use serde_json::json;

fn scoring() -> MockService {
    MockService::new(|row| {
        let headcount = row.get("headcount").and_then(|v| v.as_i64()).unwrap_or_default();
        row.set("score", headcount / 10);
    })
}

fn steps() -> Vec<StepDefinition> {
    vec![
        StepDefinition::new("score").with_filter(filter(
            "score",
            vec![rule("score", FilterOperator::Between, "3,12", FilterAction::Pass)],
        )),
        StepDefinition::new("label"),
    ]
}

#[tokio::test]
async fn test_retry_matches_clean_run() {
    let clean = started_run(
        ServiceRegistry::new()
            .with("score", scoring())
            .with("label", MockService::setting("label", json!("ok"))),
        4,
        lead_rows(18),
        steps(),
    )
    .await;
    assert_eq!(clean.run_to_completion().await, RunStatus::Complete);

    let flaky = scoring().failing_on_call(3);
    let retried = started_run(
        ServiceRegistry::new()
            .with("score", flaky.clone())
            .with("label", MockService::setting("label", json!("ok"))),
        4,
        lead_rows(18),
        steps(),
    )
    .await;

    assert!(!retried.process_current_step().await);
    let halted = retried.get_state();
    assert_run_status(&halted, RunStatus::Error);
    assert_eq!(halted.current_step_index, 0);
    assert_step_status(&halted, "score", StepPhase::Error, "batch 3");
    assert_eq!(halted.error.as_ref().map(|e| e.step_id.as_str()), Some("score"));

    // A halted run does not move on by itself
    assert!(!retried.is_processing_complete());

    assert_eq!(retried.run_to_completion().await, RunStatus::Complete);
    assert_eq!(retried.rows(), clean.rows());

    let state = retried.get_state();
    assert!(state.error.is_none());
    assert_step_status(&state, "score", StepPhase::Complete, "rows passed");

    // One metrics entry per step even after a retry
    let summary = retried.summary();
    assert_eq!(summary.steps.len(), 2);
    assert_eq!(summary.final_count, clean.summary().final_count);
    assert_eq!(flaky.call_count(), 3 + 5);
}

#[tokio::test]
async fn test_retry_of_second_step_keeps_first() {
    let label = MockService::setting("label", json!("ok")).failing_on_call(1);
    let orch = started_run(
        ServiceRegistry::new()
            .with("score", scoring())
            .with("label", label),
        100,
        lead_rows(10),
        steps(),
    )
    .await;

    assert!(orch.process_current_step().await);
    assert!(!orch.process_current_step().await);

    let state = orch.get_state();
    assert_run_status(&state, RunStatus::Error);
    assert_eq!(state.current_step_index, 1);
    assert_step_status(&state, "score", StepPhase::Complete, "");

    assert!(!orch.process_current_step().await);
    let state = orch.get_state();
    assert_run_status(&state, RunStatus::Complete);
    assert!(orch.is_processing_complete());
    assert_eq!(state.analytics.step("score").map(|m| m.input_count), Some(10));
}
