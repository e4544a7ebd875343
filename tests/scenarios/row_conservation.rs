//! Test: Row conservation - the run never creates or loses rows

use crate::helpers::*;
use leadflow::core::{RunStatus, StepPhase};
use leadflow::{FilterAction, FilterOperator, ServiceRegistry, StepDefinition};
use serde_json::json;

/// Filters tag rows but every row stays in the run
#[tokio::test]
async fn test_rows_survive_every_step() {
    let services = ServiceRegistry::new()
        .with("apollo", MockService::setting("verified", json!(true)))
        .with("ai", MockService::setting("saas", json!("yes")));

    let steps = vec![
        StepDefinition::new("apollo").with_filter(filter(
            "size",
            vec![rule("headcount", FilterOperator::LessThan, "100", FilterAction::Eliminate)],
        )),
        StepDefinition::new("ai"),
    ];

    let orch = started_run(services, 7, lead_rows(40), steps).await;
    assert_row_count(&orch.get_state(), 40);

    while orch.process_current_step().await {
        assert_row_count(&orch.get_state(), 40);
    }

    let state = orch.get_state();
    assert_run_status(&state, RunStatus::Complete);
    assert_row_count(&state, 40);
    assert_eq!(tagged_keys(&state).len(), 10);
}

/// A service that returns too few rows, or rows nobody sent, cannot change the row count
#[tokio::test]
async fn test_misbehaving_service_cannot_change_row_count() {
    let service = MockService::setting("enriched", json!(true))
        .dropping_last_row()
        .adding_stranger();
    let services = ServiceRegistry::new().with("flaky", service.clone());

    let orch = started_run(services, 5, lead_rows(12), vec![StepDefinition::new("flaky")]).await;
    orch.run_to_completion().await;

    let state = orch.get_state();
    assert_run_status(&state, RunStatus::Complete);
    assert_row_count(&state, 12);
    assert!(state
        .processed_rows
        .iter()
        .all(|r| r.key().as_str() != "id:stranger"));

    // The omitted last row of each batch keeps its pre-step values
    let untouched: Vec<&str> = state
        .processed_rows
        .iter()
        .filter(|r| r.get("enriched").is_none())
        .map(|r| r.key().as_str())
        .collect();
    assert_eq!(untouched, vec!["id:4", "id:9", "id:11"]);
    assert_eq!(service.batch_sizes(), vec![5, 5, 2]);
}

/// A failed step leaves a complete, exportable row set
#[tokio::test]
async fn test_rows_kept_after_failure() {
    let services = ServiceRegistry::new()
        .with("apollo", MockService::setting("verified", json!(true)).failing_on_call(3));

    let orch = started_run(services, 4, lead_rows(20), vec![StepDefinition::new("apollo")]).await;
    assert!(!orch.process_current_step().await);

    let state = orch.get_state();
    assert_run_status(&state, RunStatus::Error);
    assert_step_status(&state, "apollo", StepPhase::Error, "call 3 failed");
    assert_row_count(&state, 20);

    let enriched = orch.rows().iter().filter(|r| r.get("verified").is_some()).count();
    assert_eq!(enriched, 8);
}
