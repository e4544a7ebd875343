//! Test: Cancellation - a cancelled run stops between batches and keeps its work

use crate::helpers::*;
use leadflow::core::{RunStatus, StepPhase};
use leadflow::execution::ExecutionEvent;
use leadflow::{ServiceRegistry, StepDefinition};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_cancel_mid_step_keeps_completed_batches() {
    let service = MockService::setting("verified", json!(true))
        .with_delay(Duration::from_millis(20));
    let services = ServiceRegistry::new()
        .with("apollo", service.clone())
        .with("ai", MockService::setting("saas", json!("yes")));

    let orch = started_run(
        services,
        2,
        lead_rows(10),
        vec![StepDefinition::new("apollo"), StepDefinition::new("ai")],
    )
    .await;
    let mut rx = orch.subscribe();

    let (more, cancelled) = tokio::join!(orch.process_current_step(), async {
        // Cancel once the first batch has reported progress
        while let Some(event) = rx.recv().await {
            if matches!(event, ExecutionEvent::Progress { .. }) {
                return orch.cancel();
            }
        }
        false
    });

    assert!(!more);
    assert!(cancelled, "cancel() should be accepted while processing");

    let state = orch.get_state();
    assert_run_status(&state, RunStatus::Cancelled);
    assert_step_status(&state, "apollo", StepPhase::Cancelled, "Cancelled after");
    assert_row_count(&state, 10);
    assert_eq!(state.current_step_index, 0);

    // Batches that finished keep their enrichment; the rest keep their input values
    let enriched = state
        .processed_rows
        .iter()
        .filter(|r| r.get("verified").is_some())
        .count();
    assert!(enriched >= 2 && enriched < 10, "enriched {} rows", enriched);
    assert_eq!(enriched, service.sent_keys().len());
    assert!(state.processed_rows[..enriched].iter().all(|r| r.get("verified").is_some()));

    // No further transitions once cancelled
    assert!(!orch.process_current_step().await);
    assert!(!orch.cancel());
    assert_eq!(orch.rows(), state.processed_rows);
}

#[tokio::test]
async fn test_cancel_handle_from_another_task() {
    let service = MockService::setting("verified", json!(true))
        .with_delay(Duration::from_millis(10));
    let services = ServiceRegistry::new().with("apollo", service.clone());

    let orch = started_run(services, 1, lead_rows(50), vec![StepDefinition::new("apollo")]).await;
    let handle = orch.cancel_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(35)).await;
        handle.cancel();
    });

    assert_eq!(orch.run_to_completion().await, RunStatus::Cancelled);
    canceller.await.unwrap();

    let state = orch.get_state();
    assert_row_count(&state, 50);
    assert!(service.call_count() < 50);
    assert_step_status(&state, "apollo", StepPhase::Cancelled, "");
}

#[tokio::test]
async fn test_cancel_when_idle_is_ignored() {
    let service = MockService::setting("verified", json!(true));
    let services = ServiceRegistry::new().with("apollo", service);
    let orch = started_run(services, 5, lead_rows(5), vec![StepDefinition::new("apollo")]).await;

    assert!(!orch.cancel());
    assert_eq!(orch.run_to_completion().await, RunStatus::Complete);
    assert!(!orch.cancel());
}

#[tokio::test]
async fn test_new_run_after_cancel() {
    let service = MockService::setting("verified", json!(true))
        .with_delay(Duration::from_millis(10));
    let services = ServiceRegistry::new().with("apollo", service);
    let orch = started_run(services, 1, lead_rows(20), vec![StepDefinition::new("apollo")]).await;

    let handle = orch.cancel_handle();
    orch.add_event_handler(move |event| {
        if let ExecutionEvent::Progress { .. } = event {
            handle.cancel();
        }
    });
    assert_eq!(orch.run_to_completion().await, RunStatus::Cancelled);

    // A fresh initialize starts over with the flag cleared
    orch.initialize(lead_rows(3), vec![StepDefinition::new("apollo")])
        .await
        .unwrap();
    let state = orch.get_state();
    assert_run_status(&state, RunStatus::Idle);
    assert_row_count(&state, 3);
    assert_step_status(&state, "apollo", StepPhase::Pending, "");
}
