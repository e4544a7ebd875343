//! Test: Batch progress - one progress report per batch over eligible rows

use crate::helpers::*;
use leadflow::core::ingest_rows;
use leadflow::execution::ExecutionEvent;
use leadflow::{ServiceRegistry, StepDefinition};
use serde_json::json;

#[tokio::test]
async fn test_25_rows_in_batches_of_10() {
    let service = MockService::setting("verified", json!(true));
    let services = ServiceRegistry::new().with("apollo", service.clone());

    let orch = started_run(services, 10, lead_rows(25), vec![StepDefinition::new("apollo")]).await;
    let mut rx = orch.subscribe();
    orch.process_current_step().await;

    assert_eq!(batch_percents(&drain(&mut rx)), vec![40.0, 80.0, 100.0]);
    assert_eq!(service.batch_sizes(), vec![10, 10, 5]);
}

#[tokio::test]
async fn test_progress_counts_only_eligible_rows() {
    let mut values: Vec<_> = (0..25).map(|i| json!({"id": i})).collect();
    for i in 0..5 {
        values.push(json!({"id": 100 + i, "relevanceTag": "imported"}));
    }
    let service = MockService::setting("verified", json!(true));
    let services = ServiceRegistry::new().with("apollo", service.clone());

    let steps = vec![StepDefinition::new("apollo")];
    let orch = started_run(services, 10, ingest_rows(values), steps).await;
    let mut rx = orch.subscribe();
    orch.process_current_step().await;

    assert_eq!(batch_percents(&drain(&mut rx)), vec![40.0, 80.0, 100.0]);
    assert_eq!(service.sent_keys().len(), 25);
}

#[tokio::test]
async fn test_log_and_status_events_follow_the_run() {
    let service = MockService::setting("verified", json!(true));
    let services = ServiceRegistry::new().with("apollo", service);
    let orch = started_run(services, 3, lead_rows(6), vec![StepDefinition::new("apollo")]).await;
    let mut rx = orch.subscribe();
    orch.process_current_step().await;

    let events = drain(&mut rx);
    let logs: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::Log(entry) => Some(entry.message.clone()),
            _ => None,
        })
        .collect();
    assert!(logs.first().is_some_and(|m| m.starts_with("Starting step 1/1")));
    assert!(logs.iter().any(|m| m.contains("batch 2/2")));
    assert!(logs.iter().any(|m| m.starts_with("Run complete")));

    let last_status = events.iter().rev().find_map(|e| match e {
        ExecutionEvent::StepStatus(map) => map.get("apollo").map(|s| s.status),
        _ => None,
    });
    assert_eq!(last_status, Some(leadflow::core::StepPhase::Complete));

    // The same lines are kept in the run state
    let state = orch.get_state();
    assert!(state.logs.iter().any(|l| l.message.starts_with("Run complete")));
}
