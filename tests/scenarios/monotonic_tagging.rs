//! Test: Monotonic tagging - tagged rows are never sent to later steps

use crate::helpers::*;
use leadflow::core::{ingest_rows, RunStatus};
use leadflow::{FilterAction, FilterOperator, ServiceRegistry, StepDefinition};
use serde_json::json;

#[tokio::test]
async fn test_tagged_rows_skip_later_steps() {
    let apollo = MockService::setting("verified", json!(true));
    let ai = MockService::setting("saas", json!("yes"));
    let jobs = MockService::setting("hiring", json!(false));
    let services = ServiceRegistry::new()
        .with("apollo", apollo.clone())
        .with("ai", ai.clone())
        .with("jobs", jobs.clone());

    let steps = vec![
        StepDefinition::new("apollo").with_filter(filter(
            "size",
            vec![rule("headcount", FilterOperator::LessThan, "50", FilterAction::Eliminate)],
        )),
        StepDefinition::new("ai").with_filter(filter(
            "ai",
            vec![rule("company", FilterOperator::EndsWith, "9", FilterAction::Eliminate)],
        )),
        StepDefinition::new("jobs"),
    ];

    let orch = started_run(services, 10, lead_rows(30), steps).await;

    orch.process_current_step().await;
    let after_first = tagged_keys(&orch.get_state());
    assert_eq!(after_first.len(), 5);

    orch.process_current_step().await;
    let after_second = tagged_keys(&orch.get_state());
    assert!(after_first.is_subset(&after_second));

    orch.process_current_step().await;
    let state = orch.get_state();
    assert_run_status(&state, RunStatus::Complete);

    assert_eq!(apollo.sent_keys().len(), 30);
    assert!(ai.sent_keys().iter().all(|k| !after_first.contains(k)));
    assert!(jobs.sent_keys().iter().all(|k| !after_second.contains(k)));
    assert_eq!(jobs.sent_keys().len(), 30 - after_second.len());

    // Tagged rows carry no fields from steps after the one that tagged them
    for row in state.processed_rows.iter().filter(|r| after_first.contains(r.key())) {
        assert!(row.get("saas").is_none());
        assert!(row.get("hiring").is_none());
        assert!(row.relevance_tag().starts_with("size_headcount_lessThan_50"));
    }
}

#[tokio::test]
async fn test_tags_are_never_rewritten() {
    let services = ServiceRegistry::new()
        .with("first", MockService::setting("tier", json!("gold")))
        .with("second", MockService::setting("tier", json!("gold")));

    // Both steps would exclude the same row; only the first tag sticks
    let steps = vec![
        StepDefinition::new("first").with_filter(filter(
            "one",
            vec![rule("tier", FilterOperator::Equals, "GOLD", FilterAction::Eliminate)],
        )),
        StepDefinition::new("second").with_filter(filter(
            "two",
            vec![rule("tier", FilterOperator::Equals, "gold", FilterAction::Eliminate)],
        )),
    ];

    let orch = started_run(services, 10, lead_rows(3), steps).await;
    orch.run_to_completion().await;

    for row in orch.rows() {
        assert_eq!(row.relevance_tag(), "one_tier_equals_GOLD");
    }
}

#[tokio::test]
async fn test_rows_tagged_before_ingestion_are_not_sent() {
    let service = MockService::setting("verified", json!(true));
    let services = ServiceRegistry::new().with("apollo", service.clone());
    let rows = ingest_rows(vec![
        json!({"id": "a"}),
        json!({"id": "b", "relevanceTag": "imported_duplicate"}),
        json!({"id": "c"}),
    ]);

    let orch = started_run(services, 10, rows, vec![StepDefinition::new("apollo")]).await;
    orch.run_to_completion().await;

    let sent: Vec<String> = service.sent_keys().iter().map(|k| k.to_string()).collect();
    assert_eq!(sent, vec!["id:a", "id:c"]);
    assert_eq!(orch.rows()[1].relevance_tag(), "imported_duplicate");
}
