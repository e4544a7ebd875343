//! Test utility functions for leadflow scenarios

use async_trait::async_trait;
use leadflow::core::{
    ingest_rows, MetricsContext, Row, RowKey, RunState, RunStatus, StepMetrics, StepPhase,
};
use leadflow::enrichment::{EnrichmentError, EnrichmentService, ServiceRegistry};
use leadflow::execution::{ExecutionEvent, PipelineOrchestrator};
use leadflow::{FilterAction, FilterOperator, FilterRule, FilterSpec, StepDefinition};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Enrich = dyn Fn(&mut Row) + Send + Sync;

/// Scripted enrichment service
///
/// Applies a closure to every row it receives, records which keys each call
/// was sent, and can fail chosen calls or report sub-step metrics.
#[derive(Clone)]
pub struct MockService {
    enrich: Arc<Enrich>,
    calls: Arc<AtomicUsize>,
    fail_on: Arc<Mutex<HashSet<usize>>>,
    sent: Arc<Mutex<Vec<Vec<RowKey>>>>,
    delay: Option<Duration>,
    tokens_per_row: u64,
    substep: Option<String>,
    drop_last: bool,
    add_stranger: bool,
}

impl MockService {
    pub fn new<F>(enrich: F) -> Self
    where
        F: Fn(&mut Row) + Send + Sync + 'static,
    {
        Self {
            enrich: Arc::new(enrich),
            calls: Arc::new(AtomicUsize::new(0)),
            fail_on: Arc::new(Mutex::new(HashSet::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
            delay: None,
            tokens_per_row: 0,
            substep: None,
            drop_last: false,
            add_stranger: false,
        }
    }

    /// Service that sets `field` to `value` on every row
    pub fn setting(field: &'static str, value: Value) -> Self {
        Self::new(move |row| row.set(field, value.clone()))
    }

    /// Fail the given 1-based call number (once)
    pub fn failing_on_call(self, call: usize) -> Self {
        self.fail_on.lock().unwrap().insert(call);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_tokens_per_row(mut self, tokens: u64) -> Self {
        self.tokens_per_row = tokens;
        self
    }

    /// Report a sub-step with this id on every call
    pub fn with_substep(mut self, id: &str) -> Self {
        self.substep = Some(id.to_string());
        self
    }

    /// Misbehave: omit the last row of every batch
    pub fn dropping_last_row(mut self) -> Self {
        self.drop_last = true;
        self
    }

    /// Misbehave: return an extra row nobody sent
    pub fn adding_stranger(mut self) -> Self {
        self.add_stranger = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every key sent to the service, across all calls
    pub fn sent_keys(&self) -> Vec<RowKey> {
        self.sent.lock().unwrap().iter().flatten().cloned().collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.sent.lock().unwrap().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl EnrichmentService for MockService {
    async fn process_batch(
        &self,
        mut rows: Vec<Row>,
        _config: &Map<String, Value>,
        metrics: &mut MetricsContext,
    ) -> Result<Vec<Row>, EnrichmentError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent
            .lock()
            .unwrap()
            .push(rows.iter().map(|r| r.key().clone()).collect());

        if self.fail_on.lock().unwrap().remove(&call) {
            return Err(EnrichmentError::Api(format!("MockService: call {} failed", call)));
        }

        metrics.record_api_call();
        metrics.record_tokens(self.tokens_per_row * rows.len() as u64);
        if let Some(id) = &self.substep {
            let mut sub = StepMetrics::begin(id, rows.len());
            sub.output_count = rows.len();
            sub.api_calls = 1;
            metrics.report_substep(sub);
        }

        for row in rows.iter_mut() {
            (self.enrich)(row);
        }
        if self.drop_last {
            rows.pop();
        }
        if self.add_stranger {
            rows.push(Row::with_key(RowKey::from("id:stranger"), Map::new()));
        }
        Ok(rows)
    }
}

/// `n` leads with ids, companies and headcount `i * 10`
pub fn lead_rows(n: usize) -> Vec<Row> {
    ingest_rows(
        (0..n)
            .map(|i| {
                json!({
                    "id": i,
                    "company": format!("Company {}", i),
                    "headcount": i * 10,
                })
            })
            .collect(),
    )
}

pub fn rule(
    field: &str,
    operator: FilterOperator,
    value: &str,
    action: FilterAction,
) -> FilterRule {
    FilterRule {
        field: field.to_string(),
        operator,
        value: value.to_string(),
        action,
    }
}

pub fn filter(prefix: &str, rules: Vec<FilterRule>) -> FilterSpec {
    FilterSpec {
        rules,
        tag_prefix: prefix.to_string(),
    }
}

/// Orchestrator with no step delay and no persistence
pub async fn orchestrator(services: ServiceRegistry, batch_size: usize) -> PipelineOrchestrator {
    PipelineOrchestrator::builder(services)
        .batch_size(batch_size)
        .step_delay(Duration::ZERO)
        .build()
        .await
        .unwrap_or_else(|e| panic!("Failed to build orchestrator: {}", e))
}

/// Orchestrator already initialized with rows and steps
pub async fn started_run(
    services: ServiceRegistry,
    batch_size: usize,
    rows: Vec<Row>,
    steps: Vec<StepDefinition>,
) -> PipelineOrchestrator {
    let orch = orchestrator(services, batch_size).await;
    orch.initialize(rows, steps)
        .await
        .unwrap_or_else(|e| panic!("Failed to initialize run: {}", e));
    orch
}

/// Step percentages reported by batch progress events
pub fn batch_percents(events: &[ExecutionEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::Progress { percent, message } => message
                .as_deref()
                .filter(|m| m.starts_with("Processing"))
                .map(|_| *percent),
            _ => None,
        })
        .collect()
}

/// Drain every event currently queued on a subscription
pub fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Keys of rows that carry a relevance tag
pub fn tagged_keys(state: &RunState) -> HashSet<RowKey> {
    state
        .processed_rows
        .iter()
        .filter(|r| !r.is_eligible())
        .map(|r| r.key().clone())
        .collect()
}

/// Assert the run ended in a given status
pub fn assert_run_status(state: &RunState, expected: RunStatus) {
    assert_eq!(
        state.status, expected,
        "Run should be {:?}, but was {:?} (error: {:?})",
        expected, state.status, state.error
    );
}

/// Assert a step's status and that its message mentions `fragment`
pub fn assert_step_status(state: &RunState, step_id: &str, expected: StepPhase, fragment: &str) {
    let status = state
        .step_status
        .get(step_id)
        .unwrap_or_else(|| panic!("Step '{}' has no status", step_id));

    assert_eq!(
        status.status, expected,
        "Step '{}' should be {:?}, but was {:?}",
        step_id, expected, status.status
    );

    let message = status.message.clone().unwrap_or_default();
    assert!(
        message.contains(fragment),
        "Step '{}' message:\n{}\n\ndoes not contain:\n{}",
        step_id, message, fragment
    );
}

/// Assert no row was created or lost
pub fn assert_row_count(state: &RunState, expected: usize) {
    assert_eq!(
        state.processed_rows.len(),
        expected,
        "Run should hold {} rows, but holds {}",
        expected,
        state.processed_rows.len()
    );
}
