//! Pipeline orchestrator - the single authority over a run's progress

use crate::{
    core::{
        apply_filters,
        config::{validate_steps, DEFAULT_BATCH_SIZE, DEFAULT_STEP_DELAY_MS, DEFAULT_STORAGE_KEY},
        ConfigurationError, ErrorInfo, ExecutionError, LogEntry, MetricsContext, Row, RowKey,
        RunAnalytics, RunState, RunStatus, RunSummary, StepDefinition, StepMetrics, StepPhase,
        StepStatus,
    },
    enrichment::ServiceRegistry,
    execution::{
        events::{relock, EventBus, ExecutionEvent},
        BatchProgress, BatchScheduler, CancelHandle, StepExecutor, StepRun,
    },
    persistence::{StatePersistence, Storage},
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Steps and state guarded together
struct Inner {
    steps: Vec<StepDefinition>,
    state: RunState,
}

impl Inner {
    fn log(&mut self, outbox: &mut Vec<ExecutionEvent>, message: impl Into<String>) {
        let entry = LogEntry::now(message);
        debug!("{}", entry.message);
        self.state.push_log(entry.clone());
        outbox.push(ExecutionEvent::Log(entry));
    }

    fn announce(&self, outbox: &mut Vec<ExecutionEvent>) {
        outbox.push(ExecutionEvent::StepStatus(self.state.step_status.clone()));
        outbox.push(ExecutionEvent::RunStatus {
            run_id: self.state.run_id,
            status: self.state.status,
        });
    }

    fn current_step(&self) -> Option<&StepDefinition> {
        self.steps.get(self.state.current_step_index)
    }

    /// A persisted run caught mid-step cannot resume that step's batches
    fn mark_interrupted(&mut self) {
        let step_id = match self.current_step() {
            Some(step) => step.id.clone(),
            None => {
                self.state.status = RunStatus::Idle;
                return;
            }
        };
        warn!("Run {} was interrupted during step {}", self.state.run_id, step_id);
        self.state
            .step_status
            .insert(step_id.clone(), StepStatus::with_message(StepPhase::Error, "interrupted"));
        self.state.error = Some(ErrorInfo::new(&step_id, "interrupted"));
        self.state.status = RunStatus::Error;
    }
}

/// Builder for [`PipelineOrchestrator`]
pub struct OrchestratorBuilder {
    services: ServiceRegistry,
    storage: Option<Arc<dyn Storage>>,
    storage_key: String,
    batch_size: usize,
    step_delay: Duration,
}

impl OrchestratorBuilder {
    /// Persist run state to this backend and rehydrate from it on build
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Pause after each completed step
    pub fn step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Build the orchestrator, rehydrating any run persisted under the storage key
    pub async fn build(self) -> Result<PipelineOrchestrator, ConfigurationError> {
        let scheduler = BatchScheduler::new(self.batch_size)?;
        let persistence = self
            .storage
            .map(|storage| StatePersistence::new(storage, self.storage_key));

        let mut inner = Inner {
            steps: Vec::new(),
            state: RunState::new(),
        };

        if let Some(persistence) = &persistence {
            if let Some(run) = persistence.load().await {
                info!(
                    "Rehydrated run {} at step {}/{} ({:?})",
                    run.state.run_id,
                    run.state.current_step_index,
                    run.steps.len(),
                    run.state.status
                );
                inner.steps = run.steps;
                inner.state = run.state;
                if inner.state.status.is_busy() {
                    inner.mark_interrupted();
                }
            }
        }

        Ok(PipelineOrchestrator {
            services: self.services,
            scheduler,
            step_delay: self.step_delay,
            persistence,
            events: EventBus::new(),
            cancel: CancelHandle::new(),
            inner: Mutex::new(inner),
        })
    }
}

/// Drives a run one step at a time.
///
/// The caller owns the instance and the loop: `process_current_step` runs
/// exactly one step and reports whether more remain. Only one step is ever
/// in flight; a call made while another is running returns `false` without
/// touching the run.
pub struct PipelineOrchestrator {
    services: ServiceRegistry,
    scheduler: BatchScheduler,
    step_delay: Duration,
    persistence: Option<StatePersistence>,
    events: EventBus,
    cancel: CancelHandle,
    inner: Mutex<Inner>,
}

impl PipelineOrchestrator {
    pub fn builder(services: ServiceRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder {
            services,
            storage: None,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            step_delay: Duration::from_millis(DEFAULT_STEP_DELAY_MS),
        }
    }

    /// Orchestrator with default options and no persistence
    pub async fn new(services: ServiceRegistry) -> Result<Self, ConfigurationError> {
        Self::builder(services).build().await
    }

    /// Register a synchronous event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.add_handler(handler);
    }

    /// Receive every event from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Handle that can request cancellation from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Apply a closure to the guarded state, then emit the events it queued
    fn update<R>(&self, f: impl FnOnce(&mut Inner, &mut Vec<ExecutionEvent>) -> R) -> R {
        let mut outbox = Vec::new();
        let result = {
            let mut inner = relock(&self.inner);
            f(&mut inner, &mut outbox)
        };
        for event in outbox {
            self.events.emit(event);
        }
        result
    }

    async fn persist(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let (steps, state) = {
            let inner = relock(&self.inner);
            (inner.steps.clone(), inner.state.clone())
        };
        persistence.save(&steps, &state).await;
    }

    /// Start a new run over `rows` with the given steps.
    ///
    /// Fails without touching the current run when the steps are invalid,
    /// a step names an unregistered service, or a step is in flight.
    pub async fn initialize(
        &self,
        rows: Vec<Row>,
        steps: Vec<StepDefinition>,
    ) -> Result<(), ConfigurationError> {
        validate_steps(&steps)?;
        for step in &steps {
            if !self.services.contains(step.service_id()) {
                return Err(ConfigurationError::UnknownService {
                    step_id: step.id.clone(),
                    service: step.service_id().to_string(),
                });
            }
        }

        let duplicates = duplicate_keys(&rows);

        self.update(|inner, outbox| {
            if inner.state.status.is_busy() {
                return Err(ConfigurationError::RunInProgress);
            }

            self.cancel.reset();

            let mut state = RunState::new();
            state.analytics = RunAnalytics::new(rows.len());
            state.processed_rows = rows;
            state.started_at = Some(Utc::now());
            for step in &steps {
                state
                    .step_status
                    .insert(step.id.clone(), StepStatus::new(StepPhase::Pending));
            }

            inner.steps = steps;
            inner.state = state;
            let (row_count, step_count) = (inner.state.processed_rows.len(), inner.steps.len());
            inner.log(
                outbox,
                format!("Initialized run with {} rows and {} steps", row_count, step_count),
            );
            if !duplicates.is_empty() {
                inner.log(
                    outbox,
                    format!(
                        "Warning: {} row keys are shared by more than one row ({})",
                        duplicates.len(),
                        preview(&duplicates)
                    ),
                );
            }
            inner.announce(outbox);
            Ok(())
        })?;

        self.persist().await;
        Ok(())
    }

    /// Run the step at the cursor.
    ///
    /// Returns `true` when the step completed and more steps remain. Returns
    /// `false` when the run is finished, halted on an error, cancelled, busy,
    /// or has no steps. From `Error` the same step is retried.
    pub async fn process_current_step(&self) -> bool {
        let claimed = self.update(|inner, outbox| {
            let status = inner.state.status;
            if status.is_busy() || status.is_terminal() {
                debug!("Ignoring process request while {:?}", status);
                return None;
            }
            let step = inner.current_step()?.clone();

            // Cleared under the lock so a cancel issued once Processing is visible is kept
            self.cancel.reset();

            let retry = status == RunStatus::Error;
            inner.state.status = RunStatus::Processing;
            inner.state.error = None;
            inner.state.analytics.begin_step(&step.id);
            inner
                .state
                .step_status
                .insert(step.id.clone(), StepStatus::new(StepPhase::Processing));

            let index = inner.state.current_step_index;
            let total = inner.steps.len();
            let verb = if retry { "Retrying" } else { "Starting" };
            inner.log(
                outbox,
                format!("{} step {}/{}: {}", verb, index + 1, total, step.display_name()),
            );
            inner.announce(outbox);

            Some((step, inner.state.processed_rows.clone()))
        });

        let Some((step, mut rows)) = claimed else {
            return false;
        };
        self.persist().await;

        let Some(service) = self.services.get(step.service_id()) else {
            let err = ExecutionError::ServiceUnavailable {
                step_id: step.id.clone(),
                service: step.service_id().to_string(),
            };
            self.fail_step(&step, rows, &err).await;
            return false;
        };

        let executor = StepExecutor::new(service);
        let eligible = rows.iter().filter(|r| r.is_eligible()).count();
        let mut usage = MetricsContext::new();
        let mut metrics = StepMetrics::begin(&step.id, eligible);
        let started = Instant::now();

        let result = self
            .scheduler
            .run_step(&step, &mut rows, &executor, &mut usage, &self.cancel, |progress, rows| {
                self.on_batch(&step, progress, rows)
            })
            .await;

        metrics.processing_time_ms = started.elapsed().as_millis() as u64;
        metrics.absorb(&usage);

        match result {
            Ok(run) if run.cancelled || self.cancel.is_requested() => {
                self.finish_cancelled(&step, rows, metrics, usage, &run).await;
                false
            }
            Ok(_) => self.finish_step(&step, rows, metrics, usage).await,
            Err(err) => {
                self.fail_step(&step, rows, &err).await;
                false
            }
        }
    }

    fn on_batch(&self, step: &StepDefinition, progress: &BatchProgress, rows: &[Row]) {
        self.update(|inner, outbox| {
            inner.state.processed_rows = rows.to_vec();
            if self.cancel.is_requested() && inner.state.status == RunStatus::Processing {
                inner.state.status = RunStatus::Cancelling;
                inner.announce(outbox);
            }
            inner.log(
                outbox,
                format!(
                    "{}: batch {}/{} done, {}/{} rows",
                    step.display_name(),
                    progress.batch,
                    progress.total_batches,
                    progress.processed,
                    progress.eligible
                ),
            );
            outbox.push(ExecutionEvent::Progress {
                percent: progress.percent,
                message: Some(format!("Processing {}", step.display_name())),
            });
        });
    }

    async fn finish_step(
        &self,
        step: &StepDefinition,
        mut rows: Vec<Row>,
        mut metrics: StepMetrics,
        mut usage: MetricsContext,
    ) -> bool {
        let filtered = step
            .filter
            .as_ref()
            .map(|spec| apply_filters(&mut rows, spec, &step.id).tagged)
            .unwrap_or(0);

        metrics.filtered_count = filtered;
        metrics.output_count = metrics.input_count.saturating_sub(filtered);
        metrics.completed_at = Some(Utc::now());
        let substeps = usage.take_substeps();

        let more = self.update(|inner, outbox| {
            let summary = format!(
                "{} of {} rows passed",
                metrics.output_count, metrics.input_count
            );
            inner.state.processed_rows = rows;
            inner.state.analytics.record_step(metrics);
            for substep in substeps {
                inner.state.analytics.record_substep(&step.id, substep);
            }
            inner.state.step_status.insert(
                step.id.clone(),
                StepStatus::with_message(StepPhase::Complete, summary.clone()),
            );

            inner.state.current_step_index += 1;
            let more = inner.state.current_step_index < inner.steps.len();
            if more {
                inner.state.status = RunStatus::Idle;
            } else {
                inner.state.status = RunStatus::Complete;
                inner.state.completed_at = Some(Utc::now());
            }

            inner.log(
                outbox,
                format!("Completed step {}: {}", step.display_name(), summary),
            );
            if !more {
                let remaining = inner.state.eligible_count();
                let original = inner.state.analytics.original_count;
                inner.log(
                    outbox,
                    format!("Run complete: {} of {} rows remain relevant", remaining, original),
                );
            }
            outbox.push(ExecutionEvent::Progress {
                percent: 100.0,
                message: Some(format!("Completed {}", step.display_name())),
            });
            inner.announce(outbox);
            more
        });

        self.persist().await;

        if more && !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        more
    }

    async fn finish_cancelled(
        &self,
        step: &StepDefinition,
        rows: Vec<Row>,
        mut metrics: StepMetrics,
        mut usage: MetricsContext,
        run: &StepRun,
    ) {
        metrics.output_count = metrics.input_count;
        metrics.completed_at = Some(Utc::now());
        let substeps = usage.take_substeps();

        self.update(|inner, outbox| {
            inner.state.processed_rows = rows;
            inner.state.analytics.record_step(metrics);
            for substep in substeps {
                inner.state.analytics.record_substep(&step.id, substep);
            }
            let message = format!("Cancelled after {} of {} rows", run.processed, run.eligible);
            inner.state.step_status.insert(
                step.id.clone(),
                StepStatus::with_message(StepPhase::Cancelled, message.clone()),
            );
            inner.state.status = RunStatus::Cancelled;
            inner.state.completed_at = Some(Utc::now());
            inner.log(outbox, format!("{}: {}", step.display_name(), message));
            inner.announce(outbox);
        });

        self.persist().await;
    }

    async fn fail_step(&self, step: &StepDefinition, rows: Vec<Row>, err: &ExecutionError) {
        let message = err.to_string();
        warn!("Run halted at step {}: {}", step.id, message);

        self.update(|inner, outbox| {
            inner.state.processed_rows = rows;
            inner.state.step_status.insert(
                step.id.clone(),
                StepStatus::with_message(StepPhase::Error, message.clone()),
            );
            inner.state.error = Some(ErrorInfo::new(&step.id, message.clone()));
            inner.state.status = RunStatus::Error;
            inner.log(outbox, format!("Error in {}: {}", step.display_name(), message));
            inner.announce(outbox);
        });

        self.persist().await;
    }

    /// Request cancellation of the step in flight.
    ///
    /// Only honored while processing; the current batch finishes first.
    pub fn cancel(&self) -> bool {
        self.update(|inner, outbox| {
            if inner.state.status != RunStatus::Processing {
                debug!("Ignoring cancel while {:?}", inner.state.status);
                return false;
            }
            self.cancel.cancel();
            inner.state.status = RunStatus::Cancelling;
            inner.log(outbox, "Cancellation requested; finishing current batch");
            inner.announce(outbox);
            true
        })
    }

    /// Drive the run until it completes, halts or is cancelled
    pub async fn run_to_completion(&self) -> RunStatus {
        while self.process_current_step().await {}
        self.status()
    }

    /// Snapshot of the run state
    pub fn get_state(&self) -> RunState {
        relock(&self.inner).state.clone()
    }

    pub fn status(&self) -> RunStatus {
        relock(&self.inner).state.status
    }

    pub fn steps(&self) -> Vec<StepDefinition> {
        relock(&self.inner).steps.clone()
    }

    /// Every row of the run in its current form, ready for export
    pub fn rows(&self) -> Vec<Row> {
        relock(&self.inner).state.processed_rows.clone()
    }

    pub fn is_processing_complete(&self) -> bool {
        let inner = relock(&self.inner);
        inner.state.processing_complete(inner.steps.len())
    }

    /// Run-level analytics rollup
    pub fn summary(&self) -> RunSummary {
        let inner = relock(&self.inner);
        inner.state.analytics.summary(inner.state.eligible_count())
    }
}

fn duplicate_keys(rows: &[Row]) -> Vec<RowKey> {
    let mut counts: HashMap<&RowKey, usize> = HashMap::new();
    for row in rows {
        *counts.entry(row.key()).or_default() += 1;
    }
    let mut duplicates: Vec<RowKey> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(key, _)| key.clone())
        .collect();
    duplicates.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    duplicates
}

fn preview(keys: &[RowKey]) -> String {
    const SHOWN: usize = 3;
    let shown: Vec<&str> = keys.iter().take(SHOWN).map(RowKey::as_str).collect();
    if keys.len() > SHOWN {
        format!("{}, ...", shown.join(", "))
    } else {
        shown.join(", ")
    }
}
