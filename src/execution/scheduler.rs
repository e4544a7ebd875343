//! Batch scheduler - splits a step's eligible rows into batches and runs them in order

use crate::{
    core::{ConfigurationError, ExecutionError, MetricsContext, Row, RowKey, StepDefinition},
    execution::{CancelHandle, StepExecutor},
};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Smallest and largest batch sizes accepted
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 500;

/// Progress after one batch of a step
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    /// 1-based index of the batch that just finished
    pub batch: usize,
    pub total_batches: usize,
    /// Eligible rows handed to the service so far in this step
    pub processed: usize,
    pub eligible: usize,
    /// `processed / eligible * 100`, rounded
    pub percent: f64,
}

/// Outcome of running every batch of a step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepRun {
    pub eligible: usize,
    pub processed: usize,
    pub batches_run: usize,
    /// Returned rows that matched no original key
    pub dropped: usize,
    /// Stopped early because cancellation was requested
    pub cancelled: bool,
}

/// Result of merging one batch back into the row set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub replaced: usize,
    pub dropped: usize,
}

/// Scheduler for the batches of a step
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    batch_size: usize,
}

impl BatchScheduler {
    pub fn new(batch_size: usize) -> Result<Self, ConfigurationError> {
        if batch_size < MIN_BATCH_SIZE {
            return Err(ConfigurationError::InvalidBatchSize);
        }
        Ok(Self {
            batch_size: batch_size.min(MAX_BATCH_SIZE),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Positions of untagged rows, chunked into batches
    pub fn plan(&self, rows: &[Row]) -> Vec<Vec<usize>> {
        let eligible: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.is_eligible())
            .map(|(i, _)| i)
            .collect();

        eligible
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Run a step over the eligible rows, mutating `rows` in place.
    ///
    /// Tagged rows are never sent. After each batch the results are merged
    /// back by row key and `on_batch` is called with the progress and the
    /// updated rows. Cancellation is checked before each batch. If a batch
    /// fails, earlier batches stay applied and the error is returned.
    pub async fn run_step<F>(
        &self,
        step: &StepDefinition,
        rows: &mut [Row],
        executor: &StepExecutor,
        metrics: &mut MetricsContext,
        cancel: &CancelHandle,
        mut on_batch: F,
    ) -> Result<StepRun, ExecutionError>
    where
        F: FnMut(&BatchProgress, &[Row]),
    {
        let batches = self.plan(rows);
        let eligible: usize = batches.iter().map(Vec::len).sum();
        let total_batches = batches.len();

        info!(
            "Step {}: {} eligible rows in {} batches of up to {}",
            step.id, eligible, total_batches, self.batch_size
        );

        let mut run = StepRun {
            eligible,
            ..Default::default()
        };

        for (index, positions) in batches.iter().enumerate() {
            if cancel.is_requested() {
                info!("Step {}: cancellation observed before batch {}", step.id, index + 1);
                run.cancelled = true;
                return Ok(run);
            }

            let batch: Vec<Row> = positions.iter().map(|&i| rows[i].clone()).collect();
            let returned = executor
                .execute_batch(step, batch, metrics)
                .await
                .map_err(|source| ExecutionError::Batch {
                    step_id: step.id.clone(),
                    batch: index + 1,
                    source,
                })?;

            let merged = merge_batch(rows, positions, returned);
            if merged.dropped > 0 {
                warn!(
                    "Step {}: dropped {} returned rows with unknown keys in batch {}",
                    step.id,
                    merged.dropped,
                    index + 1
                );
            }

            run.processed += positions.len();
            run.batches_run += 1;
            run.dropped += merged.dropped;

            let progress = BatchProgress {
                batch: index + 1,
                total_batches,
                processed: run.processed,
                eligible,
                percent: (run.processed as f64 / eligible as f64 * 100.0).round(),
            };
            debug!(
                "Step {}: batch {}/{} done ({}%)",
                step.id, progress.batch, total_batches, progress.percent
            );
            on_batch(&progress, rows);
        }

        Ok(run)
    }
}

/// Merge returned rows into `rows` at `positions` by key.
///
/// Each returned row replaces the first not-yet-replaced original with the
/// same key. Returned rows with no matching original are dropped, and
/// originals the service did not return keep their pre-step values.
pub fn merge_batch(rows: &mut [Row], positions: &[usize], returned: Vec<Row>) -> MergeOutcome {
    let mut slots: HashMap<RowKey, VecDeque<usize>> = HashMap::new();
    for &position in positions {
        slots
            .entry(rows[position].key().clone())
            .or_default()
            .push_back(position);
    }

    let mut outcome = MergeOutcome::default();
    for row in returned {
        match slots.get_mut(row.key()).and_then(VecDeque::pop_front) {
            Some(position) => {
                rows[position] = row;
                outcome.replaced += 1;
            }
            None => outcome.dropped += 1,
        }
    }
    outcome
}
