//! Step executor - runs one batch of a step through its enrichment service

use crate::{
    core::{MetricsContext, Row, StepDefinition},
    enrichment::{EnrichmentError, EnrichmentService},
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Executes batches for a single step
pub struct StepExecutor {
    service: Arc<dyn EnrichmentService>,
}

impl StepExecutor {
    pub fn new(service: Arc<dyn EnrichmentService>) -> Self {
        Self { service }
    }

    /// Send one batch of eligible rows to the service and return what it produced
    pub async fn execute_batch(
        &self,
        step: &StepDefinition,
        batch: Vec<Row>,
        metrics: &mut MetricsContext,
    ) -> Result<Vec<Row>, EnrichmentError> {
        let sent = batch.len();
        debug!("Step {}: sending batch of {} rows to '{}'", step.id, sent, step.service_id());

        let result = self.service.process_batch(batch, &step.config, metrics).await;

        match result {
            Ok(rows) => {
                if rows.len() != sent {
                    warn!(
                        "Step {}: service returned {} rows for a batch of {}",
                        step.id,
                        rows.len(),
                        sent
                    );
                }
                Ok(rows)
            }
            Err(e) => {
                error!("Service error for step {}: {}", step.id, e);
                metrics.record_error();
                Err(e)
            }
        }
    }
}
