//! Pipeline configuration from YAML

use crate::core::{error::ConfigurationError, step::StepDefinition};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Default number of rows sent to a service per call
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Default pause between steps, in milliseconds
pub const DEFAULT_STEP_DELAY_MS: u64 = 100;

/// Default storage key for persisted run state
pub const DEFAULT_STORAGE_KEY: &str = "leadflow.run";

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Run options
    #[serde(default)]
    pub options: RunOptions,

    /// External command services, keyed by service id
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,

    /// Ordered pipeline steps
    pub steps: Vec<StepDefinition>,
}

/// Options that shape how a run is scheduled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Rows per enrichment call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between steps so a host UI stays responsive
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,

    /// Key the run state is persisted under
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            step_delay_ms: DEFAULT_STEP_DELAY_MS,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_step_delay_ms() -> u64 {
    DEFAULT_STEP_DELAY_MS
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

/// An enrichment service backed by an external command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Executable to run
    pub command: String,

    /// Extra arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Deadline for one batch call
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        validate_steps(&self.steps)?;

        if self.options.batch_size == 0 {
            return Err(ConfigurationError::InvalidBatchSize.into());
        }

        for step in &self.steps {
            let service = step.service_id();
            if !self.services.contains_key(service) {
                anyhow::bail!(ConfigurationError::UnknownService {
                    step_id: step.id.clone(),
                    service: service.to_string(),
                });
            }
        }

        for (id, service) in &self.services {
            if service.command.trim().is_empty() {
                anyhow::bail!("Service '{}' has an empty command", id);
            }
        }

        Ok(())
    }
}

/// Structural checks shared by config loading and run initialization
pub fn validate_steps(steps: &[StepDefinition]) -> Result<(), ConfigurationError> {
    if steps.is_empty() {
        return Err(ConfigurationError::NoSteps);
    }

    let mut seen_ids = HashSet::new();
    for (position, step) in steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            return Err(ConfigurationError::MissingStepId(position));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(ConfigurationError::DuplicateStepId(step.id.clone()));
        }
        if let Some(filter) = &step.filter {
            for rule in &filter.rules {
                rule.validate().map_err(|reason| ConfigurationError::InvalidRule {
                    step_id: step.id.clone(),
                    field: rule.field.clone(),
                    reason,
                })?;
            }
        }
    }

    Ok(())
}
