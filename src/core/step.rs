//! Step domain model

use crate::core::filter::FilterSpec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single enrichment step in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Service that processes this step (defaults to `id`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Service-specific options (prompt text, lookup options, ...)
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Rules applied to the step's output rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterSpec>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            service: None,
            config: Map::new(),
            filter: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_filter(mut self, filter: FilterSpec) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Identifier of the service that runs this step
    pub fn service_id(&self) -> &str {
        self.service.as_deref().unwrap_or(&self.id)
    }

    /// Name for display, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}
