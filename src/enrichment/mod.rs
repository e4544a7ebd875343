//! Enrichment services - the external collaborators each step calls

pub mod command;
pub mod error;

use crate::core::{config::ServiceConfig, MetricsContext, Row};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub use command::{CommandService, CommandServiceConfig};
pub use error::EnrichmentError;

/// Trait for enrichment services - allows for different implementations
///
/// A service receives the eligible rows of one batch and must return one
/// row per input, carrying the same key, with its new fields added. Usage
/// (API calls, tokens, credits, cache hits) is reported through `metrics`.
#[async_trait]
pub trait EnrichmentService: Send + Sync {
    async fn process_batch(
        &self,
        rows: Vec<Row>,
        config: &Map<String, Value>,
        metrics: &mut MetricsContext,
    ) -> Result<Vec<Row>, EnrichmentError>;
}

/// Services available to a run, keyed by service id
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn EnrichmentService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under an id, replacing any previous one
    pub fn register<S>(&mut self, id: impl Into<String>, service: S)
    where
        S: EnrichmentService + 'static,
    {
        self.services.insert(id.into(), Arc::new(service));
    }

    /// Command services for every entry of a pipeline file's `services` table
    pub fn from_services(services: &BTreeMap<String, ServiceConfig>) -> Self {
        let mut registry = Self::new();
        for (id, service) in services {
            registry.register(id.clone(), CommandService::new(service.into()));
        }
        registry
    }

    pub fn with<S>(mut self, id: impl Into<String>, service: S) -> Self
    where
        S: EnrichmentService + 'static,
    {
        self.register(id, service);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn EnrichmentService>> {
        self.services.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.services.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.ids())
            .finish()
    }
}
