//! Persistence layer for run state

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteStorage;

use crate::core::{PersistenceError, RunState, StepDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Key-value storage backend. Values are JSON.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Store a value under a key, replacing any previous value
    async fn save(&self, key: &str, value: &Value) -> Result<(), PersistenceError>;

    /// Load the value stored under a key
    async fn load(&self, key: &str) -> Result<Option<Value>, PersistenceError>;

    /// Remove a key. Returns whether it existed.
    async fn remove(&self, key: &str) -> Result<bool, PersistenceError>;
}

/// In-memory storage (for testing or ephemeral use)
pub struct InMemoryStorage {
    values: tokio::sync::RwLock<HashMap<String, Value>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            values: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Storage for InMemoryStorage {
    async fn save(&self, key: &str, value: &Value) -> Result<(), PersistenceError> {
        self.values.write().await.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<bool, PersistenceError> {
        Ok(self.values.write().await.remove(key).is_some())
    }
}

/// What gets written for a run: the step list plus its state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRun {
    pub steps: Vec<StepDefinition>,
    pub state: RunState,
    pub saved_at: DateTime<Utc>,
}

/// Saves and restores run state through a [`Storage`] backend.
///
/// Failures are logged and reported as `false`/`None`; a run keeps going
/// when its state cannot be written.
#[derive(Clone)]
pub struct StatePersistence {
    storage: Arc<dyn Storage>,
    key: String,
}

impl StatePersistence {
    pub fn new(storage: Arc<dyn Storage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Write the run. Returns whether it was stored.
    pub async fn save(&self, steps: &[StepDefinition], state: &RunState) -> bool {
        match self.try_save(steps, state).await {
            Ok(()) => {
                debug!("Persisted run {} under '{}'", state.run_id, self.key);
                true
            }
            Err(e) => {
                warn!("Failed to persist run {}: {}", state.run_id, e);
                false
            }
        }
    }

    async fn try_save(
        &self,
        steps: &[StepDefinition],
        state: &RunState,
    ) -> Result<(), PersistenceError> {
        let run = PersistedRun {
            steps: steps.to_vec(),
            state: state.clone(),
            saved_at: Utc::now(),
        };
        let value = serde_json::to_value(&run).map_err(PersistenceError::Encode)?;
        self.storage.save(&self.key, &value).await
    }

    /// Read the stored run, if there is a readable one
    pub async fn load(&self) -> Option<PersistedRun> {
        match self.try_load().await {
            Ok(run) => run,
            Err(e) => {
                warn!("Failed to load persisted run from '{}': {}", self.key, e);
                None
            }
        }
    }

    async fn try_load(&self) -> Result<Option<PersistedRun>, PersistenceError> {
        match self.storage.load(&self.key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(PersistenceError::Decode),
            None => Ok(None),
        }
    }

    /// Drop the stored run. Returns whether anything was removed.
    pub async fn clear(&self) -> bool {
        match self.storage.remove(&self.key).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Failed to clear persisted run '{}': {}", self.key, e);
                false
            }
        }
    }
}
