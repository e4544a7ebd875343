//! SQLite-based key-value storage

use crate::core::PersistenceError;
use crate::persistence::Storage;
use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{Row, SqlitePool};

/// SQLite key-value store
pub struct SqliteStorage {
    pool: SqlitePool,
}

fn backend(e: sqlx::Error) -> PersistenceError {
    PersistenceError::Backend(e.to_string())
}

impl SqliteStorage {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        let url = if db_path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", db_path)
        };
        let pool = SqlitePool::connect(&url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("leadflow");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("state.db");
        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for SqliteStorage {
    async fn save(&self, key: &str, value: &Value) -> Result<(), PersistenceError> {
        let encoded = serde_json::to_string(value).map_err(PersistenceError::Encode)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            "#,
        )
        .bind(key)
        .bind(encoded)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => {
                let raw: String = row.get("value");
                serde_json::from_str(&raw)
                    .map(Some)
                    .map_err(PersistenceError::Decode)
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, PersistenceError> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }
}
