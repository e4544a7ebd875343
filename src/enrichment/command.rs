//! Command-backed enrichment service - pipes a batch through an external program
//!
//! The program receives `{"config": {...}, "rows": [...]}` as JSON on stdin
//! and answers on stdout with either a JSON array of rows or
//! `{"rows": [...], "usage": {...}}`. Returned rows must keep their
//! `_rowKey` so they can be merged back.

use crate::core::{config::ServiceConfig, MetricsContext, Row};
use crate::enrichment::{EnrichmentError, EnrichmentService};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Configuration for a command service
#[derive(Debug, Clone)]
pub struct CommandServiceConfig {
    /// Executable to run
    pub command: String,

    /// Extra arguments
    pub args: Vec<String>,

    /// Deadline for one batch call in seconds
    pub timeout_secs: u64,
}

impl CommandServiceConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout_secs: 300,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

impl From<&ServiceConfig> for CommandServiceConfig {
    fn from(service: &ServiceConfig) -> Self {
        let config = Self::new(service.command.clone()).with_args(service.args.clone());
        match service.timeout_secs {
            Some(secs) => config.with_timeout(secs),
            None => config,
        }
    }
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    config: &'a Map<String, Value>,
    rows: &'a [Row],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchResponse {
    Rows(Vec<Row>),
    WithUsage {
        rows: Vec<Row>,
        #[serde(default)]
        usage: Usage,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Usage {
    api_calls: u64,
    tokens_used: u64,
    credits_used: u64,
    cache_hits: u64,
    errors: u64,
}

/// Enrichment service that runs an external command per batch
#[derive(Debug, Clone)]
pub struct CommandService {
    config: CommandServiceConfig,
}

impl CommandService {
    pub fn new(config: CommandServiceConfig) -> Self {
        Self { config }
    }

    #[cfg(test)]
    pub fn command(&self) -> &str {
        &self.config.command
    }

    async fn run(&self, input: Vec<u8>) -> Result<Vec<u8>, EnrichmentError> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EnrichmentError::Internal(format!(
                    "Failed to spawn '{}': {}",
                    self.config.command, e
                ))
            })?;

        // Stdin is fed from its own task while stdout drains below
        let command = self.config.command.clone();
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                match stdin.write_all(&input).await {
                    Ok(()) => Ok(()),
                    // The program exited without reading its input; its exit status decides
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                        debug!("{} closed stdin before reading the batch", command);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            })
        });

        let output = child.wait_with_output().await.map_err(|e| {
            EnrichmentError::Internal(format!(
                "Failed to wait for '{}': {}",
                self.config.command, e
            ))
        })?;

        if let Some(writer) = writer {
            writer
                .await
                .map_err(|e| EnrichmentError::Internal(format!("Batch writer failed: {}", e)))?
                .map_err(|e| {
                    EnrichmentError::Internal(format!(
                        "Failed to write batch to '{}': {}",
                        self.config.command, e
                    ))
                })?;
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(
                "{} exited with code {}: {}",
                self.config.command,
                exit_code,
                stderr.trim()
            );
            return Err(EnrichmentError::Api(format!(
                "{} exited with code {}: {}",
                self.config.command,
                exit_code,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl EnrichmentService for CommandService {
    async fn process_batch(
        &self,
        rows: Vec<Row>,
        config: &Map<String, Value>,
        metrics: &mut MetricsContext,
    ) -> Result<Vec<Row>, EnrichmentError> {
        let input = serde_json::to_vec(&BatchRequest {
            config,
            rows: &rows,
        })
        .map_err(|e| EnrichmentError::Internal(format!("Failed to encode batch: {}", e)))?;

        debug!(
            "Running {} with a batch of {} rows",
            self.config.command,
            rows.len()
        );

        let stdout = timeout(Duration::from_secs(self.config.timeout_secs), self.run(input))
            .await
            .map_err(|_| EnrichmentError::Timeout(self.config.timeout_secs))??;

        metrics.record_api_call();

        let response: BatchResponse = serde_json::from_slice(&stdout)
            .map_err(|e| EnrichmentError::InvalidResponse(e.to_string()))?;

        let rows = match response {
            BatchResponse::Rows(rows) => rows,
            BatchResponse::WithUsage { rows, usage } => {
                metrics.api_calls += usage.api_calls;
                metrics.tokens_used += usage.tokens_used;
                metrics.credits_used += usage.credits_used;
                metrics.cache_hits += usage.cache_hits;
                metrics.errors += usage.errors;
                rows
            }
        };

        debug!("{} returned {} rows", self.config.command, rows.len());
        Ok(rows)
    }
}
