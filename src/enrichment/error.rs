//! Enrichment service error types

use thiserror::Error;

/// Error types for enrichment calls
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Invalid service response: {0}")]
    InvalidResponse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
