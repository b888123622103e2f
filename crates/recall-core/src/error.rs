//! Error taxonomy for the recall domain layer.

use recall_state::{RankingError, StorageError};

use crate::embedding::EmbeddingError;

/// Errors produced by ingest, retrieval, and configuration.
///
/// Partial retrieval failures are not errors: they are reported as
/// [`crate::retrieval::PartialLookupFailure`] values on the bundle.
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    /// Embedding provider or backend failure that a later attempt may fix.
    #[error("transient provider failure: {0}")]
    TransientProvider(String),

    /// Retries exhausted; the memory is permanently excluded from retrieval.
    #[error("memory {memory_id} quarantined after {tries} failed embedding attempts")]
    Quarantined { memory_id: String, tries: u32 },

    /// The memory vanished or renders to nothing usable. Retrying cannot help.
    #[error("malformed memory {memory_id}: {reason}")]
    MalformedRecord { memory_id: String, reason: String },

    /// Invalid configuration detected at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RecallError {
    pub fn config(msg: impl Into<String>) -> Self {
        RecallError::Configuration(msg.into())
    }

    /// Whether the failure should count against a job's retry budget.
    pub fn is_retryable(&self) -> bool {
        match self {
            RecallError::TransientProvider(_) => true,
            RecallError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<RankingError> for RecallError {
    fn from(err: RankingError) -> Self {
        RecallError::Configuration(err.to_string())
    }
}

impl From<EmbeddingError> for RecallError {
    fn from(err: EmbeddingError) -> Self {
        RecallError::TransientProvider(err.to_string())
    }
}

/// Result type for recall-core operations.
pub type Result<T> = std::result::Result<T, RecallError>;
