//! Error types for recall-state

use thiserror::Error;

use crate::ranking::RankingError;

/// Errors that can occur while connecting to or preparing the backing database
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by the storage trait operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Memory record does not exist
    #[error("memory not found: {memory_id}")]
    MemoryNotFound { memory_id: String },

    /// Embedding job does not exist
    #[error("embedding job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// Write rejected because the record is in a terminal state
    #[error("memory {memory_id} is {status}, cannot {action}")]
    TerminalState {
        memory_id: String,
        status: String,
        action: String,
    },

    /// Record content violates a storage invariant
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Search or lookup request is malformed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Backend I/O failure (network, query, transaction)
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Backend(_))
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<RankingError> for StorageError {
    fn from(err: RankingError) -> Self {
        StorageError::InvalidRequest(err.to_string())
    }
}
