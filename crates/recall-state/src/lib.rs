//! Recall-State: storage layer for expert episodic memory
//!
//! This crate owns everything that touches persisted memories: the storage
//! contracts the domain layer depends on, in-memory fakes for tests, the
//! SurrealDB backend, and the ranking math both share.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: embedding lifecycle integrity, queue ordering, and blended search.
//!
//! ## Key Components
//!
//! - `MemoryStore` / `EmbeddingQueue`: Memory records and their embedding jobs
//! - `ExpertMemorySearch`: Similarity + recency search over ready memories
//! - `TeamKnowledgeStore` / `MatchupStore`: Structured per-team and head-to-head knowledge
//! - `SurrealMemoryStore`: SurrealDB implementation of all of the above

pub mod connect;
mod error;
pub mod fakes;
mod migrations;
pub mod ranking;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use connect::{CloudConfig, StoreConfig};
pub use error::{StateError, StorageError};
pub use ranking::RankingError;
pub use storage_traits::{
    ActualOutcome, ContextualFactor, CoverageStats, EmbeddingJob, EmbeddingQueue,
    EmbeddingStatus, EmbeddingWrite, ExpertMemorySearch, FacetEmbeddings, JobId, KnowledgeEntry,
    MatchupMemory, MatchupStore, MemoryId, MemoryRecord, MemoryStore, PredictionData,
    ScoredMemory, SearchRequest, StorageResult, TeamKnowledgeStore,
};
pub use surreal_store::SurrealMemoryStore;

/// Result type for recall-state setup operations
pub type Result<T> = std::result::Result<T, StateError>;
