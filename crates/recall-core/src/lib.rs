//! Recall Core Library
//!
//! Turns prediction/outcome records into searchable facet embeddings and
//! retrieves time-aware context bundles for an expert's next forecast.

pub mod config;
pub mod embedding;
pub mod error;
pub mod facets;
pub mod ingest;
pub mod obs;
pub mod profile;
pub mod prompt;
pub mod retrieval;
pub mod telemetry;
pub mod temporal;

pub use config::{EmbeddingConfig, RetrievalConfig, WorkerConfig};
pub use embedding::{EmbeddingError, EmbeddingProvider, OpenAiEmbeddings};
pub use error::{RecallError, Result};
pub use facets::{FacetTextRenderer, FacetTexts};
pub use ingest::{backoff_delay, IngestWorker, JobOutcome, MemoryRecorder, PassReport};
pub use profile::{ExpertTemporalProfile, ProfileRegistry};
pub use prompt::PromptFormatter;
pub use retrieval::{
    lookup_matchup, DegradeReason, LookupSection, MatchupOrientation, OrientedMatchup,
    PartialLookupFailure, RetrievalBundle, RetrievalOrchestrator, RetrievalQuery,
};
pub use telemetry::init_tracing;
pub use temporal::{adjusted_half_life, blended_score, decay, rerank, SeasonContext};

pub use recall_state::{
    EmbeddingStatus, KnowledgeEntry, MatchupMemory, MemoryId, MemoryRecord, ScoredMemory,
};
