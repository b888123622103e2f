//! Storage trait definitions for expert recall
//!
//! These traits define the collaborator contracts the domain layer relies on:
//! - `MemoryStore`: Memory records and their embedding lifecycle
//! - `EmbeddingQueue`: Durable FIFO of "needs embedding" jobs
//! - `ExpertMemorySearch`: Blended similarity + recency vector search
//! - `TeamKnowledgeStore`: Structured per-team knowledge
//! - `MatchupStore`: Role-sensitive head-to-head history
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::ranking;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for a memory record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryId(pub String);

impl MemoryId {
    /// Generate a new random MemoryId
    pub fn new() -> Self {
        MemoryId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an embedding job
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        JobId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// MemoryRecord
// ---------------------------------------------------------------------------

/// Embedding lifecycle of a memory record.
///
/// `Pending → Ready` only when the combined embedding succeeded;
/// `Pending → Failed` after retries are exhausted. `Ready` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Pending,
    Ready,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for EmbeddingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named situational factor recorded with a prediction (e.g. weather).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualFactor {
    pub factor: String,
    pub value: String,
}

/// What the expert predicted. Missing fields are unknown, not zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionData {
    pub predicted_winner: Option<String>,
    pub home_win_prob: Option<f64>,
    pub away_win_prob: Option<f64>,
    pub confidence: Option<f64>,
}

/// What actually happened, filled once the game resolves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActualOutcome {
    pub winner: Option<String>,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
}

/// Per-facet embedding vectors. `combined` is mandatory once a record is ready.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacetEmbeddings {
    pub context: Option<Vec<f32>>,
    pub prediction: Option<Vec<f32>>,
    pub outcome: Option<Vec<f32>>,
    pub combined: Option<Vec<f32>>,
}

/// An expert's experience of one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub memory_id: MemoryId,
    pub expert_id: String,
    pub game_id: String,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    /// Ordered; factor names are unique within one record.
    pub contextual_factors: Vec<ContextualFactor>,
    pub prediction: Option<PredictionData>,
    pub outcome: Option<ActualOutcome>,
    pub lessons_learned: Vec<String>,
    pub embedding_status: EmbeddingStatus,
    #[serde(default)]
    pub embeddings: FacetEmbeddings,
    pub embedding_model: Option<String>,
    pub embedding_generated_at: Option<DateTime<Utc>>,
    /// When the experience happened; drives recency decay.
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// New pending record with no teams, factors, prediction, or outcome.
    pub fn new(expert_id: impl Into<String>, game_id: impl Into<String>) -> Self {
        Self {
            memory_id: MemoryId::new(),
            expert_id: expert_id.into(),
            game_id: game_id.into(),
            home_team: None,
            away_team: None,
            contextual_factors: Vec::new(),
            prediction: None,
            outcome: None,
            lessons_learned: Vec::new(),
            embedding_status: EmbeddingStatus::Pending,
            embeddings: FacetEmbeddings::default(),
            embedding_model: None,
            embedding_generated_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_teams(mut self, home: impl Into<String>, away: impl Into<String>) -> Self {
        self.home_team = Some(home.into());
        self.away_team = Some(away.into());
        self
    }

    /// Add a factor, replacing the value if the name is already present.
    pub fn with_factor(mut self, factor: impl Into<String>, value: impl Into<String>) -> Self {
        let factor = factor.into();
        let value = value.into();
        match self
            .contextual_factors
            .iter_mut()
            .find(|f| f.factor == factor)
        {
            Some(existing) => existing.value = value,
            None => self.contextual_factors.push(ContextualFactor { factor, value }),
        }
        self
    }

    pub fn with_prediction(mut self, prediction: PredictionData) -> Self {
        self.prediction = Some(prediction);
        self
    }

    pub fn with_outcome(mut self, outcome: ActualOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_lesson(mut self, lesson: impl Into<String>) -> Self {
        self.lessons_learned.push(lesson.into());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Age in fractional days relative to `now`; negative if in the future.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        ranking::age_days(self.created_at, now)
    }
}

/// Embeddings produced by one successful ingest pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingWrite {
    pub embeddings: FacetEmbeddings,
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

/// Ready / pending / failed counts for coverage reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageStats {
    pub total: u64,
    pub pending: u64,
    pub ready: u64,
    pub failed: u64,
}

impl CoverageStats {
    /// Fraction of records that are retrievable (0.0 when empty).
    pub fn ready_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.ready as f64 / self.total as f64
        }
    }

    pub(crate) fn count(&mut self, status: EmbeddingStatus, n: u64) {
        self.total += n;
        match status {
            EmbeddingStatus::Pending => self.pending += n,
            EmbeddingStatus::Ready => self.ready += n,
            EmbeddingStatus::Failed => self.failed += n,
        }
    }
}

/// Memory table operations.
///
/// Guarantees:
/// - `insert_memory` persists the record as `Pending` and enqueues exactly
///   one embedding job for it.
/// - `write_embeddings` and `mark_failed` are idempotent: applying the same
///   write twice leaves the record unchanged.
/// - `Ready` and `Failed` are never left for another status.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist a new record and enqueue its embedding job.
    async fn insert_memory(&self, record: MemoryRecord) -> StorageResult<MemoryId>;

    /// Load a record, or `None` if it no longer exists.
    async fn get_memory(&self, memory_id: &MemoryId) -> StorageResult<Option<MemoryRecord>>;

    /// Store all facet embeddings and mark the record `Ready`.
    ///
    /// Fails with `InvalidRecord` when the combined vector is absent and with
    /// `TerminalState` when the record was already quarantined.
    async fn write_embeddings(&self, memory_id: &MemoryId, write: EmbeddingWrite)
        -> StorageResult<()>;

    /// Quarantine a record. No-op if already `Failed`.
    async fn mark_failed(&self, memory_id: &MemoryId) -> StorageResult<()>;

    /// Remove a record. No-op if absent. Jobs referencing it are left for the
    /// worker to clean up.
    async fn delete_memory(&self, memory_id: &MemoryId) -> StorageResult<()>;

    /// Oldest-first records in the given status, capped at `limit`.
    async fn list_by_status(
        &self,
        status: EmbeddingStatus,
        limit: usize,
    ) -> StorageResult<Vec<MemoryRecord>>;

    /// Status counts, optionally restricted to one expert.
    async fn coverage(&self, expert_id: Option<&str>) -> StorageResult<CoverageStats>;
}

// ---------------------------------------------------------------------------
// EmbeddingQueue
// ---------------------------------------------------------------------------

/// A queue entry referencing one memory that still needs embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingJob {
    pub job_id: JobId,
    pub memory_id: MemoryId,
    /// Failed attempts so far; only ever increases.
    pub tries: u32,
    pub enqueued_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claim_expires_at: Option<DateTime<Utc>>,
}

impl EmbeddingJob {
    pub fn new(memory_id: MemoryId) -> Self {
        Self {
            job_id: JobId::new(),
            memory_id,
            tries: 0,
            enqueued_at: Utc::now(),
            claimed_by: None,
            claim_expires_at: None,
        }
    }

    /// Unclaimed, or the previous claim's lease has lapsed.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match (&self.claimed_by, self.claim_expires_at) {
            (None, _) => true,
            (Some(_), Some(expires)) => expires <= now,
            (Some(_), None) => false,
        }
    }
}

/// Durable FIFO of embedding jobs.
///
/// Guarantees:
/// - `claim_batch` returns jobs oldest `enqueued_at` first and never hands
///   the same job to two workers while a claim lease is live.
/// - `delete_job` treats an already-deleted job as success.
#[async_trait]
pub trait EmbeddingQueue: Send + Sync {
    /// Enqueue a job for a pending memory. Returns the existing job if one is
    /// already queued; rejects memories in a terminal status.
    async fn enqueue(&self, memory_id: &MemoryId) -> StorageResult<EmbeddingJob>;

    /// Atomically claim up to `limit` jobs for `worker_id` for `lease`.
    async fn claim_batch(
        &self,
        worker_id: &str,
        limit: usize,
        lease: Duration,
    ) -> StorageResult<Vec<EmbeddingJob>>;

    /// Increment `tries` and release the claim. `None` if the job is gone.
    async fn record_failure(&self, job_id: &JobId) -> StorageResult<Option<u32>>;

    /// Delete a job. No-op if absent.
    async fn delete_job(&self, job_id: &JobId) -> StorageResult<()>;

    /// Jobs currently queued for a memory (0 or 1 in practice).
    async fn jobs_for_memory(&self, memory_id: &MemoryId) -> StorageResult<Vec<EmbeddingJob>>;

    /// Number of queued jobs, claimed or not.
    async fn pending_count(&self) -> StorageResult<u64>;
}

// ---------------------------------------------------------------------------
// ExpertMemorySearch
// ---------------------------------------------------------------------------

/// Parameters of a blended vector search over one expert's memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub expert_id: String,
    pub query_embedding: Vec<f32>,
    /// Cosine similarity floor.
    pub match_threshold: f64,
    pub match_count: usize,
    /// Temporal-weight fraction blended into the ranking.
    pub alpha: f64,
    /// Half-life used for the recency component.
    pub half_life_days: f64,
    /// Reference time for ages.
    pub now: DateTime<Utc>,
}

/// A memory returned by search with its component scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: MemoryRecord,
    pub similarity_score: f64,
    pub recency_score: f64,
    pub blended_score: f64,
}

/// Vector search over ready memories.
///
/// Guarantees:
/// - Only records with `embedding_status = Ready` for `expert_id` are eligible.
/// - Results are ordered by blended score, highest first.
#[async_trait]
pub trait ExpertMemorySearch: Send + Sync {
    async fn search_expert_memories(&self, request: &SearchRequest)
        -> StorageResult<Vec<ScoredMemory>>;
}

// ---------------------------------------------------------------------------
// Team knowledge and matchups
// ---------------------------------------------------------------------------

/// A structured belief an expert holds about one team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub expert_id: String,
    pub team_id: String,
    pub knowledge_type: String,
    pub knowledge_summary: String,
    pub confidence_level: f64,
    pub updated_at: DateTime<Utc>,
}

/// Per-team knowledge, keyed by `(expert_id, team_id, knowledge_type)`.
#[async_trait]
pub trait TeamKnowledgeStore: Send + Sync {
    /// Entries for one team, highest confidence first, at most `limit`.
    async fn team_knowledge(
        &self,
        expert_id: &str,
        team_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<KnowledgeEntry>>;

    /// Insert or replace the entry with the same key.
    async fn upsert_knowledge(&self, entry: KnowledgeEntry) -> StorageResult<()>;
}

/// Head-to-head history as seen by one expert. Orientation matters:
/// `(team_a, team_b)` and `(team_b, team_a)` are distinct rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupMemory {
    pub expert_id: String,
    pub team_a_id: String,
    pub team_b_id: String,
    pub summary: String,
    pub games_analyzed: u32,
    pub expert_accuracy: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait MatchupStore: Send + Sync {
    /// Exact-orientation lookup; `None` on miss.
    async fn matchup(
        &self,
        expert_id: &str,
        team_a_id: &str,
        team_b_id: &str,
    ) -> StorageResult<Option<MatchupMemory>>;

    async fn upsert_matchup(&self, matchup: MatchupMemory) -> StorageResult<()>;
}
