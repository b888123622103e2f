//! SurrealDB-backed implementation of every recall storage trait
//!
//! One handle serves memories, the embedding job queue, vector search, team
//! knowledge, and matchups. Rows are converted to and from the
//! `storage_traits` types at the boundary via `schema`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::connect::{self, StoreConfig};
use crate::error::StorageError;
use crate::ranking;
use crate::schema::{JobRow, KnowledgeRow, MatchupRow, MemoryRow, StatusCountRow};
use crate::storage_traits::*;

#[derive(Debug, Deserialize)]
struct CountRow {
    n: u64,
}

/// SurrealDB implementation of [`MemoryStore`], [`EmbeddingQueue`],
/// [`ExpertMemorySearch`], [`TeamKnowledgeStore`], and [`MatchupStore`].
#[derive(Clone)]
pub struct SurrealMemoryStore {
    db: Surreal<Any>,
}

impl SurrealMemoryStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect(&StoreConfig::InMemory).await
    }

    /// Connect with an explicit configuration and run migrations.
    pub async fn connect(config: &StoreConfig) -> crate::Result<Self> {
        let db = connect::connect(config).await?;
        info!("SurrealMemoryStore connected");
        Ok(Self { db })
    }

    /// Connect using the `SURREALDB_*` environment chain.
    pub async fn from_env() -> crate::Result<Self> {
        Self::connect(&StoreConfig::from_env()).await
    }

    async fn fetch_memory(&self, memory_id: &MemoryId) -> StorageResult<Option<MemoryRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM memories WHERE memory_id = $mid LIMIT 1")
            .bind(("mid", memory_id.0.clone()))
            .await?;
        let rows: Vec<MemoryRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }

    async fn require_memory(&self, memory_id: &MemoryId) -> StorageResult<MemoryRow> {
        self.fetch_memory(memory_id)
            .await?
            .ok_or_else(|| StorageError::MemoryNotFound {
                memory_id: memory_id.0.clone(),
            })
    }
}

fn chrono_lease(lease: Duration) -> StorageResult<chrono::Duration> {
    chrono::Duration::from_std(lease)
        .map_err(|e| StorageError::InvalidRequest(format!("lease out of range: {e}")))
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[async_trait]
impl MemoryStore for SurrealMemoryStore {
    async fn insert_memory(&self, mut record: MemoryRecord) -> StorageResult<MemoryId> {
        record.embedding_status = EmbeddingStatus::Pending;
        let memory_id = record.memory_id.clone();

        if self.fetch_memory(&memory_id).await?.is_some() {
            return Err(StorageError::InvalidRecord(format!(
                "memory {memory_id} already exists"
            )));
        }

        let job = EmbeddingJob::new(memory_id.clone());
        debug!(memory_id = %memory_id, job_id = %job.job_id, "inserting memory");

        let created = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 CREATE memories CONTENT $memory; \
                 CREATE embedding_jobs CONTENT $job; \
                 COMMIT TRANSACTION;",
            )
            .bind(("memory", MemoryRow::from(record)))
            .bind(("job", JobRow::from(job)))
            .await
            .and_then(|res| res.check());

        let Err(e) = created else {
            return Ok(memory_id);
        };
        // A concurrent insert of the same id won the unique index.
        if self.fetch_memory(&memory_id).await?.is_some() {
            debug!(memory_id = %memory_id, error = %e, "duplicate insert rejected");
            return Err(StorageError::InvalidRecord(format!(
                "memory {memory_id} already exists"
            )));
        }
        Err(e.into())
    }

    async fn get_memory(&self, memory_id: &MemoryId) -> StorageResult<Option<MemoryRecord>> {
        Ok(self.fetch_memory(memory_id).await?.map(MemoryRecord::from))
    }

    async fn write_embeddings(
        &self,
        memory_id: &MemoryId,
        write: EmbeddingWrite,
    ) -> StorageResult<()> {
        if write.embeddings.combined.is_none() {
            return Err(StorageError::InvalidRecord(
                "combined embedding is required for ready status".into(),
            ));
        }
        let row = self.require_memory(memory_id).await?;
        if row.embedding_status == EmbeddingStatus::Failed {
            return Err(StorageError::TerminalState {
                memory_id: memory_id.0.clone(),
                status: row.embedding_status.to_string(),
                action: "write embeddings".into(),
            });
        }

        let mut res = self
            .db
            .query(
                "UPDATE memories SET \
                 embeddings = $embeddings, \
                 embedding_model = $model, \
                 embedding_generated_at = $at, \
                 embedding_status = 'ready' \
                 WHERE memory_id = $mid AND embedding_status != 'failed'",
            )
            .bind(("embeddings", write.embeddings))
            .bind(("model", write.model))
            .bind(("at", SurrealDatetime::from(write.generated_at)))
            .bind(("mid", memory_id.0.clone()))
            .await?;
        let updated: Vec<MemoryRow> = res.take(0)?;

        // Lost a race with a concurrent quarantine.
        if updated.is_empty() {
            return Err(StorageError::TerminalState {
                memory_id: memory_id.0.clone(),
                status: EmbeddingStatus::Failed.to_string(),
                action: "write embeddings".into(),
            });
        }
        Ok(())
    }

    async fn mark_failed(&self, memory_id: &MemoryId) -> StorageResult<()> {
        let row = self.require_memory(memory_id).await?;
        match row.embedding_status {
            EmbeddingStatus::Failed => Ok(()),
            EmbeddingStatus::Ready => Err(StorageError::TerminalState {
                memory_id: memory_id.0.clone(),
                status: row.embedding_status.to_string(),
                action: "mark failed".into(),
            }),
            EmbeddingStatus::Pending => {
                self.db
                    .query(
                        "UPDATE memories SET embedding_status = 'failed' \
                         WHERE memory_id = $mid AND embedding_status = 'pending'",
                    )
                    .bind(("mid", memory_id.0.clone()))
                    .await?
                    .check()?;
                Ok(())
            }
        }
    }

    async fn delete_memory(&self, memory_id: &MemoryId) -> StorageResult<()> {
        self.db
            .query("DELETE memories WHERE memory_id = $mid")
            .bind(("mid", memory_id.0.clone()))
            .await?
            .check()?;
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: EmbeddingStatus,
        limit: usize,
    ) -> StorageResult<Vec<MemoryRecord>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM memories WHERE embedding_status = $status \
                 ORDER BY created_at ASC LIMIT $limit",
            )
            .bind(("status", status.as_str()))
            .bind(("limit", limit as i64))
            .await?;
        let rows: Vec<MemoryRow> = res.take(0)?;
        Ok(rows.into_iter().map(MemoryRecord::from).collect())
    }

    async fn coverage(&self, expert_id: Option<&str>) -> StorageResult<CoverageStats> {
        let mut res = match expert_id {
            Some(expert) => {
                self.db
                    .query(
                        "SELECT embedding_status, count() AS n FROM memories \
                         WHERE expert_id = $expert GROUP BY embedding_status",
                    )
                    .bind(("expert", expert.to_string()))
                    .await?
            }
            None => {
                self.db
                    .query(
                        "SELECT embedding_status, count() AS n FROM memories \
                         GROUP BY embedding_status",
                    )
                    .await?
            }
        };
        let rows: Vec<StatusCountRow> = res.take(0)?;

        let mut stats = CoverageStats::default();
        for row in rows {
            stats.count(row.embedding_status, row.n);
        }
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// EmbeddingQueue
// ---------------------------------------------------------------------------

#[async_trait]
impl EmbeddingQueue for SurrealMemoryStore {
    async fn enqueue(&self, memory_id: &MemoryId) -> StorageResult<EmbeddingJob> {
        let row = self.require_memory(memory_id).await?;
        if row.embedding_status.is_terminal() {
            return Err(StorageError::TerminalState {
                memory_id: memory_id.0.clone(),
                status: row.embedding_status.to_string(),
                action: "enqueue".into(),
            });
        }
        if let Some(existing) = self.jobs_for_memory(memory_id).await?.into_iter().next() {
            return Ok(existing);
        }

        let job = EmbeddingJob::new(memory_id.clone());
        let _created: Option<JobRow> = self
            .db
            .create("embedding_jobs")
            .content(JobRow::from(job.clone()))
            .await?;
        Ok(job)
    }

    async fn claim_batch(
        &self,
        worker_id: &str,
        limit: usize,
        lease: Duration,
    ) -> StorageResult<Vec<EmbeddingJob>> {
        let now = Utc::now();
        let expires = now + chrono_lease(lease)?;

        let mut res = self
            .db
            .query(
                "SELECT * FROM embedding_jobs \
                 WHERE claimed_by = NONE OR claim_expires_at <= $now \
                 ORDER BY enqueued_at ASC, job_id ASC LIMIT $limit",
            )
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("limit", limit as i64))
            .await?;
        let candidates: Vec<JobRow> = res.take(0)?;

        // Each claim is a conditional update so a concurrent worker that got
        // there first makes ours match zero rows.
        let mut claimed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let mut res = self
                .db
                .query(
                    "UPDATE embedding_jobs SET claimed_by = $worker, claim_expires_at = $expires \
                     WHERE job_id = $jid AND (claimed_by = NONE OR claim_expires_at <= $now)",
                )
                .bind(("worker", worker_id.to_string()))
                .bind(("expires", SurrealDatetime::from(expires)))
                .bind(("jid", candidate.job_id.clone()))
                .bind(("now", SurrealDatetime::from(now)))
                .await?;
            let updated: Vec<JobRow> = res.take(0)?;
            if let Some(row) = updated.into_iter().next() {
                claimed.push(EmbeddingJob::from(row));
            }
        }

        debug!(worker_id, claimed = claimed.len(), "claimed embedding jobs");
        Ok(claimed)
    }

    async fn record_failure(&self, job_id: &JobId) -> StorageResult<Option<u32>> {
        let mut res = self
            .db
            .query(
                "UPDATE embedding_jobs SET tries += 1, claimed_by = NONE, claim_expires_at = NONE \
                 WHERE job_id = $jid",
            )
            .bind(("jid", job_id.0.clone()))
            .await?;
        let updated: Vec<JobRow> = res.take(0)?;
        Ok(updated.into_iter().next().map(|row| row.tries))
    }

    async fn delete_job(&self, job_id: &JobId) -> StorageResult<()> {
        self.db
            .query("DELETE embedding_jobs WHERE job_id = $jid")
            .bind(("jid", job_id.0.clone()))
            .await?
            .check()?;
        Ok(())
    }

    async fn jobs_for_memory(&self, memory_id: &MemoryId) -> StorageResult<Vec<EmbeddingJob>> {
        let mut res = self
            .db
            .query("SELECT * FROM embedding_jobs WHERE memory_id = $mid ORDER BY enqueued_at ASC")
            .bind(("mid", memory_id.0.clone()))
            .await?;
        let rows: Vec<JobRow> = res.take(0)?;
        Ok(rows.into_iter().map(EmbeddingJob::from).collect())
    }

    async fn pending_count(&self) -> StorageResult<u64> {
        let mut res = self
            .db
            .query("SELECT count() AS n FROM embedding_jobs GROUP ALL")
            .await?;
        let rows: Vec<CountRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.n).unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// ExpertMemorySearch
// ---------------------------------------------------------------------------

#[async_trait]
impl ExpertMemorySearch for SurrealMemoryStore {
    async fn search_expert_memories(
        &self,
        request: &SearchRequest,
    ) -> StorageResult<Vec<ScoredMemory>> {
        let rows = self.fetch_candidates(request).await?;
        debug!(
            expert_id = %request.expert_id,
            candidates = rows.len(),
            "scoring ready memories"
        );
        ranking::rank_candidates(request, rows.into_iter().map(MemoryRecord::from))
    }
}

/// Rows fetched per requested match. Recency can lift a less similar row
/// above a more similar one, so the store returns more than `match_count`
/// and the final order is decided by `ranking::rank_candidates`.
const SEARCH_OVERFETCH: usize = 8;

impl SurrealMemoryStore {
    /// Ready rows at or above the similarity threshold, most similar first,
    /// carrying only the combined vector.
    async fn fetch_candidates(&self, request: &SearchRequest) -> StorageResult<Vec<MemoryRow>> {
        if request.query_embedding.is_empty() || request.match_count == 0 {
            return Ok(Vec::new());
        }
        let limit = request.match_count.saturating_mul(SEARCH_OVERFETCH);
        let mut res = self
            .db
            .query(
                "SELECT *, vector::similarity::cosine(embeddings.combined, $query) AS similarity \
                 OMIT embeddings.context, embeddings.prediction, embeddings.outcome \
                 FROM memories \
                 WHERE expert_id = $expert AND embedding_status = 'ready' \
                     AND array::len(embeddings.combined ?? []) = $dim \
                     AND vector::similarity::cosine(embeddings.combined, $query) >= $threshold \
                 ORDER BY similarity DESC LIMIT $limit",
            )
            .bind(("expert", request.expert_id.clone()))
            .bind(("query", request.query_embedding.clone()))
            .bind(("dim", request.query_embedding.len() as i64))
            .bind(("threshold", request.match_threshold))
            .bind(("limit", limit as i64))
            .await?;
        Ok(res.take(0)?)
    }
}

// ---------------------------------------------------------------------------
// Team knowledge and matchups
// ---------------------------------------------------------------------------

#[async_trait]
impl TeamKnowledgeStore for SurrealMemoryStore {
    async fn team_knowledge(
        &self,
        expert_id: &str,
        team_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<KnowledgeEntry>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM team_knowledge WHERE expert_id = $expert AND team_id = $team \
                 ORDER BY confidence_level DESC, knowledge_type ASC LIMIT $limit",
            )
            .bind(("expert", expert_id.to_string()))
            .bind(("team", team_id.to_string()))
            .bind(("limit", limit as i64))
            .await?;
        let rows: Vec<KnowledgeRow> = res.take(0)?;
        Ok(rows.into_iter().map(KnowledgeEntry::from).collect())
    }

    async fn upsert_knowledge(&self, entry: KnowledgeEntry) -> StorageResult<()> {
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE team_knowledge WHERE expert_id = $expert AND team_id = $team \
                     AND knowledge_type = $kind; \
                 CREATE team_knowledge CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("expert", entry.expert_id.clone()))
            .bind(("team", entry.team_id.clone()))
            .bind(("kind", entry.knowledge_type.clone()))
            .bind(("row", KnowledgeRow::from(entry)))
            .await?
            .check()?;
        Ok(())
    }
}

#[async_trait]
impl MatchupStore for SurrealMemoryStore {
    async fn matchup(
        &self,
        expert_id: &str,
        team_a_id: &str,
        team_b_id: &str,
    ) -> StorageResult<Option<MatchupMemory>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM matchup_memories WHERE expert_id = $expert \
                 AND team_a_id = $a AND team_b_id = $b LIMIT 1",
            )
            .bind(("expert", expert_id.to_string()))
            .bind(("a", team_a_id.to_string()))
            .bind(("b", team_b_id.to_string()))
            .await?;
        let rows: Vec<MatchupRow> = res.take(0)?;
        Ok(rows.into_iter().next().map(MatchupMemory::from))
    }

    async fn upsert_matchup(&self, matchup: MatchupMemory) -> StorageResult<()> {
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE matchup_memories WHERE expert_id = $expert \
                     AND team_a_id = $a AND team_b_id = $b; \
                 CREATE matchup_memories CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("expert", matchup.expert_id.clone()))
            .bind(("a", matchup.team_a_id.clone()))
            .bind(("b", matchup.team_b_id.clone()))
            .bind(("row", MatchupRow::from(matchup)))
            .await?
            .check()?;
        Ok(())
    }
}
