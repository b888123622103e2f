//! In-memory fakes for storage traits (testing only)
//!
//! Provides `InMemoryMemoryStore` (memories, job queue, and vector search
//! behind one lock so insert-and-enqueue is atomic) and
//! `InMemoryKnowledgeStore` (team knowledge and matchups). Both satisfy the
//! trait contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::ranking;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// InMemoryMemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    memories: HashMap<MemoryId, MemoryRecord>,
    jobs: HashMap<JobId, EmbeddingJob>,
}

/// In-memory memory table + job queue + vector search.
#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every job currently queued (test inspection).
    pub fn jobs(&self) -> Vec<EmbeddingJob> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<EmbeddingJob> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        jobs
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn insert_memory(&self, mut record: MemoryRecord) -> StorageResult<MemoryId> {
        record.embedding_status = EmbeddingStatus::Pending;
        let memory_id = record.memory_id.clone();
        let job = EmbeddingJob::new(memory_id.clone());

        let mut state = self.state.lock().unwrap();
        if state.memories.contains_key(&memory_id) {
            return Err(StorageError::InvalidRecord(format!(
                "memory {memory_id} already exists"
            )));
        }
        state.memories.insert(memory_id.clone(), record);
        state.jobs.insert(job.job_id.clone(), job);
        Ok(memory_id)
    }

    async fn get_memory(&self, memory_id: &MemoryId) -> StorageResult<Option<MemoryRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.memories.get(memory_id).cloned())
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
        let mut state = self.state.lock().unwrap();
        let record = state
            .memories
            .get_mut(memory_id)
            .ok_or_else(|| StorageError::MemoryNotFound {
                memory_id: memory_id.0.clone(),
            })?;
        if record.embedding_status == EmbeddingStatus::Failed {
            return Err(StorageError::TerminalState {
                memory_id: memory_id.0.clone(),
                status: record.embedding_status.to_string(),
                action: "write embeddings".into(),
            });
        }
        record.embeddings = write.embeddings;
        record.embedding_model = Some(write.model);
        record.embedding_generated_at = Some(write.generated_at);
        record.embedding_status = EmbeddingStatus::Ready;
        Ok(())
    }

    async fn mark_failed(&self, memory_id: &MemoryId) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .memories
            .get_mut(memory_id)
            .ok_or_else(|| StorageError::MemoryNotFound {
                memory_id: memory_id.0.clone(),
            })?;
        match record.embedding_status {
            EmbeddingStatus::Failed => Ok(()),
            EmbeddingStatus::Ready => Err(StorageError::TerminalState {
                memory_id: memory_id.0.clone(),
                status: record.embedding_status.to_string(),
                action: "mark failed".into(),
            }),
            EmbeddingStatus::Pending => {
                record.embedding_status = EmbeddingStatus::Failed;
                Ok(())
            }
        }
    }

    async fn delete_memory(&self, memory_id: &MemoryId) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.memories.remove(memory_id);
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: EmbeddingStatus,
        limit: usize,
    ) -> StorageResult<Vec<MemoryRecord>> {
        let state = self.state.lock().unwrap();
        let mut records: Vec<MemoryRecord> = state
            .memories
            .values()
            .filter(|r| r.embedding_status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn coverage(&self, expert_id: Option<&str>) -> StorageResult<CoverageStats> {
        let state = self.state.lock().unwrap();
        let mut stats = CoverageStats::default();
        for record in state.memories.values() {
            if expert_id.map(|e| record.expert_id == e).unwrap_or(true) {
                stats.count(record.embedding_status, 1);
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl EmbeddingQueue for InMemoryMemoryStore {
    async fn enqueue(&self, memory_id: &MemoryId) -> StorageResult<EmbeddingJob> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .memories
            .get(memory_id)
            .ok_or_else(|| StorageError::MemoryNotFound {
                memory_id: memory_id.0.clone(),
            })?;
        if record.embedding_status.is_terminal() {
            return Err(StorageError::TerminalState {
                memory_id: memory_id.0.clone(),
                status: record.embedding_status.to_string(),
                action: "enqueue".into(),
            });
        }
        if let Some(existing) = state.jobs.values().find(|j| &j.memory_id == memory_id) {
            return Ok(existing.clone());
        }
        let job = EmbeddingJob::new(memory_id.clone());
        state.jobs.insert(job.job_id.clone(), job.clone());
        Ok(job)
    }

    async fn claim_batch(
        &self,
        worker_id: &str,
        limit: usize,
        lease: Duration,
    ) -> StorageResult<Vec<EmbeddingJob>> {
        let now = Utc::now();
        let expires = now
            + chrono::Duration::from_std(lease)
                .map_err(|e| StorageError::InvalidRequest(format!("lease out of range: {e}")))?;

        let mut state = self.state.lock().unwrap();
        let mut candidates: Vec<(chrono::DateTime<Utc>, JobId)> = state
            .jobs
            .values()
            .filter(|j| j.is_claimable(now))
            .map(|j| (j.enqueued_at, j.job_id.clone()))
            .collect();
        candidates.sort();
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, job_id) in candidates {
            if let Some(job) = state.jobs.get_mut(&job_id) {
                job.claimed_by = Some(worker_id.to_string());
                job.claim_expires_at = Some(expires);
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn record_failure(&self, job_id: &JobId) -> StorageResult<Option<u32>> {
        let mut state = self.state.lock().unwrap();
        Ok(state.jobs.get_mut(job_id).map(|job| {
            job.tries += 1;
            job.claimed_by = None;
            job.claim_expires_at = None;
            job.tries
        }))
    }

    async fn delete_job(&self, job_id: &JobId) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.jobs.remove(job_id);
        Ok(())
    }

    async fn jobs_for_memory(&self, memory_id: &MemoryId) -> StorageResult<Vec<EmbeddingJob>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .jobs
            .values()
            .filter(|j| &j.memory_id == memory_id)
            .cloned()
            .collect())
    }

    async fn pending_count(&self) -> StorageResult<u64> {
        let state = self.state.lock().unwrap();
        Ok(state.jobs.len() as u64)
    }
}

#[async_trait]
impl ExpertMemorySearch for InMemoryMemoryStore {
    async fn search_expert_memories(
        &self,
        request: &SearchRequest,
    ) -> StorageResult<Vec<ScoredMemory>> {
        let candidates: Vec<MemoryRecord> = {
            let state = self.state.lock().unwrap();
            state
                .memories
                .values()
                .filter(|r| {
                    r.expert_id == request.expert_id
                        && r.embedding_status == EmbeddingStatus::Ready
                })
                .cloned()
                .collect()
        };
        ranking::rank_candidates(request, candidates)
    }
}

// ---------------------------------------------------------------------------
// InMemoryKnowledgeStore
// ---------------------------------------------------------------------------

/// In-memory team knowledge and matchup history.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeStore {
    knowledge: Mutex<HashMap<(String, String, String), KnowledgeEntry>>,
    matchups: Mutex<HashMap<(String, String, String), MatchupMemory>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TeamKnowledgeStore for InMemoryKnowledgeStore {
    async fn team_knowledge(
        &self,
        expert_id: &str,
        team_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<KnowledgeEntry>> {
        let knowledge = self.knowledge.lock().unwrap();
        let mut entries: Vec<KnowledgeEntry> = knowledge
            .values()
            .filter(|k| k.expert_id == expert_id && k.team_id == team_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.confidence_level
                .total_cmp(&a.confidence_level)
                .then_with(|| a.knowledge_type.cmp(&b.knowledge_type))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    async fn upsert_knowledge(&self, entry: KnowledgeEntry) -> StorageResult<()> {
        let key = (
            entry.expert_id.clone(),
            entry.team_id.clone(),
            entry.knowledge_type.clone(),
        );
        self.knowledge.lock().unwrap().insert(key, entry);
        Ok(())
    }
}

#[async_trait]
impl MatchupStore for InMemoryKnowledgeStore {
    async fn matchup(
        &self,
        expert_id: &str,
        team_a_id: &str,
        team_b_id: &str,
    ) -> StorageResult<Option<MatchupMemory>> {
        let matchups = self.matchups.lock().unwrap();
        let key = (
            expert_id.to_string(),
            team_a_id.to_string(),
            team_b_id.to_string(),
        );
        Ok(matchups.get(&key).cloned())
    }

    async fn upsert_matchup(&self, matchup: MatchupMemory) -> StorageResult<()> {
        let key = (
            matchup.expert_id.clone(),
            matchup.team_a_id.clone(),
            matchup.team_b_id.clone(),
        );
        self.matchups.lock().unwrap().insert(key, matchup);
        Ok(())
    }
}
