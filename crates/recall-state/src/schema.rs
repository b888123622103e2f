//! Row definitions for the recall SurrealDB tables
//!
//! Tables:
//! - memories: Expert memory records with facet embeddings
//! - embedding_jobs: FIFO queue of pending embedding work
//! - team_knowledge: Structured per-team beliefs
//! - matchup_memories: Orientation-sensitive head-to-head history
//!
//! Rows convert to and from the `storage_traits` types at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::{
    ActualOutcome, ContextualFactor, EmbeddingJob, EmbeddingStatus, FacetEmbeddings, JobId,
    KnowledgeEntry, MatchupMemory, MemoryId, MemoryRecord, PredictionData,
};

/// Module for serializing chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Row in `memories`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing)]
    pub id: Option<surrealdb::sql::Thing>,
    pub memory_id: String,
    pub expert_id: String,
    pub game_id: String,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    #[serde(default)]
    pub contextual_factors: Vec<ContextualFactor>,
    pub prediction: Option<PredictionData>,
    pub outcome: Option<ActualOutcome>,
    #[serde(default)]
    pub lessons_learned: Vec<String>,
    pub embedding_status: EmbeddingStatus,
    #[serde(default)]
    pub embeddings: FacetEmbeddings,
    pub embedding_model: Option<String>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub embedding_generated_at: Option<DateTime<Utc>>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl From<MemoryRecord> for MemoryRow {
    fn from(r: MemoryRecord) -> Self {
        MemoryRow {
            id: None,
            memory_id: r.memory_id.0,
            expert_id: r.expert_id,
            game_id: r.game_id,
            home_team: r.home_team,
            away_team: r.away_team,
            contextual_factors: r.contextual_factors,
            prediction: r.prediction,
            outcome: r.outcome,
            lessons_learned: r.lessons_learned,
            embedding_status: r.embedding_status,
            embeddings: r.embeddings,
            embedding_model: r.embedding_model,
            embedding_generated_at: r.embedding_generated_at,
            created_at: r.created_at,
        }
    }
}

impl From<MemoryRow> for MemoryRecord {
    fn from(row: MemoryRow) -> Self {
        MemoryRecord {
            memory_id: MemoryId(row.memory_id),
            expert_id: row.expert_id,
            game_id: row.game_id,
            home_team: row.home_team,
            away_team: row.away_team,
            contextual_factors: row.contextual_factors,
            prediction: row.prediction,
            outcome: row.outcome,
            lessons_learned: row.lessons_learned,
            embedding_status: row.embedding_status,
            embeddings: row.embeddings,
            embedding_model: row.embedding_model,
            embedding_generated_at: row.embedding_generated_at,
            created_at: row.created_at,
        }
    }
}

/// Row in `embedding_jobs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    #[serde(default, skip_serializing)]
    pub id: Option<surrealdb::sql::Thing>,
    pub job_id: String,
    pub memory_id: String,
    pub tries: u32,
    #[serde(with = "surreal_datetime")]
    pub enqueued_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub claim_expires_at: Option<DateTime<Utc>>,
}

impl From<EmbeddingJob> for JobRow {
    fn from(j: EmbeddingJob) -> Self {
        JobRow {
            id: None,
            job_id: j.job_id.0,
            memory_id: j.memory_id.0,
            tries: j.tries,
            enqueued_at: j.enqueued_at,
            claimed_by: j.claimed_by,
            claim_expires_at: j.claim_expires_at,
        }
    }
}

impl From<JobRow> for EmbeddingJob {
    fn from(row: JobRow) -> Self {
        EmbeddingJob {
            job_id: JobId(row.job_id),
            memory_id: MemoryId(row.memory_id),
            tries: row.tries,
            enqueued_at: row.enqueued_at,
            claimed_by: row.claimed_by,
            claim_expires_at: row.claim_expires_at,
        }
    }
}

/// Row in `team_knowledge`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRow {
    #[serde(default, skip_serializing)]
    pub id: Option<surrealdb::sql::Thing>,
    pub expert_id: String,
    pub team_id: String,
    pub knowledge_type: String,
    pub knowledge_summary: String,
    pub confidence_level: f64,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl From<KnowledgeEntry> for KnowledgeRow {
    fn from(k: KnowledgeEntry) -> Self {
        KnowledgeRow {
            id: None,
            expert_id: k.expert_id,
            team_id: k.team_id,
            knowledge_type: k.knowledge_type,
            knowledge_summary: k.knowledge_summary,
            confidence_level: k.confidence_level,
            updated_at: k.updated_at,
        }
    }
}

impl From<KnowledgeRow> for KnowledgeEntry {
    fn from(row: KnowledgeRow) -> Self {
        KnowledgeEntry {
            expert_id: row.expert_id,
            team_id: row.team_id,
            knowledge_type: row.knowledge_type,
            knowledge_summary: row.knowledge_summary,
            confidence_level: row.confidence_level,
            updated_at: row.updated_at,
        }
    }
}

/// Row in `matchup_memories`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchupRow {
    #[serde(default, skip_serializing)]
    pub id: Option<surrealdb::sql::Thing>,
    pub expert_id: String,
    pub team_a_id: String,
    pub team_b_id: String,
    pub summary: String,
    pub games_analyzed: u32,
    pub expert_accuracy: Option<f64>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl From<MatchupMemory> for MatchupRow {
    fn from(m: MatchupMemory) -> Self {
        MatchupRow {
            id: None,
            expert_id: m.expert_id,
            team_a_id: m.team_a_id,
            team_b_id: m.team_b_id,
            summary: m.summary,
            games_analyzed: m.games_analyzed,
            expert_accuracy: m.expert_accuracy,
            updated_at: m.updated_at,
        }
    }
}

impl From<MatchupRow> for MatchupMemory {
    fn from(row: MatchupRow) -> Self {
        MatchupMemory {
            expert_id: row.expert_id,
            team_a_id: row.team_a_id,
            team_b_id: row.team_b_id,
            summary: row.summary,
            games_analyzed: row.games_analyzed,
            expert_accuracy: row.expert_accuracy,
            updated_at: row.updated_at,
        }
    }
}

/// One row of a `GROUP BY embedding_status` coverage query
#[derive(Debug, Clone, Deserialize)]
pub struct StatusCountRow {
    pub embedding_status: EmbeddingStatus,
    pub n: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_row_round_trip_preserves_fields() {
        let rec = MemoryRecord::new("e1", "g1")
            .with_teams("KC", "BUF")
            .with_factor("weather", "wind 20mph")
            .with_lesson("trust the run game in wind");
        let row = MemoryRow::from(rec.clone());
        assert!(row.id.is_none());
        let back = MemoryRecord::from(row);
        assert_eq!(back, rec);
    }

    #[test]
    fn job_row_keeps_claim() {
        let mut job = EmbeddingJob::new(MemoryId("m1".into()));
        job.claimed_by = Some("w1".into());
        job.tries = 2;
        let back = EmbeddingJob::from(JobRow::from(job.clone()));
        assert_eq!(back, job);
    }
}
