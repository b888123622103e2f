//! SurrealDB schema migrations and initialization
//!
//! Sets up the four recall tables with the indexes the worker and the
//! retrieval path depend on. Safe to call multiple times (idempotent).

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all recall tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing recall SurrealDB schema");

    init_memories_table(db).await?;
    init_embedding_jobs_table(db).await?;
    init_team_knowledge_table(db).await?;
    init_matchup_memories_table(db).await?;

    info!("recall schema initialization complete");
    Ok(())
}

/// Initialize `memories` table
///
/// Schema:
/// ```text
/// TABLE memories {
///   memory_id:              STRING (unique)
///   expert_id:              STRING (indexed)
///   game_id:                STRING
///   home_team / away_team:  STRING?
///   contextual_factors:     ARRAY<{factor, value}>
///   prediction / outcome:   OBJECT?
///   lessons_learned:        ARRAY<STRING>
///   embedding_status:       STRING (pending | ready | failed, indexed)
///   embeddings:             OBJECT {context?, prediction?, outcome?, combined?}
///   embedding_model:        STRING?
///   embedding_generated_at: DATETIME?
///   created_at:             DATETIME
/// }
/// ```
///
/// `embedding_status` is indexed alone (fetch N pending, coverage counts) and
/// with `expert_id` (per-expert search over ready rows).
async fn init_memories_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing memories table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS memories SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_memory_id ON TABLE memories COLUMNS memory_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_embedding_status ON TABLE memories COLUMNS embedding_status;
        DEFINE INDEX IF NOT EXISTS idx_expert_status ON TABLE memories COLUMNS expert_id, embedding_status;
        DEFINE INDEX IF NOT EXISTS idx_memories_created_at ON TABLE memories COLUMNS created_at;
    "#;

    db.query(sql).await?.check()?;
    info!("memories table initialized");
    Ok(())
}

/// Initialize `embedding_jobs` table
///
/// Schema:
/// ```text
/// TABLE embedding_jobs {
///   job_id:            STRING (unique)
///   memory_id:         STRING (indexed)
///   tries:             INT
///   enqueued_at:       DATETIME (indexed, FIFO order)
///   claimed_by:        STRING?
///   claim_expires_at:  DATETIME?
/// }
/// ```
async fn init_embedding_jobs_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing embedding_jobs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS embedding_jobs SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_job_id ON TABLE embedding_jobs COLUMNS job_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_job_memory_id ON TABLE embedding_jobs COLUMNS memory_id;
        DEFINE INDEX IF NOT EXISTS idx_job_enqueued_at ON TABLE embedding_jobs COLUMNS enqueued_at;
    "#;

    db.query(sql).await?.check()?;
    info!("embedding_jobs table initialized");
    Ok(())
}

/// Initialize `team_knowledge` table, unique on `(expert_id, team_id, knowledge_type)`
async fn init_team_knowledge_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing team_knowledge table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS team_knowledge SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_knowledge_key ON TABLE team_knowledge
            COLUMNS expert_id, team_id, knowledge_type UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_knowledge_team ON TABLE team_knowledge
            COLUMNS expert_id, team_id;
    "#;

    db.query(sql).await?.check()?;
    info!("team_knowledge table initialized");
    Ok(())
}

/// Initialize `matchup_memories` table, unique on `(expert_id, team_a_id, team_b_id)`
async fn init_matchup_memories_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing matchup_memories table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS matchup_memories SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_matchup_key ON TABLE matchup_memories
            COLUMNS expert_id, team_a_id, team_b_id UNIQUE;
    "#;

    db.query(sql).await?.check()?;
    info!("matchup_memories table initialized");
    Ok(())
}
