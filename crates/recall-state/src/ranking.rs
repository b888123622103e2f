//! Ranking math shared by every `ExpertMemorySearch` backend and by
//! client-side re-ranking in the domain layer.
//!
//! - `decay`: half-life recency score in `(0, 1]`
//! - `cosine_similarity`: vector similarity in `[-1, 1]`
//! - `blend`: `(1 - alpha) * similarity + alpha * recency`
//! - `rank_candidates`: filter, score, sort, and truncate a candidate set

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::storage_traits::{
    EmbeddingStatus, MemoryRecord, ScoredMemory, SearchRequest, StorageResult,
};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Invalid ranking parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RankingError {
    #[error("half-life must be positive and finite, got {0}")]
    NonPositiveHalfLife(f64),

    #[error("{name} must be within [0, 1], got {value}")]
    OutOfUnitRange { name: &'static str, value: f64 },
}

/// Recency score `0.5 ^ (age_days / half_life_days)`.
///
/// Ages at or below zero (future-dated memories) score 1.0.
pub fn decay(age_days: f64, half_life_days: f64) -> Result<f64, RankingError> {
    if !(half_life_days > 0.0) || !half_life_days.is_finite() {
        return Err(RankingError::NonPositiveHalfLife(half_life_days));
    }
    if !(age_days > 0.0) {
        return Ok(1.0);
    }
    Ok(0.5f64.powf(age_days / half_life_days))
}

/// Fractional days from `from` to `now`.
pub fn age_days(from: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - from).num_milliseconds() as f64 / MILLIS_PER_DAY
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 for empty, mismatched, or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

/// Blend similarity and recency with `alpha` as the temporal weight.
pub fn blend(similarity: f64, recency: f64, alpha: f64) -> f64 {
    (1.0 - alpha) * similarity + alpha * recency
}

pub(crate) fn check_unit(name: &'static str, value: f64) -> Result<(), RankingError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RankingError::OutOfUnitRange { name, value })
    }
}

/// Score candidates against a search request.
///
/// Drops records that belong to another expert, are not `Ready`, lack a
/// combined vector, or fall below `match_threshold`. Ties on blended score
/// break by similarity, then by memory id.
pub fn rank_candidates<I>(request: &SearchRequest, candidates: I) -> StorageResult<Vec<ScoredMemory>>
where
    I: IntoIterator<Item = MemoryRecord>,
{
    check_unit("alpha", request.alpha)?;
    // Validates the half-life even when there are no candidates.
    decay(0.0, request.half_life_days)?;

    let mut scored = Vec::new();
    for memory in candidates {
        if memory.expert_id != request.expert_id
            || memory.embedding_status != EmbeddingStatus::Ready
        {
            continue;
        }
        let Some(combined) = memory.embeddings.combined.as_deref() else {
            continue;
        };
        let similarity_score = cosine_similarity(combined, &request.query_embedding);
        if similarity_score < request.match_threshold {
            continue;
        }
        let recency_score = decay(memory.age_days(request.now), request.half_life_days)?;
        let blended_score = blend(similarity_score, recency_score, request.alpha);
        scored.push(ScoredMemory {
            memory,
            similarity_score,
            recency_score,
            blended_score,
        });
    }

    scored.sort_by(|a, b| {
        b.blended_score
            .total_cmp(&a.blended_score)
            .then_with(|| b.similarity_score.total_cmp(&a.similarity_score))
            .then_with(|| a.memory.memory_id.cmp(&b.memory.memory_id))
    });
    scored.truncate(request.match_count);
    Ok(scored)
}
