//! Temporal decay calculator.
//!
//! Pure scoring functions shared by store-side ranking (through the `alpha`
//! and `half_life_days` of a search request) and client-side re-ranking.
//!
//! ## Seasonal half-life
//!
//! ```text
//! factor   = (1.5 - richness) * (1 + 0.5 * max(0, 4 - week) / 4)
//! adjusted = clamp(base * factor, 0.5 * base, 2.0 * base)
//! ```
//!
//! Richer context shortens the window, sparse context widens it, and the
//! first four weeks of a season widen it further while little current-season
//! evidence exists. Non-increasing in both `richness` and `week`.

use serde::{Deserialize, Serialize};

use recall_state::{ranking, ScoredMemory};

use crate::error::{RecallError, Result};

const EARLY_SEASON_WEEKS: u32 = 4;
const EARLY_SEASON_WIDENING: f64 = 0.5;
const MIN_HALF_LIFE_FACTOR: f64 = 0.5;
const MAX_HALF_LIFE_FACTOR: f64 = 2.0;

/// Where in the season a retrieval happens and how much data backs it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeasonContext {
    /// Week of season, 1-based. 0 is treated as pre-season.
    pub week: u32,
    /// How much historical context exists for this point, in [0, 1].
    pub richness: f64,
}

/// `0.5 ^ (age_days / half_life_days)`; 1.0 for ages at or below zero.
///
/// A non-positive half-life is a configuration error.
pub fn decay(age_days: f64, half_life_days: f64) -> Result<f64> {
    Ok(ranking::decay(age_days, half_life_days)?)
}

/// Half-life adjusted for the season context. Deterministic in its inputs.
pub fn adjusted_half_life(base_half_life_days: f64, season: SeasonContext) -> Result<f64> {
    ranking::decay(0.0, base_half_life_days)?;
    if season.richness.is_nan() {
        return Err(RecallError::config("data richness must be a number"));
    }
    let richness = season.richness.clamp(0.0, 1.0);
    let early = EARLY_SEASON_WEEKS.saturating_sub(season.week) as f64 / EARLY_SEASON_WEEKS as f64;
    let factor = (1.5 - richness) * (1.0 + EARLY_SEASON_WIDENING * early);
    Ok(base_half_life_days
        * factor.clamp(MIN_HALF_LIFE_FACTOR, MAX_HALF_LIFE_FACTOR))
}

/// `similarity_weight * similarity + temporal_weight * recency`.
///
/// Stays in [0, 1] when the weights sum to 1 and both scores are in [0, 1].
pub fn blended_score(
    similarity_weight: f64,
    temporal_weight: f64,
    similarity: f64,
    recency: f64,
) -> f64 {
    similarity_weight * similarity + temporal_weight * recency
}

/// Recompute blended scores with explicit weights and re-sort, highest
/// first. Ties break by similarity, then memory id.
pub fn rerank(matches: &mut [ScoredMemory], similarity_weight: f64, temporal_weight: f64) {
    for m in matches.iter_mut() {
        m.blended_score = blended_score(
            similarity_weight,
            temporal_weight,
            m.similarity_score,
            m.recency_score,
        );
    }
    matches.sort_by(|a, b| {
        b.blended_score
            .total_cmp(&a.blended_score)
            .then_with(|| b.similarity_score.total_cmp(&a.similarity_score))
            .then_with(|| a.memory.memory_id.cmp(&b.memory.memory_id))
    });
}
