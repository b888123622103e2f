//! Expert temporal profiles.
//!
//! Each expert archetype weighs similarity against recency differently and
//! remembers over a different window. Profiles are validated once at
//! construction and read-only afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{RecallError, Result};
use crate::temporal::{self, SeasonContext};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Recency window and blend weights for one expert archetype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertTemporalProfile {
    pub archetype: String,
    pub half_life_days: f64,
    pub similarity_weight: f64,
    pub temporal_weight: f64,
}

impl ExpertTemporalProfile {
    pub fn new(
        archetype: impl Into<String>,
        half_life_days: f64,
        similarity_weight: f64,
        temporal_weight: f64,
    ) -> Result<Self> {
        let profile = Self {
            archetype: archetype.into(),
            half_life_days,
            similarity_weight,
            temporal_weight,
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.half_life_days > 0.0) || !self.half_life_days.is_finite() {
            return Err(RecallError::config(format!(
                "profile {}: half_life_days must be positive, got {}",
                self.archetype, self.half_life_days
            )));
        }
        for (name, w) in [
            ("similarity_weight", self.similarity_weight),
            ("temporal_weight", self.temporal_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(RecallError::config(format!(
                    "profile {}: {name} must be within [0, 1], got {w}",
                    self.archetype
                )));
            }
        }
        let sum = self.similarity_weight + self.temporal_weight;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(RecallError::config(format!(
                "profile {}: weights must sum to 1, got {sum}",
                self.archetype
            )));
        }
        Ok(())
    }

    /// Baseline half-life, or the seasonally adjusted one when a season
    /// context is known.
    pub fn half_life_for(&self, season: Option<SeasonContext>) -> Result<f64> {
        match season {
            Some(season) => temporal::adjusted_half_life(self.half_life_days, season),
            None => Ok(self.half_life_days),
        }
    }

    pub fn recency_for(&self, age_days: f64, season: Option<SeasonContext>) -> Result<f64> {
        temporal::decay(age_days, self.half_life_for(season)?)
    }

    pub fn blended_score(&self, similarity: f64, recency: f64) -> f64 {
        temporal::blended_score(
            self.similarity_weight,
            self.temporal_weight,
            similarity,
            recency,
        )
    }
}

/// Built-in archetypes: (name, half-life days, similarity weight).
const DEFAULT_ROSTER: &[(&str, f64, f64)] = &[
    ("momentum_rider", 45.0, 0.5),
    ("gut_instinct", 30.0, 0.4),
    ("market_reader", 60.0, 0.6),
    ("contrarian", 120.0, 0.7),
    ("statistics_purist", 365.0, 0.85),
    ("veteran_analyst", 540.0, 0.8),
];

/// Profiles keyed by expert id, with a fallback for unknown experts.
///
/// Retrieval takes only the fallback's half-life. Unknown experts blend with
/// `RetrievalConfig::alpha`, which overrides the fallback's weights.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: HashMap<String, ExpertTemporalProfile>,
    fallback: ExpertTemporalProfile,
}

impl ProfileRegistry {
    pub fn new(fallback: ExpertTemporalProfile) -> Result<Self> {
        fallback.validate()?;
        Ok(Self {
            profiles: HashMap::new(),
            fallback,
        })
    }

    /// The built-in archetypes, each registered under its own name, with a
    /// 180-day fallback. Its 0.2 / 0.8 weights mirror the default alpha.
    pub fn with_default_roster() -> Result<Self> {
        let mut registry = Self::new(ExpertTemporalProfile::new("baseline", 180.0, 0.2, 0.8)?)?;
        for (name, half_life, sw) in DEFAULT_ROSTER {
            let profile = ExpertTemporalProfile::new(*name, *half_life, *sw, 1.0 - sw)?;
            registry.register(*name, profile)?;
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        expert_id: impl Into<String>,
        profile: ExpertTemporalProfile,
    ) -> Result<()> {
        profile.validate()?;
        self.profiles.insert(expert_id.into(), profile);
        Ok(())
    }

    pub fn get(&self, expert_id: &str) -> Option<&ExpertTemporalProfile> {
        self.profiles.get(expert_id)
    }

    /// Half-life source for experts without a profile of their own.
    pub fn fallback(&self) -> &ExpertTemporalProfile {
        &self.fallback
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
