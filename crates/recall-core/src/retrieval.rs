//! Retrieval orchestration.
//!
//! One retrieval fans out four independent lookups (episodic search, home
//! knowledge, away knowledge, matchup history) and merges whatever finishes
//! before the deadline into a [`RetrievalBundle`]. A failed or late lookup
//! leaves its section empty and is recorded in `bundle.degraded`; it never
//! fails the request.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use recall_state::{
    EmbeddingStatus, ExpertMemorySearch, KnowledgeEntry, MatchupMemory, MatchupStore,
    ScoredMemory, SearchRequest, StorageResult, TeamKnowledgeStore,
};

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::obs::{emit_lookup_degraded, emit_retrieval_finished};
use crate::profile::ProfileRegistry;
use crate::temporal::{self, SeasonContext};

/// One retrieval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub expert_id: String,
    pub query_embedding: Vec<f32>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    /// Enables the seasonal half-life adjustment when present.
    pub season: Option<SeasonContext>,
    /// Reference time for memory ages.
    pub as_of: DateTime<Utc>,
}

impl RetrievalQuery {
    pub fn new(expert_id: impl Into<String>, query_embedding: Vec<f32>) -> Self {
        Self {
            expert_id: expert_id.into(),
            query_embedding,
            home_team: None,
            away_team: None,
            season: None,
            as_of: Utc::now(),
        }
    }

    pub fn with_teams(mut self, home: impl Into<String>, away: impl Into<String>) -> Self {
        self.home_team = Some(home.into());
        self.away_team = Some(away.into());
        self
    }

    pub fn with_season(mut self, season: SeasonContext) -> Self {
        self.season = Some(season);
        self
    }

    pub fn as_of(mut self, at: DateTime<Utc>) -> Self {
        self.as_of = at;
        self
    }
}

/// Which of the four lookups a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupSection {
    Episodic,
    HomeKnowledge,
    AwayKnowledge,
    Matchup,
}

impl LookupSection {
    const ALL: [LookupSection; 4] = [
        LookupSection::Episodic,
        LookupSection::HomeKnowledge,
        LookupSection::AwayKnowledge,
        LookupSection::Matchup,
    ];
}

impl fmt::Display for LookupSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LookupSection::Episodic => "episodic",
            LookupSection::HomeKnowledge => "home_knowledge",
            LookupSection::AwayKnowledge => "away_knowledge",
            LookupSection::Matchup => "matchup",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum DegradeReason {
    TimedOut,
    Failed(String),
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradeReason::TimedOut => f.write_str("timed out"),
            DegradeReason::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// A lookup that did not contribute to the bundle. Logged, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialLookupFailure {
    pub section: LookupSection,
    pub reason: DegradeReason,
}

/// Which orientation of the matchup key produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchupOrientation {
    /// `(team_a = home, team_b = away)`
    AsGiven,
    /// `(team_a = away, team_b = home)`
    Reversed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientedMatchup {
    pub memory: MatchupMemory,
    pub orientation: MatchupOrientation,
}

/// Merged, request-scoped retrieval result. Sources are not deduplicated
/// against each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalBundle {
    pub expert_id: String,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub episodic: Vec<ScoredMemory>,
    pub home_knowledge: Vec<KnowledgeEntry>,
    pub away_knowledge: Vec<KnowledgeEntry>,
    pub matchup: Option<OrientedMatchup>,
    pub degraded: Vec<PartialLookupFailure>,
    pub elapsed_ms: u64,
}

impl RetrievalBundle {
    fn empty(query: &RetrievalQuery) -> Self {
        Self {
            expert_id: query.expert_id.clone(),
            home_team: query.home_team.clone(),
            away_team: query.away_team.clone(),
            episodic: Vec::new(),
            home_knowledge: Vec::new(),
            away_knowledge: Vec::new(),
            matchup: None,
            degraded: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.episodic.is_empty()
            && self.home_knowledge.is_empty()
            && self.away_knowledge.is_empty()
            && self.matchup.is_none()
    }
}

/// Matchup history for `(home, away)`, falling back to `(away, home)`.
pub async fn lookup_matchup(
    store: &dyn MatchupStore,
    expert_id: &str,
    home: &str,
    away: &str,
) -> StorageResult<Option<OrientedMatchup>> {
    if let Some(memory) = store.matchup(expert_id, home, away).await? {
        return Ok(Some(OrientedMatchup {
            memory,
            orientation: MatchupOrientation::AsGiven,
        }));
    }
    Ok(store
        .matchup(expert_id, away, home)
        .await?
        .map(|memory| OrientedMatchup {
            memory,
            orientation: MatchupOrientation::Reversed,
        }))
}

enum SectionResult {
    Episodic(StorageResult<Vec<ScoredMemory>>),
    HomeKnowledge(StorageResult<Vec<KnowledgeEntry>>),
    AwayKnowledge(StorageResult<Vec<KnowledgeEntry>>),
    Matchup(StorageResult<Option<OrientedMatchup>>),
}

impl SectionResult {
    fn section(&self) -> LookupSection {
        match self {
            SectionResult::Episodic(_) => LookupSection::Episodic,
            SectionResult::HomeKnowledge(_) => LookupSection::HomeKnowledge,
            SectionResult::AwayKnowledge(_) => LookupSection::AwayKnowledge,
            SectionResult::Matchup(_) => LookupSection::Matchup,
        }
    }
}

pub struct RetrievalOrchestrator {
    search: Arc<dyn ExpertMemorySearch>,
    knowledge: Arc<dyn TeamKnowledgeStore>,
    matchups: Arc<dyn MatchupStore>,
    profiles: ProfileRegistry,
    config: RetrievalConfig,
}

impl RetrievalOrchestrator {
    pub fn new(
        search: Arc<dyn ExpertMemorySearch>,
        knowledge: Arc<dyn TeamKnowledgeStore>,
        matchups: Arc<dyn MatchupStore>,
        profiles: ProfileRegistry,
        config: RetrievalConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            search,
            knowledge,
            matchups,
            profiles,
            config,
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve under the configured timeout.
    pub async fn retrieve(&self, query: RetrievalQuery) -> Result<RetrievalBundle> {
        let deadline = Instant::now() + self.config.timeout();
        self.retrieve_with_deadline(query, deadline).await
    }

    /// Retrieve under the earlier of `deadline` and the configured timeout.
    /// Lookups still running at the deadline are aborted.
    ///
    /// Errors only on invalid configuration (e.g. a bad seasonal input);
    /// lookup failures degrade the bundle instead.
    #[instrument(skip(self, query), fields(expert_id = %query.expert_id))]
    pub async fn retrieve_with_deadline(
        &self,
        query: RetrievalQuery,
        deadline: Instant,
    ) -> Result<RetrievalBundle> {
        let started = Instant::now();
        let deadline = deadline.min(started + self.config.timeout());

        // Profiled experts blend with their own weights; others use alpha.
        let (half_life_days, similarity_weight, temporal_weight) =
            match self.profiles.get(&query.expert_id) {
                Some(p) => (
                    p.half_life_for(query.season)?,
                    p.similarity_weight,
                    p.temporal_weight,
                ),
                None => (
                    self.profiles.fallback().half_life_for(query.season)?,
                    1.0 - self.config.alpha,
                    self.config.alpha,
                ),
            };

        let request = SearchRequest {
            expert_id: query.expert_id.clone(),
            query_embedding: query.query_embedding.clone(),
            match_threshold: self.config.similarity_threshold,
            match_count: self.config.match_count,
            alpha: temporal_weight,
            half_life_days,
            now: query.as_of,
        };

        let mut bundle = RetrievalBundle::empty(&query);
        let mut pending: Vec<LookupSection> = Vec::with_capacity(4);
        let mut join_set = JoinSet::new();

        {
            let search = Arc::clone(&self.search);
            pending.push(LookupSection::Episodic);
            join_set.spawn(async move {
                SectionResult::Episodic(search.search_expert_memories(&request).await)
            });
        }

        let limit = self.config.knowledge_limit;
        if let Some(home) = query.home_team.clone() {
            let knowledge = Arc::clone(&self.knowledge);
            let expert = query.expert_id.clone();
            pending.push(LookupSection::HomeKnowledge);
            join_set.spawn(async move {
                SectionResult::HomeKnowledge(knowledge.team_knowledge(&expert, &home, limit).await)
            });
        }
        if let Some(away) = query.away_team.clone() {
            let knowledge = Arc::clone(&self.knowledge);
            let expert = query.expert_id.clone();
            pending.push(LookupSection::AwayKnowledge);
            join_set.spawn(async move {
                SectionResult::AwayKnowledge(knowledge.team_knowledge(&expert, &away, limit).await)
            });
        }
        if let (Some(home), Some(away)) = (query.home_team.clone(), query.away_team.clone()) {
            let matchups = Arc::clone(&self.matchups);
            let expert = query.expert_id.clone();
            pending.push(LookupSection::Matchup);
            join_set.spawn(async move {
                SectionResult::Matchup(lookup_matchup(matchups.as_ref(), &expert, &home, &away).await)
            });
        }

        loop {
            let next = tokio::time::timeout_at(deadline, join_set.join_next()).await;
            match next {
                Ok(Some(Ok(result))) => {
                    let section = result.section();
                    pending.retain(|s| *s != section);
                    self.merge(&mut bundle, result, similarity_weight, temporal_weight);
                }
                Ok(Some(Err(join_err))) => {
                    // Section unknown for a panicked task; it stays pending
                    // and is reported below.
                    warn!(error = %join_err, "retrieval lookup task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    join_set.abort_all();
                    for section in pending.drain(..) {
                        bundle.degraded.push(PartialLookupFailure {
                            section,
                            reason: DegradeReason::TimedOut,
                        });
                    }
                    break;
                }
            }
        }
        for section in pending.drain(..) {
            bundle.degraded.push(PartialLookupFailure {
                section,
                reason: DegradeReason::Failed("lookup task aborted".into()),
            });
        }

        bundle
            .degraded
            .sort_by_key(|f| LookupSection::ALL.iter().position(|s| *s == f.section));
        for failure in &bundle.degraded {
            emit_lookup_degraded(&bundle.expert_id, failure);
        }

        bundle.elapsed_ms = started.elapsed().as_millis() as u64;
        emit_retrieval_finished(
            &bundle.expert_id,
            bundle.episodic.len(),
            bundle.home_knowledge.len() + bundle.away_knowledge.len(),
            bundle.matchup.is_some(),
            bundle.degraded.len(),
            bundle.elapsed_ms,
        );
        Ok(bundle)
    }

    fn merge(
        &self,
        bundle: &mut RetrievalBundle,
        result: SectionResult,
        similarity_weight: f64,
        temporal_weight: f64,
    ) {
        let section = result.section();
        match result {
            SectionResult::Episodic(Ok(mut matches)) => {
                let before = matches.len();
                matches.retain(|m| m.memory.embedding_status == EmbeddingStatus::Ready);
                if matches.len() != before {
                    warn!(
                        dropped = before - matches.len(),
                        "search returned memories that are not ready"
                    );
                }
                if self.config.rerank {
                    temporal::rerank(&mut matches, similarity_weight, temporal_weight);
                }
                matches.truncate(self.config.match_count);
                debug!(matches = matches.len(), "episodic search complete");
                bundle.episodic = matches;
            }
            SectionResult::HomeKnowledge(Ok(entries)) => {
                bundle.home_knowledge = sort_knowledge(entries, self.config.knowledge_limit);
            }
            SectionResult::AwayKnowledge(Ok(entries)) => {
                bundle.away_knowledge = sort_knowledge(entries, self.config.knowledge_limit);
            }
            SectionResult::Matchup(Ok(matchup)) => bundle.matchup = matchup,
            SectionResult::Episodic(Err(e))
            | SectionResult::HomeKnowledge(Err(e))
            | SectionResult::AwayKnowledge(Err(e))
            | SectionResult::Matchup(Err(e)) => bundle.degraded.push(PartialLookupFailure {
                section,
                reason: DegradeReason::Failed(e.to_string()),
            }),
        }
    }
}

/// Highest confidence first, capped at `limit`.
fn sort_knowledge(mut entries: Vec<KnowledgeEntry>, limit: usize) -> Vec<KnowledgeEntry> {
    entries.sort_by(|a, b| b.confidence_level.total_cmp(&a.confidence_level));
    entries.truncate(limit);
    entries
}
