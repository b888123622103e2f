//! Runtime configuration for the ingest worker, retrieval, and the embedding
//! provider.
//!
//! Every struct has a `Default`, a `from_env()` that overlays `RECALL_*`
//! variables, and a `validate()`. Unparseable or out-of-range values are
//! configuration errors, never silently replaced by defaults.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RecallError, Result};

pub const MAX_BATCH_SIZE: usize = 16;
pub const MAX_TRIES_CEILING: u32 = 10;

/// Read and parse an environment variable. `Ok(None)` when unset.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| RecallError::config(format!("{key}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RecallError::config(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

// ---------------------------------------------------------------------------
// WorkerConfig
// ---------------------------------------------------------------------------

/// Ingest worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Identity written on claimed jobs.
    pub worker_id: String,
    /// Jobs claimed per pass (1..=16).
    pub batch_size: usize,
    /// Failed attempts before a memory is quarantined (1..=10).
    pub max_tries: u32,
    /// Pause between memories within a pass.
    pub rate_limit_ms: u64,
    /// First idle-poll delay; doubles per consecutive empty pass.
    pub poll_base_ms: u64,
    /// Idle-poll delay ceiling.
    pub poll_max_ms: u64,
    /// Random spread applied to idle-poll delays, as a fraction.
    pub poll_jitter: f64,
    /// How long a claim is honoured before another worker may take the job.
    pub claim_lease_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            batch_size: 8,
            max_tries: 5,
            rate_limit_ms: 200,
            poll_base_ms: 500,
            poll_max_ms: 30_000,
            poll_jitter: 0.2,
            claim_lease_ms: 120_000,
        }
    }
}

impl WorkerConfig {
    /// Defaults overlaid with:
    /// - RECALL_WORKER_ID
    /// - RECALL_WORKER_BATCH_SIZE (clamped to 1..=16)
    /// - RECALL_WORKER_MAX_TRIES (clamped to 1..=10)
    /// - RECALL_WORKER_RATE_LIMIT_MS
    /// - RECALL_WORKER_POLL_BASE_MS / RECALL_WORKER_POLL_MAX_MS
    /// - RECALL_WORKER_CLAIM_LEASE_MS
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(id) = std::env::var("RECALL_WORKER_ID") {
            cfg.worker_id = id;
        }
        if let Some(n) = env_parse("RECALL_WORKER_BATCH_SIZE")? {
            cfg = cfg.with_batch_size(n);
        }
        if let Some(n) = env_parse("RECALL_WORKER_MAX_TRIES")? {
            cfg = cfg.with_max_tries(n);
        }
        if let Some(ms) = env_parse("RECALL_WORKER_RATE_LIMIT_MS")? {
            cfg.rate_limit_ms = ms;
        }
        if let Some(ms) = env_parse("RECALL_WORKER_POLL_BASE_MS")? {
            cfg.poll_base_ms = ms;
        }
        if let Some(ms) = env_parse("RECALL_WORKER_POLL_MAX_MS")? {
            cfg.poll_max_ms = ms;
        }
        if let Some(ms) = env_parse("RECALL_WORKER_CLAIM_LEASE_MS")? {
            cfg.claim_lease_ms = ms;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn with_max_tries(mut self, n: u32) -> Self {
        self.max_tries = n.clamp(1, MAX_TRIES_CEILING);
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit_ms = rate_limit.as_millis() as u64;
        self
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_millis(self.claim_lease_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_id.trim().is_empty() {
            return Err(RecallError::config("worker_id must not be empty"));
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(RecallError::config(format!(
                "batch_size must be within 1..={MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if !(1..=MAX_TRIES_CEILING).contains(&self.max_tries) {
            return Err(RecallError::config(format!(
                "max_tries must be within 1..={MAX_TRIES_CEILING}, got {}",
                self.max_tries
            )));
        }
        if self.poll_base_ms == 0 || self.poll_base_ms > self.poll_max_ms {
            return Err(RecallError::config(format!(
                "poll backoff requires 0 < base ({}) <= max ({})",
                self.poll_base_ms, self.poll_max_ms
            )));
        }
        check_unit("poll_jitter", self.poll_jitter)?;
        if self.claim_lease_ms == 0 {
            return Err(RecallError::config("claim lease must be positive"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RetrievalConfig
// ---------------------------------------------------------------------------

/// Retrieval orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Cosine similarity floor for episodic matches.
    pub similarity_threshold: f64,
    /// Maximum episodic matches.
    pub match_count: usize,
    /// Temporal weight for experts without a registered profile. Takes the
    /// place of the fallback profile's weights.
    pub alpha: f64,
    /// Maximum knowledge entries per team.
    pub knowledge_limit: usize,
    /// Upper bound on a whole retrieval.
    pub timeout_ms: u64,
    /// Re-sort episodic matches client-side with the expert's weights.
    pub rerank: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.72,
            match_count: 7,
            alpha: 0.8,
            knowledge_limit: 10,
            timeout_ms: 5_000,
            rerank: true,
        }
    }
}

impl RetrievalConfig {
    /// Defaults overlaid with RECALL_MATCH_THRESHOLD, RECALL_MATCH_COUNT,
    /// RECALL_ALPHA, RECALL_KNOWLEDGE_LIMIT, RECALL_RETRIEVAL_TIMEOUT_MS and
    /// RECALL_RERANK.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = env_parse("RECALL_MATCH_THRESHOLD")? {
            cfg.similarity_threshold = v;
        }
        if let Some(v) = env_parse("RECALL_MATCH_COUNT")? {
            cfg.match_count = v;
        }
        if let Some(v) = env_parse("RECALL_ALPHA")? {
            cfg.alpha = v;
        }
        if let Some(v) = env_parse("RECALL_KNOWLEDGE_LIMIT")? {
            cfg.knowledge_limit = v;
        }
        if let Some(v) = env_parse("RECALL_RETRIEVAL_TIMEOUT_MS")? {
            cfg.timeout_ms = v;
        }
        if let Some(v) = env_parse("RECALL_RERANK")? {
            cfg.rerank = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_unit("similarity_threshold", self.similarity_threshold)?;
        check_unit("alpha", self.alpha)?;
        if self.match_count == 0 {
            return Err(RecallError::config("match_count must be positive"));
        }
        if self.knowledge_limit == 0 {
            return Err(RecallError::config("knowledge_limit must be positive"));
        }
        if self.timeout_ms == 0 {
            return Err(RecallError::config("retrieval timeout must be positive"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EmbeddingConfig
// ---------------------------------------------------------------------------

/// Embedding provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    /// Expected vector length; other lengths are rejected.
    pub dimensions: usize,
    /// Input is truncated to this many characters before the call.
    pub max_input_chars: usize,
    pub request_timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            max_input_chars: 8000,
            request_timeout_ms: 30_000,
        }
    }
}

impl EmbeddingConfig {
    /// Defaults overlaid with OPENAI_API_KEY, RECALL_EMBEDDING_URL,
    /// RECALL_EMBEDDING_MODEL, RECALL_EMBEDDING_DIM and
    /// RECALL_EMBEDDING_TIMEOUT_MS.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.api_key = std::env::var("OPENAI_API_KEY").ok();
        if let Ok(url) = std::env::var("RECALL_EMBEDDING_URL") {
            cfg.base_url = url;
        }
        if let Ok(model) = std::env::var("RECALL_EMBEDDING_MODEL") {
            cfg.model = model;
        }
        if let Some(v) = env_parse("RECALL_EMBEDDING_DIM")? {
            cfg.dimensions = v;
        }
        if let Some(v) = env_parse("RECALL_EMBEDDING_TIMEOUT_MS")? {
            cfg.request_timeout_ms = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(RecallError::config("embedding base_url must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(RecallError::config("embedding model must not be empty"));
        }
        if self.dimensions == 0 {
            return Err(RecallError::config("embedding dimensions must be positive"));
        }
        if self.max_input_chars == 0 {
            return Err(RecallError::config("max_input_chars must be positive"));
        }
        Ok(())
    }
}
