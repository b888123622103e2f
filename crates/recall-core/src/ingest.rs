//! Embedding ingest worker.
//!
//! Drains the embedding job queue with at-least-once semantics:
//!
//! 1. Claim up to `batch_size` jobs, oldest first, under a lease.
//! 2. Per job: load the memory, render facets, embed. The combined facet is
//!    mandatory; the others are best-effort.
//! 3. Success writes all vectors, marks the memory `ready`, deletes the job.
//! 4. A retryable failure bumps `tries`; at `max_tries` the memory is
//!    quarantined (`failed`) and the job deleted. A failure that no retry can
//!    fix (malformed record, rejected write) quarantines at once.
//!
//! Every write tolerates being applied twice so duplicate processing after a
//! lapsed lease is harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use recall_state::{
    EmbeddingJob, EmbeddingQueue, EmbeddingWrite, FacetEmbeddings, MemoryId, MemoryRecord,
    MemoryStore, StorageError,
};

use crate::config::WorkerConfig;
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::error::{RecallError, Result};
use crate::facets::{FacetTextRenderer, FacetTexts};
use crate::obs::{
    emit_job_dropped, emit_job_quarantined, emit_job_retry, emit_job_succeeded, WorkerSpan,
};

/// What happened to one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Retried { tries: u32 },
    Quarantined { tries: u32 },
    Dropped,
}

/// Counts for one pass over the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub quarantined: usize,
    pub dropped: usize,
    /// Jobs whose bookkeeping failed; their lease will lapse and they will be
    /// picked up again.
    pub errored: usize,
}

impl PassReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Succeeded => self.succeeded += 1,
            JobOutcome::Retried { .. } => self.retried += 1,
            JobOutcome::Quarantined { .. } => self.quarantined += 1,
            JobOutcome::Dropped => self.dropped += 1,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.claimed == 0
    }

    /// Work was done and nothing was left behind for a retry.
    pub fn is_clean(&self) -> bool {
        self.claimed > 0 && self.retried == 0 && self.errored == 0
    }
}

/// Exponential idle-poll delay: `base * 2^(idle_passes - 1)`, capped at
/// `max`, then spread by `±jitter` using `unit` drawn from [0, 1).
pub fn backoff_delay(
    base: Duration,
    max: Duration,
    jitter: f64,
    idle_passes: u32,
    unit: f64,
) -> Duration {
    let exponent = idle_passes.saturating_sub(1).min(20);
    let raw = base.saturating_mul(1u32 << exponent).min(max);
    let spread = (unit * 2.0 - 1.0) * jitter;
    raw.mul_f64((1.0 + spread).max(0.0))
}

/// Spaces provider work at least `interval` apart, across passes.
struct Pacer {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }
        let mut next_slot = self.next_slot.lock().await;
        if let Some(at) = *next_slot {
            tokio::time::sleep_until(at).await;
        }
        *next_slot = Some(Instant::now() + self.interval);
    }
}

pub struct IngestWorker {
    store: Arc<dyn MemoryStore>,
    queue: Arc<dyn EmbeddingQueue>,
    provider: Arc<dyn EmbeddingProvider>,
    renderer: FacetTextRenderer,
    pacer: Pacer,
    config: WorkerConfig,
}

impl IngestWorker {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        queue: Arc<dyn EmbeddingQueue>,
        provider: Arc<dyn EmbeddingProvider>,
        config: WorkerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            queue,
            provider,
            renderer: FacetTextRenderer::new(),
            pacer: Pacer::new(config.rate_limit()),
            config,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim one batch and process it.
    pub async fn run_once(&self) -> Result<PassReport> {
        WorkerSpan::new(&self.config.worker_id)
            .instrument(self.pass())
            .await
    }

    async fn pass(&self) -> Result<PassReport> {
        let jobs = self
            .queue
            .claim_batch(
                &self.config.worker_id,
                self.config.batch_size,
                self.config.claim_lease(),
            )
            .await?;

        let mut report = PassReport {
            claimed: jobs.len(),
            ..Default::default()
        };
        if jobs.is_empty() {
            return Ok(report);
        }
        debug!(claimed = jobs.len(), "processing batch");

        for job in &jobs {
            self.pacer.wait().await;
            match self.process_job(job).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    error!(job_id = %job.job_id, memory_id = %job.memory_id, error = %e, "job bookkeeping failed");
                    report.errored += 1;
                }
            }
        }

        info!(
            claimed = report.claimed,
            succeeded = report.succeeded,
            retried = report.retried,
            quarantined = report.quarantined,
            dropped = report.dropped,
            errored = report.errored,
            "ingest pass complete"
        );
        Ok(report)
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Sleeps with exponential backoff and jitter after empty or failed
    /// passes, and after passes that left jobs behind for a retry. Only a
    /// clean pass resets the backoff and polls again immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(worker_id = %self.config.worker_id, "ingest worker started");
        let mut idle_passes = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(report) if report.is_clean() => {
                    idle_passes = 0;
                    continue;
                }
                Ok(_) => idle_passes = idle_passes.saturating_add(1),
                Err(e) => {
                    error!(error = %e, "ingest pass failed");
                    idle_passes = idle_passes.saturating_add(1);
                }
            }

            let delay = backoff_delay(
                Duration::from_millis(self.config.poll_base_ms),
                Duration::from_millis(self.config.poll_max_ms),
                self.config.poll_jitter,
                idle_passes,
                rand::random::<f64>(),
            );
            debug!(delay_ms = delay.as_millis() as u64, idle_passes, "backing off");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.config.worker_id, "ingest worker stopped");
        Ok(())
    }

    /// Process one claimed job. `Err` only for storage failures in the
    /// job's own bookkeeping.
    pub async fn process_job(&self, job: &EmbeddingJob) -> Result<JobOutcome> {
        let Some(record) = self.store.get_memory(&job.memory_id).await? else {
            self.queue.delete_job(&job.job_id).await?;
            emit_job_dropped(job.job_id.as_str(), job.memory_id.as_str(), "memory vanished");
            return Ok(JobOutcome::Dropped);
        };

        if record.embedding_status.is_terminal() {
            // Another worker finished it, or it was quarantined.
            self.queue.delete_job(&job.job_id).await?;
            emit_job_dropped(
                job.job_id.as_str(),
                job.memory_id.as_str(),
                record.embedding_status.as_str(),
            );
            return Ok(JobOutcome::Dropped);
        }

        let write = match self.embed_record(&record).await {
            Ok(write) => write,
            Err(e) => return self.handle_failure(job, e).await,
        };

        let facets_embedded = count_facets(&write.embeddings);
        match self.store.write_embeddings(&job.memory_id, write).await {
            Ok(()) => {
                self.queue.delete_job(&job.job_id).await?;
                emit_job_succeeded(job.job_id.as_str(), job.memory_id.as_str(), facets_embedded);
                Ok(JobOutcome::Succeeded)
            }
            Err(StorageError::TerminalState { status, .. }) => {
                self.queue.delete_job(&job.job_id).await?;
                emit_job_dropped(job.job_id.as_str(), job.memory_id.as_str(), &status);
                Ok(JobOutcome::Dropped)
            }
            Err(StorageError::MemoryNotFound { .. }) => {
                self.queue.delete_job(&job.job_id).await?;
                emit_job_dropped(job.job_id.as_str(), job.memory_id.as_str(), "memory vanished");
                Ok(JobOutcome::Dropped)
            }
            Err(e) => self.handle_failure(job, e.into()).await,
        }
    }

    /// Retryable failures spend one try; anything else quarantines at once.
    async fn handle_failure(&self, job: &EmbeddingJob, cause: RecallError) -> Result<JobOutcome> {
        if cause.is_retryable() {
            self.fail_job(job, cause).await
        } else {
            self.drop_unrecoverable(job, &cause).await
        }
    }

    /// Render and embed all facets. Only a combined-facet failure is an error.
    async fn embed_record(&self, record: &MemoryRecord) -> Result<EmbeddingWrite> {
        let facets = self.renderer.render(record);
        if facets.is_empty() {
            return Err(RecallError::MalformedRecord {
                memory_id: record.memory_id.to_string(),
                reason: "no usable fields to render".into(),
            });
        }

        let combined = match self.provider.embed(&facets.combined).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => {
                return Err(RecallError::TransientProvider(
                    "provider returned an empty combined vector".into(),
                ))
            }
            Err(EmbeddingError::EmptyInput) => {
                return Err(RecallError::MalformedRecord {
                    memory_id: record.memory_id.to_string(),
                    reason: "combined text is empty".into(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let context = self
            .embed_facet(&record.memory_id, "context", &facets.context, &facets, &combined)
            .await;
        let prediction = self
            .embed_facet(&record.memory_id, "prediction", &facets.prediction, &facets, &combined)
            .await;
        let outcome = self
            .embed_facet(&record.memory_id, "outcome", &facets.outcome, &facets, &combined)
            .await;

        Ok(EmbeddingWrite {
            embeddings: FacetEmbeddings {
                context,
                prediction,
                outcome,
                combined: Some(combined),
            },
            model: self.provider.model_name().to_string(),
            generated_at: Utc::now(),
        })
    }

    /// Best-effort facet embedding. Facets that fell back to the combined
    /// text reuse the combined vector.
    async fn embed_facet(
        &self,
        memory_id: &MemoryId,
        facet: &str,
        text: &str,
        facets: &FacetTexts,
        combined: &[f32],
    ) -> Option<Vec<f32>> {
        if text == facets.combined {
            return Some(combined.to_vec());
        }
        match self.provider.embed(text).await {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => {
                warn!(memory_id = %memory_id, facet, "empty facet vector, skipping");
                None
            }
            Err(e) => {
                warn!(memory_id = %memory_id, facet, error = %e, "facet embedding failed, skipping");
                None
            }
        }
    }

    /// Retrying cannot help: quarantine without spending the retry budget.
    async fn drop_unrecoverable(
        &self,
        job: &EmbeddingJob,
        cause: &RecallError,
    ) -> Result<JobOutcome> {
        self.quarantine_record(&job.memory_id).await?;
        self.queue.delete_job(&job.job_id).await?;
        emit_job_dropped(job.job_id.as_str(), job.memory_id.as_str(), &cause.to_string());
        Ok(JobOutcome::Dropped)
    }

    async fn fail_job(&self, job: &EmbeddingJob, cause: RecallError) -> Result<JobOutcome> {
        let Some(tries) = self.queue.record_failure(&job.job_id).await? else {
            // Deleted under us by another worker.
            emit_job_dropped(job.job_id.as_str(), job.memory_id.as_str(), "job vanished");
            return Ok(JobOutcome::Dropped);
        };

        if tries < self.config.max_tries {
            emit_job_retry(job.job_id.as_str(), job.memory_id.as_str(), tries, &cause);
            return Ok(JobOutcome::Retried { tries });
        }

        self.quarantine_record(&job.memory_id).await?;
        self.queue.delete_job(&job.job_id).await?;
        let quarantined = RecallError::Quarantined {
            memory_id: job.memory_id.to_string(),
            tries,
        };
        emit_job_quarantined(
            job.job_id.as_str(),
            job.memory_id.as_str(),
            tries,
            &format!("{quarantined}: {cause}"),
        );
        Ok(JobOutcome::Quarantined { tries })
    }

    /// Mark failed, tolerating a record that already left `pending` or vanished.
    async fn quarantine_record(&self, memory_id: &MemoryId) -> Result<()> {
        match self.store.mark_failed(memory_id).await {
            Ok(()) => Ok(()),
            Err(StorageError::TerminalState { status, .. }) => {
                debug!(memory_id = %memory_id, status = %status, "memory already terminal");
                Ok(())
            }
            Err(StorageError::MemoryNotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn count_facets(embeddings: &FacetEmbeddings) -> usize {
    [
        &embeddings.context,
        &embeddings.prediction,
        &embeddings.outcome,
        &embeddings.combined,
    ]
    .iter()
    .filter(|v| v.is_some())
    .count()
}

/// Validates new memories and persists them with their embedding job.
pub struct MemoryRecorder {
    store: Arc<dyn MemoryStore>,
    renderer: FacetTextRenderer,
}

impl MemoryRecorder {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            renderer: FacetTextRenderer::new(),
        }
    }

    /// Persist `record` as pending and enqueue it for embedding.
    #[instrument(skip(self, record), fields(expert_id = %record.expert_id, game_id = %record.game_id))]
    pub async fn record(&self, record: MemoryRecord) -> Result<MemoryId> {
        self.validate(&record)?;
        let memory_id = self.store.insert_memory(record).await?;
        debug!(memory_id = %memory_id, "memory recorded");
        Ok(memory_id)
    }

    fn validate(&self, record: &MemoryRecord) -> Result<()> {
        let malformed = |reason: String| RecallError::MalformedRecord {
            memory_id: record.memory_id.to_string(),
            reason,
        };
        if record.expert_id.trim().is_empty() {
            return Err(malformed("expert_id is empty".into()));
        }
        if record.game_id.trim().is_empty() {
            return Err(malformed("game_id is empty".into()));
        }
        if let Some(p) = &record.prediction {
            for (name, value) in [
                ("home_win_prob", p.home_win_prob),
                ("away_win_prob", p.away_win_prob),
                ("confidence", p.confidence),
            ] {
                if let Some(v) = value {
                    if !(0.0..=1.0).contains(&v) {
                        return Err(malformed(format!("{name} must be within [0, 1], got {v}")));
                    }
                }
            }
        }
        if self.renderer.render(record).is_empty() {
            return Err(malformed("no usable fields to render".into()));
        }
        Ok(())
    }
}
