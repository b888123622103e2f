//! Structured observability hooks for ingest and retrieval.
//!
//! - `WorkerSpan` tagging every log of one worker pass with its worker id
//! - Emission functions for job outcomes and retrieval lifecycle events
//!
//! Events are emitted at `info!` level, degradations and quarantines at
//! `warn!`. Set `RUST_LOG` to filter.

use tracing::instrument::Instrumented;
use tracing::{info, warn, Instrument};

use crate::retrieval::PartialLookupFailure;

/// Worker-scoped span for one pass. Instrumenting the pass future (rather
/// than entering the span) keeps the future `Send`.
///
/// ```ignore
/// WorkerSpan::new("worker-a").instrument(pass).await
/// // every event inside the pass carries worker_id = "worker-a"
/// ```
pub struct WorkerSpan {
    span: tracing::Span,
}

impl WorkerSpan {
    pub fn new(worker_id: &str) -> Self {
        Self {
            span: tracing::info_span!("recall.worker", worker_id = %worker_id),
        }
    }

    pub fn instrument<F: std::future::Future>(self, fut: F) -> Instrumented<F> {
        fut.instrument(self.span)
    }
}

/// Emit event: embeddings written and job removed.
pub fn emit_job_succeeded(job_id: &str, memory_id: &str, facets_embedded: usize) {
    info!(
        event = "job.succeeded",
        job_id = %job_id,
        memory_id = %memory_id,
        facets_embedded = facets_embedded,
    );
}

/// Emit event: attempt failed, job stays queued.
pub fn emit_job_retry(job_id: &str, memory_id: &str, tries: u32, error: &dyn std::fmt::Display) {
    warn!(
        event = "job.retry",
        job_id = %job_id,
        memory_id = %memory_id,
        tries = tries,
        error = %error,
    );
}

/// Emit event: retries exhausted, memory marked failed.
pub fn emit_job_quarantined(
    job_id: &str,
    memory_id: &str,
    tries: u32,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "job.quarantined",
        job_id = %job_id,
        memory_id = %memory_id,
        tries = tries,
        error = %error,
    );
}

/// Emit event: job removed without retry.
pub fn emit_job_dropped(job_id: &str, memory_id: &str, reason: &str) {
    info!(
        event = "job.dropped",
        job_id = %job_id,
        memory_id = %memory_id,
        reason = %reason,
    );
}

/// Emit event: one retrieval section came back empty because its lookup
/// failed or did not finish in time.
pub fn emit_lookup_degraded(expert_id: &str, failure: &PartialLookupFailure) {
    warn!(
        event = "retrieval.degraded",
        expert_id = %expert_id,
        section = %failure.section,
        reason = %failure.reason,
    );
}

/// Emit event: retrieval finished with per-section counts.
pub fn emit_retrieval_finished(
    expert_id: &str,
    episodic: usize,
    knowledge: usize,
    matchup: bool,
    degraded: usize,
    elapsed_ms: u64,
) {
    info!(
        event = "retrieval.finished",
        expert_id = %expert_id,
        episodic = episodic,
        knowledge = knowledge,
        matchup = matchup,
        degraded = degraded,
        elapsed_ms = elapsed_ms,
    );
}
