//! Ingest worker behaviour against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use recall_core::{
    EmbeddingError, EmbeddingProvider, IngestWorker, JobOutcome, MemoryRecorder, PassReport,
    ProfileRegistry, RecallError, RetrievalConfig, RetrievalOrchestrator, RetrievalQuery, WorkerConfig,
};
use recall_state::fakes::{InMemoryKnowledgeStore, InMemoryMemoryStore};
use recall_state::{
    ActualOutcome, CoverageStats, EmbeddingQueue, EmbeddingStatus, EmbeddingWrite, MemoryId,
    MemoryRecord, MemoryStore, PredictionData, StorageError, StorageResult,
};

#[derive(Clone, Copy)]
enum Script {
    /// Every call returns the vector.
    Succeed,
    /// Every call fails with a 503.
    Unavailable,
    /// Only combined texts (joined with " || ") succeed.
    CombinedOnly,
    /// Every call returns an empty vector.
    Empty,
}

struct ScriptedProvider {
    script: Script,
    vector: Vec<f32>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            vector: vec![1.0, 0.0],
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Succeed => Ok(self.vector.clone()),
            Script::Unavailable => Err(EmbeddingError::Status {
                status: 503,
                body: "unavailable".into(),
            }),
            Script::CombinedOnly if text.contains(" || ") => Ok(self.vector.clone()),
            Script::CombinedOnly => Err(EmbeddingError::Http("connection reset".into())),
            Script::Empty => Ok(Vec::new()),
        }
    }

    fn model_name(&self) -> &str {
        "scripted-embed"
    }
}

fn full_record(expert: &str, game: &str) -> MemoryRecord {
    MemoryRecord::new(expert, game)
        .with_teams("KC", "BUF")
        .with_factor("weather", "snow")
        .with_prediction(PredictionData {
            predicted_winner: Some("KC".into()),
            home_win_prob: Some(0.6),
            away_win_prob: Some(0.4),
            confidence: Some(0.7),
        })
        .with_outcome(ActualOutcome {
            winner: Some("BUF".into()),
            home_score: Some(20),
            away_score: Some(23),
        })
        .with_lesson("cold games suppress passing")
}

fn config() -> WorkerConfig {
    WorkerConfig::default()
        .with_worker_id("test-worker")
        .with_batch_size(8)
        .with_max_tries(5)
        .with_rate_limit(Duration::ZERO)
}

fn worker(store: &Arc<InMemoryMemoryStore>, provider: Arc<ScriptedProvider>) -> IngestWorker {
    IngestWorker::new(store.clone(), store.clone(), provider, config()).unwrap()
}

#[tokio::test]
async fn success_writes_facets_and_deletes_job() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let id = store
        .insert_memory(full_record("contrarian", "g1"))
        .await
        .unwrap();
    assert_eq!(store.jobs().len(), 1);

    let provider = ScriptedProvider::new(Script::Succeed);
    let report = worker(&store, provider.clone()).run_once().await.unwrap();
    assert_eq!((report.claimed, report.succeeded), (1, 1));
    // combined + context + prediction + outcome
    assert_eq!(provider.calls(), 4);

    let record = store.get_memory(&id).await.unwrap().unwrap();
    assert_eq!(record.embedding_status, EmbeddingStatus::Ready);
    assert_eq!(record.embedding_model.as_deref(), Some("scripted-embed"));
    assert!(record.embedding_generated_at.is_some());
    let e = &record.embeddings;
    assert!(e.combined.is_some() && e.context.is_some());
    assert!(e.prediction.is_some() && e.outcome.is_some());
    assert!(store.jobs().is_empty());
}

#[tokio::test]
async fn facet_failures_do_not_block_ready() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let id = store
        .insert_memory(full_record("contrarian", "g1"))
        .await
        .unwrap();

    let report = worker(&store, ScriptedProvider::new(Script::CombinedOnly))
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);

    let record = store.get_memory(&id).await.unwrap().unwrap();
    assert_eq!(record.embedding_status, EmbeddingStatus::Ready);
    assert!(record.embeddings.combined.is_some());
    assert!(record.embeddings.context.is_none());
    assert!(record.embeddings.outcome.is_none());
}

#[tokio::test]
async fn facets_without_own_fields_reuse_combined_vector() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let id = store
        .insert_memory(MemoryRecord::new("contrarian", "g1").with_lesson("trust the line"))
        .await
        .unwrap();

    let provider = ScriptedProvider::new(Script::Succeed);
    worker(&store, provider.clone()).run_once().await.unwrap();
    assert_eq!(provider.calls(), 1);

    let record = store.get_memory(&id).await.unwrap().unwrap();
    assert_eq!(record.embeddings.context, record.embeddings.combined);
}

#[tokio::test]
async fn empty_vector_counts_as_failure() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let id = store
        .insert_memory(full_record("contrarian", "g1"))
        .await
        .unwrap();

    let w = worker(&store, ScriptedProvider::new(Script::Empty));
    let jobs = store.claim_batch("t", 1, Duration::from_secs(60)).await.unwrap();
    let outcome = w.process_job(&jobs[0]).await.unwrap();
    assert_eq!(outcome, JobOutcome::Retried { tries: 1 });

    let record = store.get_memory(&id).await.unwrap().unwrap();
    assert_eq!(record.embedding_status, EmbeddingStatus::Pending);
    assert_eq!(store.jobs()[0].tries, 1);
}

#[tokio::test]
async fn quarantined_memory_is_excluded_from_retrieval() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let kept = store
        .insert_memory(full_record("contrarian", "kept"))
        .await
        .unwrap();
    worker(&store, ScriptedProvider::new(Script::Succeed))
        .run_once()
        .await
        .unwrap();

    let doomed = store
        .insert_memory(full_record("contrarian", "doomed"))
        .await
        .unwrap();
    let failing = worker(&store, ScriptedProvider::new(Script::Unavailable));
    for attempt in 1..=4u32 {
        let report = failing.run_once().await.unwrap();
        assert_eq!(report.retried, 1, "attempt {attempt}");
        let jobs = store.jobs_for_memory(&doomed).await.unwrap();
        assert_eq!(jobs[0].tries, attempt);
    }
    let report = failing.run_once().await.unwrap();
    assert_eq!(report.quarantined, 1);

    let record = store.get_memory(&doomed).await.unwrap().unwrap();
    assert_eq!(record.embedding_status, EmbeddingStatus::Failed);
    assert!(store.jobs_for_memory(&doomed).await.unwrap().is_empty());
    assert!(store.enqueue(&doomed).await.is_err());

    // Further passes find nothing to do.
    assert!(failing.run_once().await.unwrap().is_idle());

    let orchestrator = RetrievalOrchestrator::new(
        store.clone(),
        Arc::new(InMemoryKnowledgeStore::new()),
        Arc::new(InMemoryKnowledgeStore::new()),
        ProfileRegistry::with_default_roster().unwrap(),
        RetrievalConfig::default(),
    )
    .unwrap();
    let bundle = orchestrator
        .retrieve(RetrievalQuery::new("contrarian", vec![1.0, 0.0]).as_of(Utc::now()))
        .await
        .unwrap();
    let ids: Vec<_> = bundle.episodic.iter().map(|m| &m.memory.memory_id).collect();
    assert_eq!(ids, vec![&kept]);

    let coverage = store.coverage(Some("contrarian")).await.unwrap();
    assert_eq!((coverage.ready, coverage.failed, coverage.pending), (1, 1, 0));
}

#[tokio::test]
async fn vanished_memory_drops_job() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let id = store
        .insert_memory(full_record("contrarian", "g1"))
        .await
        .unwrap();
    store.delete_memory(&id).await.unwrap();

    let provider = ScriptedProvider::new(Script::Succeed);
    let report = worker(&store, provider.clone()).run_once().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(provider.calls(), 0);
    assert!(store.jobs().is_empty());
}

#[tokio::test]
async fn unrenderable_memory_is_quarantined_without_retry() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let id = store
        .insert_memory(MemoryRecord::new("contrarian", "g1"))
        .await
        .unwrap();

    let provider = ScriptedProvider::new(Script::Succeed);
    let report = worker(&store, provider.clone()).run_once().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(provider.calls(), 0);

    let record = store.get_memory(&id).await.unwrap().unwrap();
    assert_eq!(record.embedding_status, EmbeddingStatus::Failed);
    assert!(store.jobs().is_empty());
}

#[tokio::test]
async fn duplicate_delivery_is_not_reembedded() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let id = store
        .insert_memory(full_record("contrarian", "g1"))
        .await
        .unwrap();
    let provider = ScriptedProvider::new(Script::Succeed);
    let w = worker(&store, provider.clone());

    let jobs = store.claim_batch("t", 1, Duration::from_secs(60)).await.unwrap();
    assert_eq!(w.process_job(&jobs[0]).await.unwrap(), JobOutcome::Succeeded);
    let calls_after_first = provider.calls();

    // Same job delivered again after a lapsed lease.
    assert_eq!(w.process_job(&jobs[0]).await.unwrap(), JobOutcome::Dropped);
    assert_eq!(provider.calls(), calls_after_first);
    assert!(store.enqueue(&id).await.is_err());
    assert_eq!(
        store.get_memory(&id).await.unwrap().unwrap().embedding_status,
        EmbeddingStatus::Ready
    );
}

#[tokio::test(start_paused = true)]
async fn rate_limit_spaces_out_memories() {
    let store = Arc::new(InMemoryMemoryStore::new());
    for game in ["g1", "g2", "g3"] {
        store
            .insert_memory(full_record("contrarian", game))
            .await
            .unwrap();
    }
    let w = IngestWorker::new(
        store.clone(),
        store.clone(),
        ScriptedProvider::new(Script::Succeed),
        config().with_rate_limit(Duration::from_millis(200)),
    )
    .unwrap();

    let started = tokio::time::Instant::now();
    let report = w.run_once().await.unwrap();
    assert_eq!(report.succeeded, 3);
    assert!(started.elapsed() >= Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn run_loop_stops_on_shutdown() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let w = Arc::new(worker(&store, ScriptedProvider::new(Script::Succeed)));
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn({
        let w = w.clone();
        async move { w.run(rx).await }
    });
    tokio::time::sleep(Duration::from_secs(5)).await;
    tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(60), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
    assert!(result.is_ok());
}

/// Always rate-limited; remembers when each call arrived.
#[derive(Default)]
struct ThrottledProvider {
    calls: Mutex<Vec<tokio::time::Instant>>,
}

#[async_trait]
impl EmbeddingProvider for ThrottledProvider {
    async fn embed(&self, _: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.lock().unwrap().push(tokio::time::Instant::now());
        Err(EmbeddingError::Status {
            status: 429,
            body: "slow down".into(),
        })
    }

    fn model_name(&self) -> &str {
        "throttled-embed"
    }
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_between_attempts() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let id = store
        .insert_memory(full_record("contrarian", "g1"))
        .await
        .unwrap();
    let provider = Arc::new(ThrottledProvider::default());
    let config = WorkerConfig::default().with_worker_id("test-worker");
    let min_gap = Duration::from_millis(config.poll_base_ms).mul_f64(1.0 - config.poll_jitter);
    let w = Arc::new(
        IngestWorker::new(store.clone(), store.clone(), provider.clone(), config).unwrap(),
    );

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn({
        let w = w.clone();
        async move { w.run(rx).await }
    });
    for _ in 0..600 {
        let status = store.get_memory(&id).await.unwrap().unwrap().embedding_status;
        if status == EmbeddingStatus::Failed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let calls = provider.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 5);
    for pair in calls.windows(2) {
        assert!(pair[1] - pair[0] >= min_gap, "gap {:?}", pair[1] - pair[0]);
    }
    // Backoff doubles while the provider keeps failing.
    assert!(calls[4] - calls[0] >= Duration::from_secs(5));
    assert_eq!(
        store.get_memory(&id).await.unwrap().unwrap().embedding_status,
        EmbeddingStatus::Failed
    );
}

#[tokio::test(start_paused = true)]
async fn rate_limit_holds_across_passes() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let provider = ScriptedProvider::new(Script::Succeed);
    let w = IngestWorker::new(
        store.clone(),
        store.clone(),
        provider,
        config().with_rate_limit(Duration::from_millis(300)),
    )
    .unwrap();

    store.insert_memory(full_record("contrarian", "g1")).await.unwrap();
    w.run_once().await.unwrap();
    store.insert_memory(full_record("contrarian", "g2")).await.unwrap();

    let started = tokio::time::Instant::now();
    assert_eq!(w.run_once().await.unwrap().succeeded, 1);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

/// Delegates to the in-memory store but fails every embedding write.
struct WriteFailingStore {
    inner: Arc<InMemoryMemoryStore>,
    error: fn() -> StorageError,
}

#[async_trait]
impl MemoryStore for WriteFailingStore {
    async fn insert_memory(&self, record: MemoryRecord) -> StorageResult<MemoryId> {
        self.inner.insert_memory(record).await
    }

    async fn get_memory(&self, memory_id: &MemoryId) -> StorageResult<Option<MemoryRecord>> {
        self.inner.get_memory(memory_id).await
    }

    async fn write_embeddings(&self, _: &MemoryId, _: EmbeddingWrite) -> StorageResult<()> {
        Err((self.error)())
    }

    async fn mark_failed(&self, memory_id: &MemoryId) -> StorageResult<()> {
        self.inner.mark_failed(memory_id).await
    }

    async fn delete_memory(&self, memory_id: &MemoryId) -> StorageResult<()> {
        self.inner.delete_memory(memory_id).await
    }

    async fn list_by_status(
        &self,
        status: EmbeddingStatus,
        limit: usize,
    ) -> StorageResult<Vec<MemoryRecord>> {
        self.inner.list_by_status(status, limit).await
    }

    async fn coverage(&self, expert_id: Option<&str>) -> StorageResult<CoverageStats> {
        self.inner.coverage(expert_id).await
    }
}

async fn run_with_failing_writes(
    error: fn() -> StorageError,
) -> (Arc<InMemoryMemoryStore>, MemoryId, PassReport) {
    let inner = Arc::new(InMemoryMemoryStore::new());
    let id = inner
        .insert_memory(full_record("contrarian", "g1"))
        .await
        .unwrap();
    let store = Arc::new(WriteFailingStore {
        inner: inner.clone(),
        error,
    });
    let w = IngestWorker::new(
        store,
        inner.clone(),
        ScriptedProvider::new(Script::Succeed),
        config(),
    )
    .unwrap();
    let report = w.run_once().await.unwrap();
    (inner, id, report)
}

#[tokio::test]
async fn rejected_write_is_quarantined_without_retry() {
    let (store, id, report) =
        run_with_failing_writes(|| StorageError::InvalidRecord("vector dimension rejected".into()))
            .await;
    assert_eq!((report.dropped, report.retried), (1, 0));
    assert_eq!(
        store.get_memory(&id).await.unwrap().unwrap().embedding_status,
        EmbeddingStatus::Failed
    );
    assert!(store.jobs().is_empty());
}

#[tokio::test]
async fn backend_write_failure_spends_a_try() {
    let (store, id, report) =
        run_with_failing_writes(|| StorageError::Backend("connection reset".into())).await;
    assert_eq!(report.retried, 1);
    assert_eq!(store.jobs_for_memory(&id).await.unwrap()[0].tries, 1);
    assert_eq!(
        store.get_memory(&id).await.unwrap().unwrap().embedding_status,
        EmbeddingStatus::Pending
    );
}

#[tokio::test]
async fn recorder_validates_and_enqueues() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let recorder = MemoryRecorder::new(store.clone());

    let id = recorder
        .record(full_record("contrarian", "g1"))
        .await
        .unwrap();
    assert_eq!(store.jobs_for_memory(&id).await.unwrap().len(), 1);

    let bad = full_record("contrarian", "g2").with_prediction(PredictionData {
        home_win_prob: Some(1.4),
        ..Default::default()
    });
    assert!(matches!(
        recorder.record(bad).await,
        Err(RecallError::MalformedRecord { .. })
    ));
    assert!(recorder
        .record(MemoryRecord::new("", "g3").with_lesson("x"))
        .await
        .is_err());
    assert_eq!(store.jobs().len(), 1);
}
