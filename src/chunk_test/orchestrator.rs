//! Runs every requested chunking method over one corpus and builds the comparison.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::Instrument;

use crate::chunk_test::corpus::Corpus;
use crate::chunk_test::metrics::{
    MethodRetrieval, QueryMetrics, QueryRetrieval, RetrievedChunk, semantic_diversity,
};
use crate::chunk_test::stats::chunk_statistics;
use crate::chunk_test::summary::{MethodRun, evaluate, summarize};
use crate::chunk_test::types::{
    ChunkTestProgress, ChunkTestRecord, ChunkTestResult, ChunkTestStage, ChunkTestStatus,
    MethodSlot, source_version,
};
use crate::chunking::{ChunkingError, ChunkingMethod, ChunkingSettings, chunk_document, strategy_for};
use crate::embedding::{EmbeddingClient, EmbeddingClientError, embed_in_batches};
use crate::index::{IndexError, IndexPoint, VectorIndex};
use crate::jobs::{Job, JobContext, JobError, ProgressTracker};
use crate::metrics::ServiceMetrics;
use crate::store::{ResultStore, StoreError};
use crate::timestamp::now_rfc3339;

/// Parameters shared by every chunk test.
#[derive(Debug, Clone, Default)]
pub struct ChunkTestSettings {
    /// Chunk size parameters.
    pub chunking: ChunkingSettings,
    /// Texts per embedding call; also points per index upsert.
    pub batch_size: usize,
    /// Hits retrieved per query.
    pub top_k: usize,
}

/// Why a single method did not produce results.
#[derive(Debug, Error)]
enum MethodError {
    #[error("Chunking failed: {0}")]
    Chunking(ChunkingError),
    #[error("Chunking produced no chunks")]
    NoChunks,
    #[error("Embedding failed: {0}")]
    Embedding(EmbeddingClientError),
    #[error("Index failed: {0}")]
    Index(IndexError),
}

enum Interrupt {
    Cancelled,
    Failed(MethodError),
}

impl From<MethodError> for Interrupt {
    fn from(error: MethodError) -> Self {
        Interrupt::Failed(error)
    }
}

impl From<ChunkingError> for Interrupt {
    fn from(error: ChunkingError) -> Self {
        Interrupt::Failed(MethodError::Chunking(error))
    }
}

impl From<EmbeddingClientError> for Interrupt {
    fn from(error: EmbeddingClientError) -> Self {
        Interrupt::Failed(MethodError::Embedding(error))
    }
}

impl From<IndexError> for Interrupt {
    fn from(error: IndexError) -> Self {
        Interrupt::Failed(MethodError::Index(error))
    }
}

impl From<JobError> for Interrupt {
    fn from(_: JobError) -> Self {
        Interrupt::Cancelled
    }
}

const PUBLISH_ATTEMPTS: u32 = 20;
const PUBLISH_BACKOFF: std::time::Duration = std::time::Duration::from_millis(25);

/// Index partition used by one method of one test.
pub fn partition_for(test_id: u64, method: ChunkingMethod) -> String {
    format!("chunk-test-{test_id}-{method}")
}

/// Components shared by every chunk-test job.
pub struct ChunkTestRunner {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    settings: ChunkTestSettings,
    tracker: ProgressTracker<ChunkTestProgress>,
    results: Arc<ResultStore>,
    metrics: Arc<ServiceMetrics>,
}

impl ChunkTestRunner {
    /// Assemble a runner over shared components.
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        settings: ChunkTestSettings,
        results: Arc<ResultStore>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            embedder,
            index,
            settings,
            tracker: ProgressTracker::new(),
            results,
            metrics,
        }
    }

    /// Live progress per job.
    pub fn tracker(&self) -> &ProgressTracker<ChunkTestProgress> {
        &self.tracker
    }

    /// Durable records and results.
    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }

    fn update<F>(&self, id: u64, change: F)
    where
        F: FnOnce(&mut ChunkTestProgress),
    {
        if let Err(error) = self.tracker.update(id, change) {
            tracing::debug!(test_id = id, error = %error, "Progress update ignored");
        }
    }

    /// Persist `result`, publish the matching terminal state, then drop the live entry; the
    /// stored result serves every later read.
    ///
    /// When a result already exists (another path finished the job first) the tracker is left
    /// alone so it keeps agreeing with the stored result. A result being written concurrently is
    /// waited for briefly before this write is retried.
    async fn publish<F>(&self, result: ChunkTestResult, terminal: F)
    where
        F: FnOnce(&mut ChunkTestProgress),
    {
        let id = result.test_id;
        let succeeded = result.status == ChunkTestStatus::Completed;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.results.save_result(result.clone()).await {
                Ok(_) => {
                    self.update(id, terminal);
                    self.tracker.remove(id);
                    self.metrics.record_chunk_test(succeeded);
                    return;
                }
                Err(StoreError::AlreadyExists(_)) if self.results.result(id).is_some() => {
                    tracing::debug!(test_id = id, "Result already persisted");
                    self.tracker.remove(id);
                    return;
                }
                Err(StoreError::AlreadyExists(_)) if attempts < PUBLISH_ATTEMPTS => {
                    tokio::time::sleep(PUBLISH_BACKOFF).await;
                }
                Err(error) => {
                    tracing::error!(test_id = id, error = %error, "Failed to persist chunk-test result");
                    self.update(id, |state| state.fail(format!("Failed to persist result: {error}"), None));
                    self.metrics.record_chunk_test(false);
                    return;
                }
            }
        }
    }

    /// Fail a job that has no comparisons, persisting a result carrying the cause.
    pub async fn finalize_failure(
        &self,
        record: &ChunkTestRecord,
        cause: String,
        stage: Option<ChunkTestStage>,
    ) {
        if self.results.result(record.test_id).is_some() {
            return;
        }
        let mut terminal = self
            .tracker
            .snapshot(record.test_id)
            .unwrap_or_else(|| ChunkTestProgress::pending(record.test_id));
        if terminal.status.is_terminal() {
            return;
        }
        tracing::warn!(test_id = record.test_id, cause = %cause, "Chunk test failed");
        terminal.fail(cause.clone(), stage);
        let result = ChunkTestResult::failed(record, &terminal);
        self.publish(result, move |state| state.fail(cause, stage))
            .await;
    }
}

/// Scheduler job running one chunk test.
pub struct ChunkTestJob {
    record: ChunkTestRecord,
    corpus: Arc<Corpus>,
    runner: Arc<ChunkTestRunner>,
    query_vectors: OnceCell<Arc<Vec<Vec<f32>>>>,
}

impl ChunkTestJob {
    /// Job for `record` over the resolved `corpus`.
    pub fn new(record: ChunkTestRecord, corpus: Arc<Corpus>, runner: Arc<ChunkTestRunner>) -> Self {
        Self {
            record,
            corpus,
            runner,
            query_vectors: OnceCell::new(),
        }
    }

    /// Scheduler key for a chunk test.
    pub fn key_for(test_id: u64) -> String {
        format!("chunk-test-{test_id}")
    }

    fn id(&self) -> u64 {
        self.record.test_id
    }

    /// Query embeddings, computed once per job and reused across methods and attempts.
    async fn query_vectors(&self) -> Result<Arc<Vec<Vec<f32>>>, EmbeddingClientError> {
        self.query_vectors
            .get_or_try_init(|| async {
                let vectors = embed_in_batches(
                    self.runner.embedder.as_ref(),
                    &self.record.queries,
                    self.runner.settings.batch_size,
                    |_, _| {},
                )
                .await?;
                Ok(Arc::new(vectors))
            })
            .await
            .cloned()
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let id = self.id();
        ctx.checkpoint()?;
        self.runner
            .update(id, |state| state.enter_job_stage(ChunkTestStage::Loading));
        let queries = self
            .query_vectors()
            .await
            .map_err(|error| JobError::Failed(format!("Query embedding failed: {error}")))?;
        ctx.checkpoint()?;

        let total = self.record.methods.len();
        let mut runs = Vec::new();
        let mut failures = BTreeMap::new();
        for (index, method) in self.record.methods.iter().copied().enumerate() {
            ctx.checkpoint()?;
            let slot = MethodSlot { index, total };
            let partition = partition_for(id, method);
            let outcome = self
                .run_method(method, slot, &partition, &queries, ctx)
                .instrument(tracing::info_span!("method", method = %method))
                .await;
            if let Err(error) = self.runner.index.drop_partition(&partition).await {
                tracing::warn!(test_id = id, partition = %partition, error = %error, "Failed to drop method partition");
            }

            match outcome {
                Ok(run) => {
                    tracing::info!(test_id = id, method = %method, chunks = run.stats.chunk_count, "Method completed");
                    runs.push(run);
                    self.runner
                        .update(id, |state| state.finish_method(method, slot, true));
                }
                Err(Interrupt::Cancelled) => return Err(JobError::Cancelled),
                Err(Interrupt::Failed(error)) => {
                    tracing::warn!(test_id = id, method = %method, error = %error, "Method failed");
                    failures.insert(method, error.to_string());
                    self.runner
                        .update(id, |state| state.finish_method(method, slot, false));
                }
            }
        }
        ctx.checkpoint()?;

        if runs.is_empty() {
            let causes: Vec<String> = failures
                .iter()
                .map(|(method, cause)| format!("{method}: {cause}"))
                .collect();
            let cause = format!("All chunking methods failed ({})", causes.join("; "));
            let mut terminal = self.snapshot();
            terminal.fail(cause.clone(), None);
            let mut result = ChunkTestResult::failed(&self.record, &terminal);
            result.method_failures = failures;
            self.runner
                .publish(result, move |state| state.fail(cause, None))
                .await;
            return Ok(());
        }

        self.runner
            .update(id, |state| state.enter_job_stage(ChunkTestStage::Summarizing));
        let top_k = self.runner.settings.top_k;
        let summary = summarize(&runs, &failures, top_k);
        let evaluation_results = evaluate(&runs);

        let mut terminal = self.snapshot();
        terminal.complete();
        let mut chunking_comparison = BTreeMap::new();
        let mut retrieval_comparison = BTreeMap::new();
        for run in runs {
            chunking_comparison.insert(run.method, run.stats);
            retrieval_comparison.insert(run.method, run.retrieval);
        }
        let result = ChunkTestResult {
            test_id: id,
            dataset_name: self.record.source.dataset_name().map(str::to_string),
            dataset_version: source_version(&self.record.source),
            document_ids: self.record.source.document_ids().map(<[u64]>::to_vec),
            queries: self.record.queries.clone(),
            methods: self.record.methods.clone(),
            chunking_comparison,
            retrieval_comparison,
            summary,
            evaluation_results,
            method_failures: failures,
            status: terminal.status,
            progress_percent: terminal.progress_percent,
            completed_methods: terminal.completed_methods.clone(),
            current_stage: None,
            error_message: None,
            created_at: now_rfc3339(),
        };
        self.runner.publish(result, |state| state.complete()).await;
        tracing::info!(test_id = id, "Chunk test completed");
        Ok(())
    }

    fn snapshot(&self) -> ChunkTestProgress {
        self.runner
            .tracker
            .snapshot(self.id())
            .unwrap_or_else(|| ChunkTestProgress::pending(self.id()))
    }

    fn enter(&self, method: ChunkingMethod, slot: MethodSlot, stage: ChunkTestStage) {
        tracing::info!(test_id = self.id(), method = %method, stage = ?stage, "Entering stage");
        self.runner
            .update(self.id(), |state| state.enter(method, slot, stage));
    }

    fn advance(&self, slot: MethodSlot, fraction: f64) {
        self.runner
            .update(self.id(), |state| state.advance(slot, fraction));
    }

    async fn run_method(
        &self,
        method: ChunkingMethod,
        slot: MethodSlot,
        partition: &str,
        query_vectors: &[Vec<f32>],
        ctx: &JobContext,
    ) -> Result<MethodRun, Interrupt> {
        let settings = &self.runner.settings;
        let documents = self.corpus.documents();

        self.enter(method, slot, ChunkTestStage::Chunking);
        let strategy = strategy_for(method, &settings.chunking)?;
        let started = Instant::now();
        let mut chunks = Vec::new();
        for (position, document) in documents.iter().enumerate() {
            chunks.extend(chunk_document(&document.id, &document.text, strategy.as_ref())?);
            self.advance(slot, (position + 1) as f64 / documents.len() as f64);
        }
        let elapsed = started.elapsed();
        if chunks.is_empty() {
            return Err(MethodError::NoChunks.into());
        }
        let stats = chunk_statistics(&chunks, &self.corpus, elapsed);
        ctx.checkpoint()?;

        self.enter(method, slot, ChunkTestStage::Embedding);
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = embed_in_batches(
            self.runner.embedder.as_ref(),
            &texts,
            settings.batch_size,
            |done, total| {
                ctx.renew_lease();
                self.advance(slot, done as f64 / total as f64);
            },
        )
        .await?;
        ctx.checkpoint()?;

        self.enter(method, slot, ChunkTestStage::Indexing);
        let points: Vec<IndexPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexPoint::from_chunk(chunk, vector))
            .collect();
        let vectors_by_id: HashMap<&str, &[f32]> = points
            .iter()
            .map(|point| (point.id.as_str(), point.vector.as_slice()))
            .collect();
        let total_points = points.len();
        let mut written = 0;
        for batch in points.chunks(settings.batch_size.max(1)) {
            self.runner.index.upsert(partition, batch.to_vec()).await?;
            written += batch.len();
            ctx.renew_lease();
            self.advance(slot, written as f64 / total_points as f64);
        }
        ctx.checkpoint()?;

        self.enter(method, slot, ChunkTestStage::Retrieval);
        let mut per_query = Vec::with_capacity(query_vectors.len());
        let mut diversities = Vec::new();
        for (position, (query, vector)) in self.record.queries.iter().zip(query_vectors).enumerate()
        {
            let started = Instant::now();
            let found = self.runner.index.query(partition, vector, settings.top_k).await?;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            let hit_vectors: Vec<&[f32]> = found
                .iter()
                .filter_map(|hit| vectors_by_id.get(hit.id.as_str()).copied())
                .collect();
            if let Some(diversity) = semantic_diversity(&hit_vectors) {
                diversities.push(diversity);
            }

            let hits = found
                .into_iter()
                .enumerate()
                .map(|(rank, hit)| {
                    let (document_id, span, text) = match &hit.payload {
                        Some(payload) => (
                            payload.document_id.clone(),
                            (payload.start, payload.end),
                            payload.text.as_str(),
                        ),
                        None => (String::new(), (0, 0), ""),
                    };
                    RetrievedChunk::new(rank + 1, hit.id.clone(), document_id, hit.score, span, text)
                })
                .collect();
            per_query.push(QueryRetrieval {
                query: query.clone(),
                hits,
                latency_ms,
                metrics: None,
                covered_evidence: Vec::new(),
            });
            ctx.renew_lease();
            self.advance(slot, (position + 1) as f64 / query_vectors.len().max(1) as f64);
        }
        ctx.checkpoint()?;

        self.enter(method, slot, ChunkTestStage::Evaluation);
        for query in &mut per_query {
            if let Some(evidence) = self.corpus.evidence(&query.query) {
                let (metrics, covered) =
                    QueryMetrics::score(&mut query.hits, &evidence, settings.top_k);
                query.metrics = Some(metrics);
                query.covered_evidence = covered.into_iter().collect();
            }
        }
        let diversity = if diversities.is_empty() {
            None
        } else {
            Some(diversities.iter().sum::<f64>() / diversities.len() as f64)
        };

        Ok(MethodRun {
            method,
            stats,
            retrieval: MethodRetrieval::new(per_query, settings.top_k),
            boundaries: chunks
                .iter()
                .map(|chunk| (chunk.document_id.clone(), chunk.end))
                .collect(),
            diversity,
        })
    }
}

#[async_trait]
impl Job for ChunkTestJob {
    fn key(&self) -> String {
        Self::key_for(self.id())
    }

    async fn run(&self, ctx: JobContext) -> Result<(), JobError> {
        let span = tracing::info_span!("chunk_test_job", test_id = self.id(), attempt = ctx.attempt());
        self.execute(&ctx).instrument(span).await
    }

    async fn fail(&self, cause: String) {
        self.runner.finalize_failure(&self.record, cause, None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_test::types::ChunkTestSource;
    use crate::datasets::{BenchmarkRegistry, BuiltinDatasets};
    use crate::embedding::HashEmbeddingClient;
    use crate::index::InMemoryIndex;
    use crate::jobs::{Scheduler, SchedulerSettings, TrackedState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const QUERY: &str = "capital of France";

    /// Hangs on one chosen call and answers every other call immediately.
    struct StallOnce {
        inner: HashEmbeddingClient,
        calls: AtomicUsize,
        query_calls: AtomicUsize,
        stall_on: usize,
    }

    #[async_trait]
    impl EmbeddingClient for StallOnce {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if texts.iter().any(|text| text == QUERY) {
                self.query_calls.fetch_add(1, Ordering::SeqCst);
            }
            if call == self.stall_on {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            self.inner.generate_embeddings(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    #[tokio::test]
    async fn reclaimed_job_reruns_without_losing_progress() {
        let dir = tempfile::tempdir().unwrap();
        let results = Arc::new(ResultStore::open(dir.path()).unwrap());
        let index = Arc::new(InMemoryIndex::new());
        let metrics = Arc::new(ServiceMetrics::new());
        let embedder = Arc::new(StallOnce {
            inner: HashEmbeddingClient::new(32),
            calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            // Queries, then fixed-size, then the sentence method stalls.
            stall_on: 3,
        });
        let runner = Arc::new(ChunkTestRunner::new(
            embedder.clone(),
            index.clone(),
            ChunkTestSettings {
                chunking: ChunkingSettings {
                    chunk_size: 120,
                    chunk_overlap: 20,
                    semantic_tokens: 30,
                    tokenizer_model: "cl100k_base".into(),
                },
                batch_size: 64,
                top_k: 5,
            },
            results.clone(),
            metrics.clone(),
        ));
        let scheduler = Scheduler::start(
            SchedulerSettings {
                pool_size: 1,
                lease_timeout: Duration::from_millis(300),
                lease_check_interval: Duration::from_millis(10),
                max_attempts: 2,
            },
            metrics.clone(),
        );

        let registry = BenchmarkRegistry::new(Arc::new(BuiltinDatasets::new().unwrap()));
        registry.refresh().await.unwrap();
        let dataset = registry.resolve("geo-101").await.unwrap();
        let queries = vec![QUERY.to_string()];
        let record = ChunkTestRecord {
            test_id: results.next_id(),
            source: ChunkTestSource::Benchmark {
                dataset_name: "geo-101".into(),
                version: None,
            },
            queries: queries.clone(),
            methods: vec![ChunkingMethod::FixedSize, ChunkingMethod::Sentence],
            created_at: now_rfc3339(),
        };
        let id = record.test_id;
        results.save_record(&record).await.unwrap();
        runner.tracker().insert(id, ChunkTestProgress::pending(id));

        let mut updates = runner.tracker().subscribe(id).unwrap();
        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while updates.changed().await.is_ok() {
                let state = updates.borrow_and_update().clone();
                seen.push((state.progress_percent, state.completed_methods.clone()));
                if state.is_terminal() {
                    break;
                }
            }
            seen
        });

        let corpus = Arc::new(Corpus::from_dataset(&dataset, &queries));
        scheduler
            .enqueue(Arc::new(ChunkTestJob::new(record, corpus, runner.clone())))
            .unwrap();
        scheduler.wait_idle().await;

        let result = results.result(id).unwrap();
        assert_eq!(result.status, ChunkTestStatus::Completed);
        assert_eq!(
            result.completed_methods,
            vec![ChunkingMethod::FixedSize, ChunkingMethod::Sentence]
        );
        assert_eq!(result.chunking_comparison.len(), 2);
        assert_eq!(metrics.snapshot().lease_reclaims, 1);
        assert_eq!(embedder.query_calls.load(Ordering::SeqCst), 1);
        assert!(index.partitions().is_empty());
        assert!(runner.tracker().snapshot(id).is_none());

        let seen = observer.await.unwrap();
        assert!(!seen.is_empty());
        for pair in seen.windows(2) {
            assert!(pair[0].0 <= pair[1].0, "percent went backwards: {seen:?}");
        }
        for (_, completed) in &seen {
            let mut unique = completed.clone();
            unique.dedup();
            assert_eq!(&unique, completed);
        }
        assert_eq!(seen.last().map(|(percent, _)| *percent), Some(100));
    }
}
