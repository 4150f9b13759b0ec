//! Submission, polling and lifecycle operations behind the chunk-test endpoints.

use std::sync::Arc;

use crate::chunk_test::ChunkTestError;
use crate::chunk_test::corpus::{Corpus, CorpusDocument};
use crate::chunk_test::orchestrator::{ChunkTestJob, ChunkTestRunner};
use crate::chunk_test::types::{
    BenchmarkTestRequest, ChunkTestOverview, ChunkTestProgress, ChunkTestRecord, ChunkTestResult,
    ChunkTestSource, ChunkTestStage, UserDocumentsTestRequest,
};
use crate::chunking::parse_methods;
use crate::datasets::{Benchmark, BenchmarkRegistry, TestQueries};
use crate::jobs::Scheduler;
use crate::processing::{DocumentPipeline, PipelineError};
use crate::timestamp::now_rfc3339;

/// Submission, polling and lifecycle of chunk tests.
pub struct ChunkTestService {
    runner: Arc<ChunkTestRunner>,
    registry: Arc<BenchmarkRegistry>,
    documents: Arc<DocumentPipeline>,
    scheduler: Scheduler,
}

impl ChunkTestService {
    /// Wire the service over shared components.
    pub fn new(
        runner: Arc<ChunkTestRunner>,
        registry: Arc<BenchmarkRegistry>,
        documents: Arc<DocumentPipeline>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            runner,
            registry,
            documents,
            scheduler,
        }
    }

    /// Dataset registry backing benchmark tests.
    pub fn registry(&self) -> &Arc<BenchmarkRegistry> {
        &self.registry
    }

    /// Current benchmark catalog.
    pub fn benchmarks(&self) -> Vec<Benchmark> {
        self.registry.list()
    }

    /// Re-fetch the benchmark catalog.
    pub async fn refresh_benchmarks(&self) -> Result<Vec<Benchmark>, ChunkTestError> {
        Ok(self.registry.refresh().await?)
    }

    /// Canned queries for a dataset or `mixed`.
    pub async fn test_queries(
        &self,
        dataset_name: Option<&str>,
        count: usize,
    ) -> Result<TestQueries, ChunkTestError> {
        Ok(self.registry.test_queries(dataset_name, count).await?)
    }

    /// Validate and enqueue a test over uploaded documents.
    pub async fn submit_user_documents(
        &self,
        request: UserDocumentsTestRequest,
    ) -> Result<ChunkTestProgress, ChunkTestError> {
        let mut document_ids: Vec<u64> = Vec::with_capacity(request.document_ids.len());
        for id in request.document_ids {
            if !document_ids.contains(&id) {
                document_ids.push(id);
            }
        }
        if document_ids.is_empty() {
            return Err(ChunkTestError::NoDocuments);
        }
        let queries = normalize_queries(request.queries)?;
        let methods = parse_methods(request.modes.as_deref().unwrap_or_default())?;

        let mut documents = Vec::with_capacity(document_ids.len());
        for id in &document_ids {
            let text = self.documents.corpus_text(*id).map_err(|error| match error {
                PipelineError::UnknownDocument(id) => ChunkTestError::UnknownDocument(id),
                other => ChunkTestError::UnusableDocument {
                    id: *id,
                    reason: other.to_string(),
                },
            })?;
            documents.push(CorpusDocument {
                id: id.to_string(),
                text,
            });
        }

        let source = ChunkTestSource::Documents { document_ids };
        self.launch(source, queries, methods, Corpus::new(documents))
            .await
    }

    /// Validate and enqueue a test over a benchmark dataset.
    ///
    /// The dataset snapshot is resolved here; the job keeps it even if the catalog is refreshed
    /// while it runs.
    pub async fn submit_benchmark(
        &self,
        request: BenchmarkTestRequest,
    ) -> Result<ChunkTestProgress, ChunkTestError> {
        let methods = parse_methods(request.modes.as_deref().unwrap_or_default())?;
        let dataset = self.registry.resolve(request.dataset_name.trim()).await?;
        let queries = match request.queries {
            Some(queries) if queries.iter().any(|query| !query.trim().is_empty()) => queries,
            _ => dataset
                .queries
                .iter()
                .map(|query| query.query.clone())
                .collect(),
        };
        let queries = normalize_queries(queries)?;

        let corpus = Corpus::from_dataset(&dataset, &queries);
        let source = ChunkTestSource::Benchmark {
            dataset_name: dataset.info.name.clone(),
            version: dataset.info.version.clone(),
        };
        self.launch(source, queries, methods, corpus).await
    }

    async fn launch(
        &self,
        source: ChunkTestSource,
        queries: Vec<String>,
        methods: Vec<crate::chunking::ChunkingMethod>,
        corpus: Corpus,
    ) -> Result<ChunkTestProgress, ChunkTestError> {
        let results = self.runner.results();
        let record = ChunkTestRecord {
            test_id: results.next_id(),
            source,
            queries,
            methods,
            created_at: now_rfc3339(),
        };
        let id = record.test_id;
        results.save_record(&record).await?;
        let progress = ChunkTestProgress::pending(id);
        self.runner.tracker().insert(id, progress.clone());

        let job = ChunkTestJob::new(record.clone(), Arc::new(corpus), self.runner.clone());
        if let Err(error) = self.scheduler.enqueue(Arc::new(job)) {
            self.runner
                .finalize_failure(&record, error.to_string(), None)
                .await;
            return Err(error.into());
        }
        tracing::info!(
            test_id = id,
            methods = record.methods.len(),
            queries = record.queries.len(),
            dataset = ?record.source.dataset_name(),
            "Chunk test accepted"
        );
        Ok(progress)
    }

    /// Live progress, or the terminal snapshot recorded in the result.
    pub fn progress(&self, id: u64) -> Result<ChunkTestProgress, ChunkTestError> {
        if let Some(progress) = self.runner.tracker().snapshot(id) {
            return Ok(progress);
        }
        self.runner
            .results()
            .result(id)
            .map(|result| ChunkTestProgress {
                test_id: id,
                status: result.status,
                current_method: None,
                current_stage: result.current_stage,
                progress_percent: result.progress_percent,
                completed_methods: result.completed_methods.clone(),
                error_message: result.error_message.clone(),
                updated_at: result.created_at.clone(),
            })
            .ok_or(ChunkTestError::UnknownTest(id))
    }

    /// Stored result; only available once the job is terminal.
    pub fn result(&self, id: u64) -> Result<Arc<ChunkTestResult>, ChunkTestError> {
        if let Some(result) = self.runner.results().result(id) {
            return Ok(result);
        }
        if self.runner.tracker().snapshot(id).is_some() || self.runner.results().record(id).is_some()
        {
            return Err(ChunkTestError::NotReady(id));
        }
        Err(ChunkTestError::UnknownTest(id))
    }

    /// Block until the job is terminal and return its result.
    pub async fn wait_for_result(&self, id: u64) -> Result<Arc<ChunkTestResult>, ChunkTestError> {
        if self.runner.tracker().wait_terminal(id).await.is_none()
            && self.runner.results().result(id).is_none()
        {
            return Err(ChunkTestError::UnknownTest(id));
        }
        self.result(id)
    }

    /// Newest-first summaries of stored results.
    pub fn list_results(&self, dataset_name: Option<&str>, limit: usize) -> Vec<ChunkTestOverview> {
        self.runner.results().list(dataset_name, limit)
    }

    /// Request cooperative cancellation. The job ends `failed` with cause `cancelled`.
    pub async fn cancel(&self, id: u64) -> Result<ChunkTestProgress, ChunkTestError> {
        let Some(progress) = self.runner.tracker().snapshot(id) else {
            return match self.runner.results().result(id) {
                Some(_) => Err(ChunkTestError::AlreadyFinished(id)),
                None => Err(ChunkTestError::UnknownTest(id)),
            };
        };
        if progress.status.is_terminal() {
            return Err(ChunkTestError::AlreadyFinished(id));
        }
        if !self.scheduler.cancel(&ChunkTestJob::key_for(id))
            && let Some(record) = self.runner.results().record(id)
        {
            self.runner
                .finalize_failure(&record, "cancelled".to_string(), None)
                .await;
        }
        tracing::info!(test_id = id, "Chunk test cancellation requested");
        self.progress(id)
    }

    /// Fail every non-terminal job as interrupted, persisting a result for each.
    ///
    /// Called on graceful shutdown; workers still running see their updates rejected.
    pub async fn interrupt_active(&self) -> usize {
        let mut interrupted = 0;
        for (id, state) in self.runner.tracker().snapshots() {
            if state.status.is_terminal() {
                continue;
            }
            self.scheduler.cancel(&ChunkTestJob::key_for(id));
            if let Some(record) = self.runner.results().record(id) {
                self.runner
                    .finalize_failure(
                        &record,
                        "Interrupted by shutdown".to_string(),
                        Some(ChunkTestStage::Interrupted),
                    )
                    .await;
                interrupted += 1;
            }
        }
        if interrupted > 0 {
            tracing::warn!(count = interrupted, "Interrupted running chunk tests");
        }
        interrupted
    }

    /// Fail persisted jobs whose worker died with a previous process.
    pub async fn recover(&self) -> usize {
        let orphans = self.runner.results().orphaned_records();
        for record in &orphans {
            self.runner
                .finalize_failure(
                    record,
                    "Interrupted: the service restarted before the test finished".to_string(),
                    Some(ChunkTestStage::Interrupted),
                )
                .await;
        }
        if !orphans.is_empty() {
            tracing::warn!(count = orphans.len(), "Recovered interrupted chunk tests");
        }
        orphans.len()
    }
}

fn normalize_queries(queries: Vec<String>) -> Result<Vec<String>, ChunkTestError> {
    let queries: Vec<String> = queries
        .into_iter()
        .map(|query| query.trim().to_string())
        .filter(|query| !query.is_empty())
        .collect();
    if queries.is_empty() {
        return Err(ChunkTestError::NoQueries);
    }
    Ok(queries)
}
