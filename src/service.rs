//! Application service shared by the HTTP surface and the `chunk-bench` CLI.
//!
//! [`AppService`] owns the long-lived components (embedder, vector index, dataset registry,
//! result store, scheduler) and exposes document ingestion plus the chunk-test operations.
//! Construct it once near process start and share it through an `Arc`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::chunk_test::{ChunkTestError, ChunkTestRunner, ChunkTestService, ChunkTestSettings};
use crate::chunking::{ChunkingError, ChunkingMethod, ChunkingSettings};
use crate::config::Config;
use crate::datasets::{BenchmarkRegistry, DatasetError, DatasetSource, build_dataset_source};
use crate::embedding::{EmbeddingClient, EmbeddingClientError, build_embedding_client};
use crate::index::{IndexError, VectorIndex, build_vector_index};
use crate::jobs::{Scheduler, SchedulerError, SchedulerSettings};
use crate::metrics::{MetricsSnapshot, ServiceMetrics};
use crate::processing::{
    CleanOptions, Document, DocumentJob, DocumentPipeline, DocumentProgress, DocumentStatus,
    DocumentStore, PipelineSettings,
};
use crate::store::{ResultStore, StoreError};

/// Method applied to uploads that do not name one.
pub const DEFAULT_DOCUMENT_METHOD: ChunkingMethod = ChunkingMethod::Semantic;

/// Errors surfaced to API and CLI callers.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Chunk-test operation failed.
    #[error(transparent)]
    ChunkTest(#[from] ChunkTestError),
    /// Request was malformed.
    #[error("{0}")]
    InvalidRequest(String),
    /// Unknown chunking method on upload.
    #[error(transparent)]
    Method(#[from] ChunkingError),
    /// No document with this id.
    #[error("Unknown document {0}")]
    UnknownDocument(u64),
    /// Document is queued or processing and cannot be retried yet.
    #[error("Document {0} is still queued or processing")]
    DocumentBusy(u64),
    /// Scheduler refused the job.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// Embedding provider could not be initialized.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Vector index could not be initialized.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Dataset sources could not be initialized.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// Result store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Component parameters derived from [`Config`].
#[derive(Debug, Clone)]
pub struct AppSettings {
    /// Chunk size parameters.
    pub chunking: ChunkingSettings,
    /// Texts per embedding call and points per upsert.
    pub batch_size: usize,
    /// Hits retrieved per chunk-test query.
    pub top_k: usize,
    /// Cleaning rules for uploads.
    pub clean: CleanOptions,
    /// Worker pool and lease parameters.
    pub scheduler: SchedulerSettings,
    /// Root of durable chunk-test state.
    pub data_dir: PathBuf,
}

impl AppSettings {
    /// Derive settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking_settings(),
            batch_size: config.embedding_batch_size,
            top_k: config.retrieval_top_k,
            clean: CleanOptions {
                remove_urls: config.clean_remove_urls,
            },
            scheduler: config.scheduler_settings(),
            data_dir: config.data_dir.clone(),
        }
    }
}

/// Long-lived components behind every surface.
pub struct AppService {
    documents: Arc<DocumentPipeline>,
    chunk_tests: ChunkTestService,
    scheduler: Scheduler,
    metrics: Arc<ServiceMetrics>,
    retry_lock: Mutex<()>,
}

impl AppService {
    /// Build every component from configuration.
    pub async fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let metrics = Arc::new(ServiceMetrics::new());
        let embedder = build_embedding_client(config, metrics.clone())?;
        let index = build_vector_index(config, metrics.clone())?;
        let datasets = build_dataset_source(config)?;
        Self::assemble(
            embedder,
            index,
            datasets,
            AppSettings::from_config(config),
            metrics,
        )
        .await
    }

    /// Wire components together, load the benchmark catalog and fail orphaned chunk tests.
    ///
    /// A catalog that cannot be fetched at startup leaves the registry empty until the next
    /// refresh.
    pub async fn assemble(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        datasets: Arc<dyn DatasetSource>,
        settings: AppSettings,
        metrics: Arc<ServiceMetrics>,
    ) -> Result<Self, ServiceError> {
        let results = Arc::new(ResultStore::open(&settings.data_dir)?);
        let registry = Arc::new(BenchmarkRegistry::new(datasets));
        if let Err(error) = registry.refresh().await {
            tracing::warn!(error = %error, "Benchmark catalog unavailable at startup");
        }

        let documents = Arc::new(DocumentPipeline::new(
            Arc::new(DocumentStore::new()),
            embedder.clone(),
            index.clone(),
            PipelineSettings {
                chunking: settings.chunking.clone(),
                batch_size: settings.batch_size,
                clean: settings.clean,
            },
            metrics.clone(),
        ));
        let runner = Arc::new(ChunkTestRunner::new(
            embedder,
            index,
            ChunkTestSettings {
                chunking: settings.chunking,
                batch_size: settings.batch_size,
                top_k: settings.top_k,
            },
            results,
            metrics.clone(),
        ));
        let scheduler = Scheduler::start(settings.scheduler, metrics.clone());
        let chunk_tests =
            ChunkTestService::new(runner, registry, documents.clone(), scheduler.clone());
        chunk_tests.recover().await;

        Ok(Self {
            documents,
            chunk_tests,
            scheduler,
            metrics,
            retry_lock: Mutex::new(()),
        })
    }

    /// Chunk-test operations.
    pub fn chunk_tests(&self) -> &ChunkTestService {
        &self.chunk_tests
    }

    /// Register an upload and queue it for processing.
    pub fn upload_document(
        &self,
        file_name: &str,
        method: Option<&str>,
        content: Vec<u8>,
    ) -> Result<Document, ServiceError> {
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(ServiceError::InvalidRequest("file_name is required".into()));
        }
        if content.is_empty() {
            return Err(ServiceError::InvalidRequest("Upload body is empty".into()));
        }
        let method = match method.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => name.parse()?,
            None => DEFAULT_DOCUMENT_METHOD,
        };
        let id = self.documents.store().insert(file_name, method, content);
        if let Err(error) = self
            .scheduler
            .enqueue(Arc::new(DocumentJob::new(id, self.documents.clone())))
        {
            self.documents.store().remove(id);
            return Err(error.into());
        }
        tracing::info!(document_id = id, file_name, method = %method, "Document accepted");
        self.document(id)
    }

    /// Current view of a document.
    pub fn document(&self, id: u64) -> Result<Document, ServiceError> {
        self.documents
            .store()
            .view(id)
            .ok_or(ServiceError::UnknownDocument(id))
    }

    /// Re-run the pipeline for a `failed` or `completed` document.
    ///
    /// A document whose previous job has not yet been released by the scheduler is still busy.
    /// The status only turns `queued` once the new job is accepted.
    pub fn retry_document(&self, id: u64) -> Result<Document, ServiceError> {
        let _guard = self.retry_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.document(id)?;
        if !matches!(
            current.status,
            DocumentStatus::Failed | DocumentStatus::Completed
        ) || self.scheduler.is_active(&DocumentJob::key_for(id))
        {
            return Err(ServiceError::DocumentBusy(id));
        }
        let progress = self.documents.store().progress();
        let previous = progress
            .snapshot(id)
            .ok_or(ServiceError::UnknownDocument(id))?;
        progress
            .reset(id, DocumentProgress::queued(current.attempt + 1))
            .map_err(|_| ServiceError::UnknownDocument(id))?;
        if let Err(error) = self
            .scheduler
            .enqueue(Arc::new(DocumentJob::new(id, self.documents.clone())))
        {
            let _ = progress.reset(id, previous);
            return Err(error.into());
        }
        tracing::info!(document_id = id, attempt = current.attempt + 1, "Document retry queued");
        self.document(id)
    }

    /// Current counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Fail running chunk tests as interrupted and cancel remaining document jobs.
    pub async fn shutdown(&self) {
        let interrupted = self.chunk_tests.interrupt_active().await;
        let cancelled = self.scheduler.cancel_all();
        tracing::info!(interrupted, cancelled, "Service shut down");
    }
}
