//! Drives one document through extract, clean, chunk, embed and index.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::Instrument;

use crate::chunking::{ChunkingSettings, chunk_document, strategy_for};
use crate::embedding::{EmbeddingClient, embed_in_batches};
use crate::index::{IndexPoint, VectorIndex};
use crate::jobs::{Job, JobContext, JobError};
use crate::metrics::ServiceMetrics;
use crate::processing::clean::{CleanOptions, clean_text};
use crate::processing::extract::extract_text;
use crate::processing::store::DocumentStore;
use crate::processing::types::{DocumentProgress, PipelineError, ProcessingStage};

/// Index partition holding every ingested document.
pub const DOCUMENTS_PARTITION: &str = "documents";

/// Parameters for pipeline runs.
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    /// Chunk size parameters.
    pub chunking: ChunkingSettings,
    /// Texts per embedding call; also points per index upsert.
    pub batch_size: usize,
    /// Cleaning rules.
    pub clean: CleanOptions,
}

/// Stage runner shared by every document job.
pub struct DocumentPipeline {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    settings: PipelineSettings,
    metrics: Arc<ServiceMetrics>,
}

enum Interrupt {
    Cancelled,
    Failed(PipelineError),
}

impl From<PipelineError> for Interrupt {
    fn from(error: PipelineError) -> Self {
        Interrupt::Failed(error)
    }
}

impl From<JobError> for Interrupt {
    fn from(_: JobError) -> Self {
        Interrupt::Cancelled
    }
}

impl DocumentPipeline {
    /// Assemble a pipeline over shared components.
    pub fn new(
        store: Arc<DocumentStore>,
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        settings: PipelineSettings,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            store,
            embedder,
            index,
            settings,
            metrics,
        }
    }

    /// Document registry backing the pipeline.
    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Cleaned text of an uploaded document, extracting it on demand when the document has not
    /// been through the clean stage yet.
    pub fn corpus_text(&self, id: u64) -> Result<Arc<str>, PipelineError> {
        let record = self
            .store
            .record(id)
            .ok_or(PipelineError::UnknownDocument(id))?;
        if let Some(text) = record.cleaned_text {
            return Ok(text);
        }
        let raw = extract_text(&record.file_name, &record.content)?;
        Ok(Arc::from(clean_text(&raw, self.settings.clean).text))
    }

    async fn process(&self, id: u64, ctx: &JobContext) -> Result<usize, Interrupt> {
        ctx.checkpoint()?;
        let record = self
            .store
            .record(id)
            .ok_or(PipelineError::UnknownDocument(id))?;

        self.enter(id, ProcessingStage::Extracting);
        let raw = extract_text(&record.file_name, &record.content).map_err(PipelineError::from)?;
        ctx.checkpoint()?;

        self.enter(id, ProcessingStage::Cleaning);
        let cleaned = clean_text(&raw, self.settings.clean);
        if !cleaned.warnings.is_empty() {
            for warning in &cleaned.warnings {
                tracing::warn!(document_id = id, warning = %warning, "Cleaning degraded");
            }
            self.update(id, |state| state.warnings.extend(cleaned.warnings.clone()));
        }
        let text: Arc<str> = Arc::from(cleaned.text);
        self.store.set_cleaned_text(id, text.clone());
        ctx.checkpoint()?;

        self.enter(id, ProcessingStage::Chunking);
        let strategy =
            strategy_for(record.method, &self.settings.chunking).map_err(PipelineError::from)?;
        let chunks = chunk_document(&id.to_string(), &text, strategy.as_ref())
            .map_err(PipelineError::from)?;
        if chunks.is_empty() {
            return Err(PipelineError::NoChunks.into());
        }
        tracing::debug!(document_id = id, chunks = chunks.len(), method = %record.method, "Chunked document");
        ctx.checkpoint()?;

        self.enter(id, ProcessingStage::Embedding);
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = embed_in_batches(
            self.embedder.as_ref(),
            &texts,
            self.settings.batch_size,
            |done, total| {
                ctx.renew_lease();
                self.update(id, |state| state.advance(done as f64 / total as f64));
            },
        )
        .await
        .map_err(PipelineError::from)?;
        ctx.checkpoint()?;

        self.enter(id, ProcessingStage::Indexing);
        let points: Vec<IndexPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexPoint::from_chunk(chunk, vector))
            .collect();
        let total = points.len();
        let mut written = 0;
        for batch in points.chunks(self.settings.batch_size.max(1)) {
            self.index
                .upsert(DOCUMENTS_PARTITION, batch.to_vec())
                .await
                .map_err(PipelineError::from)?;
            written += batch.len();
            ctx.renew_lease();
            self.update(id, |state| state.advance(written as f64 / total as f64));
        }

        Ok(total)
    }

    fn enter(&self, id: u64, stage: ProcessingStage) {
        tracing::info!(document_id = id, stage = stage.as_str(), "Entering stage");
        self.update(id, |state| state.enter(stage));
    }

    fn update<F>(&self, id: u64, change: F)
    where
        F: FnOnce(&mut DocumentProgress),
    {
        if let Err(error) = self.store.progress().update(id, change) {
            tracing::debug!(document_id = id, error = %error, "Progress update ignored");
        }
    }

    fn finish(&self, id: u64, chunk_count: usize) {
        self.update(id, |state| state.complete(chunk_count));
        self.metrics.record_document(chunk_count as u64);
        tracing::info!(document_id = id, chunk_count, "Document completed");
    }

    fn mark_failed(&self, id: u64, cause: String) {
        tracing::warn!(document_id = id, cause = %cause, "Document failed");
        self.update(id, |state| state.fail(cause));
        self.metrics.record_document_failure();
    }
}

/// Scheduler job running the pipeline for one document.
pub struct DocumentJob {
    id: u64,
    pipeline: Arc<DocumentPipeline>,
}

impl DocumentJob {
    /// Job for document `id`.
    pub fn new(id: u64, pipeline: Arc<DocumentPipeline>) -> Self {
        Self { id, pipeline }
    }

    /// Scheduler key for a document.
    pub fn key_for(id: u64) -> String {
        format!("document-{id}")
    }
}

#[async_trait]
impl Job for DocumentJob {
    fn key(&self) -> String {
        Self::key_for(self.id)
    }

    async fn run(&self, ctx: JobContext) -> Result<(), JobError> {
        let span = tracing::info_span!("document_job", document_id = self.id, attempt = ctx.attempt());
        match self.pipeline.process(self.id, &ctx).instrument(span).await {
            Ok(chunk_count) => {
                self.pipeline.finish(self.id, chunk_count);
                Ok(())
            }
            Err(Interrupt::Cancelled) => Err(JobError::Cancelled),
            Err(Interrupt::Failed(error)) => Err(JobError::Failed(error.to_string())),
        }
    }

    async fn fail(&self, cause: String) {
        self.pipeline.mark_failed(self.id, cause);
    }
}
