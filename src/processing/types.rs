//! Core data types and error definitions for the document pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunking::{ChunkingError, ChunkingMethod};
use crate::embedding::EmbeddingClientError;
use crate::index::IndexError;
use crate::jobs::TrackedState;
use crate::processing::extract::ExtractionError;
use crate::timestamp::now_rfc3339;

/// Lifecycle status of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Waiting for a worker.
    Queued,
    /// A worker is running the pipeline.
    Processing,
    /// Every stage succeeded.
    Completed,
    /// A stage failed; see `error_message`.
    Failed,
}

/// Pipeline stages reported while a document is processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStage {
    /// Accepted by a worker, no work done yet.
    Queued,
    /// Raw bytes to plain text.
    Extracting,
    /// Whitespace, encoding and boilerplate normalization.
    Cleaning,
    /// Splitting into chunks.
    Chunking,
    /// Embedding provider calls.
    Embedding,
    /// Vector index writes.
    Indexing,
}

/// Percent at which each stage starts, followed by the percent at which it ends.
///
/// Work-weighted: embedding dominates wall time for real providers.
pub const STAGE_WEIGHTS: [(ProcessingStage, u8, u8); 6] = [
    (ProcessingStage::Queued, 0, 0),
    (ProcessingStage::Extracting, 0, 10),
    (ProcessingStage::Cleaning, 10, 20),
    (ProcessingStage::Chunking, 20, 30),
    (ProcessingStage::Embedding, 30, 75),
    (ProcessingStage::Indexing, 75, 95),
];

impl ProcessingStage {
    /// Wire name of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Queued => "queued",
            ProcessingStage::Extracting => "extracting",
            ProcessingStage::Cleaning => "cleaning",
            ProcessingStage::Chunking => "chunking",
            ProcessingStage::Embedding => "embedding",
            ProcessingStage::Indexing => "indexing",
        }
    }

    /// `(start, end)` percent of the stage.
    pub fn percent_range(&self) -> (u8, u8) {
        STAGE_WEIGHTS
            .iter()
            .find(|(stage, _, _)| stage == self)
            .map(|(_, start, end)| (*start, *end))
            .unwrap_or((0, 0))
    }

    /// Percent reached after `fraction` of this stage's work.
    pub fn percent_at(&self, fraction: f64) -> u8 {
        let (start, end) = self.percent_range();
        let span = f64::from(end - start) * fraction.clamp(0.0, 1.0);
        start + span.floor() as u8
    }
}

/// Live state of one document, stored in the progress tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentProgress {
    /// Lifecycle status.
    pub status: DocumentStatus,
    /// Current stage; present only while processing.
    pub stage: Option<ProcessingStage>,
    /// Overall percent complete.
    pub percent: u8,
    /// Last stage that finished successfully during the current run.
    pub last_successful_stage: Option<ProcessingStage>,
    /// Cause of the failure, if any.
    pub error_message: Option<String>,
    /// Non-fatal problems recorded during the run.
    pub warnings: Vec<String>,
    /// Number of chunks indexed by the last successful run.
    pub chunk_count: Option<usize>,
    /// Runs started for this document, including retries.
    pub attempt: u32,
    /// RFC3339 time of the last change.
    pub updated_at: String,
}

impl TrackedState for DocumentProgress {
    fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            DocumentStatus::Completed | DocumentStatus::Failed
        )
    }
}

impl DocumentProgress {
    /// Fresh state for a document waiting in the queue.
    pub fn queued(attempt: u32) -> Self {
        Self {
            status: DocumentStatus::Queued,
            stage: None,
            percent: 0,
            last_successful_stage: None,
            error_message: None,
            warnings: Vec::new(),
            chunk_count: None,
            attempt,
            updated_at: now_rfc3339(),
        }
    }

    /// Move into `stage`, finishing the previous one.
    pub fn enter(&mut self, stage: ProcessingStage) {
        if let Some(previous) = self.stage
            && previous != ProcessingStage::Queued
        {
            self.last_successful_stage = Some(previous);
        }
        self.status = DocumentStatus::Processing;
        self.stage = Some(stage);
        self.raise_percent(stage.percent_at(0.0));
    }

    /// Record intra-stage progress for the current stage.
    pub fn advance(&mut self, fraction: f64) {
        if let Some(stage) = self.stage {
            self.raise_percent(stage.percent_at(fraction));
        }
    }

    /// Finalize as completed.
    pub fn complete(&mut self, chunk_count: usize) {
        if let Some(stage) = self.stage.take() {
            self.last_successful_stage = Some(stage);
        }
        self.status = DocumentStatus::Completed;
        self.chunk_count = Some(chunk_count);
        self.error_message = None;
        self.raise_percent(100);
    }

    /// Finalize as failed, preserving the percent reached.
    pub fn fail(&mut self, cause: impl Into<String>) {
        self.stage = None;
        self.status = DocumentStatus::Failed;
        self.error_message = Some(cause.into());
        self.updated_at = now_rfc3339();
    }

    fn raise_percent(&mut self, percent: u8) {
        self.percent = self.percent.max(percent.min(100));
        self.updated_at = now_rfc3339();
    }
}

/// Document view returned to API consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Sequential document id.
    pub id: u64,
    /// Name supplied at upload.
    pub file_name: String,
    /// Chunking method configured for the document.
    pub chunking_method: ChunkingMethod,
    /// Size of the uploaded content in bytes.
    pub size_bytes: usize,
    /// Lifecycle status.
    pub status: DocumentStatus,
    /// Current stage; `null` unless `status` is `processing`.
    pub processing_progress: Option<ProcessingStage>,
    /// Overall percent complete.
    pub processing_progress_percent: u8,
    /// Last stage that finished successfully.
    pub last_successful_stage: Option<ProcessingStage>,
    /// Failure cause, when failed.
    pub error_message: Option<String>,
    /// Non-fatal warnings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Chunks indexed by the last successful run.
    pub chunk_count: Option<usize>,
    /// Runs started, including retries.
    pub attempt: u32,
    /// RFC3339 upload time.
    pub created_at: String,
    /// RFC3339 time of the last change.
    pub updated_at: String,
}

/// Errors that stop a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The upload could not be turned into text.
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    /// The chunking strategy rejected the text or its settings.
    #[error("Chunking failed: {0}")]
    Chunking(#[from] ChunkingError),
    /// Chunking produced nothing to index.
    #[error("Chunking produced no chunks")]
    NoChunks,
    /// Embedding provider failed after retries.
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Vector index failed after retries.
    #[error("Indexing failed: {0}")]
    Index(#[from] IndexError),
    /// The document vanished from the store.
    #[error("Document {0} not found")]
    UnknownDocument(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_table_is_contiguous_and_increasing() {
        let mut previous_end = 0;
        for (_, start, end) in STAGE_WEIGHTS {
            assert_eq!(start, previous_end);
            assert!(end >= start);
            previous_end = end;
        }
        assert!(previous_end < 100);
    }

    #[test]
    fn embedding_progress_interpolates_by_fraction() {
        assert_eq!(ProcessingStage::Embedding.percent_at(0.0), 30);
        assert_eq!(ProcessingStage::Embedding.percent_at(0.5), 52);
        assert_eq!(ProcessingStage::Embedding.percent_at(1.0), 75);
        assert_eq!(ProcessingStage::Embedding.percent_at(3.0), 75);
    }

    #[test]
    fn percent_never_decreases() {
        let mut progress = DocumentProgress::queued(1);
        progress.enter(ProcessingStage::Embedding);
        progress.advance(0.8);
        let high = progress.percent;
        progress.advance(0.1);
        assert_eq!(progress.percent, high);
        progress.fail("provider down");
        assert_eq!(progress.percent, high);
        assert_eq!(progress.stage, None);
    }

    #[test]
    fn last_successful_stage_trails_current_stage() {
        let mut progress = DocumentProgress::queued(1);
        progress.enter(ProcessingStage::Extracting);
        assert_eq!(progress.last_successful_stage, None);
        progress.enter(ProcessingStage::Cleaning);
        assert_eq!(
            progress.last_successful_stage,
            Some(ProcessingStage::Extracting)
        );
        progress.complete(3);
        assert_eq!(progress.last_successful_stage, Some(ProcessingStage::Cleaning));
        assert_eq!(progress.percent, 100);
        assert!(progress.is_terminal());
    }
}
