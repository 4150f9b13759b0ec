use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::chunking::ChunkingMethod;
use crate::jobs::ProgressTracker;
use crate::processing::types::{Document, DocumentProgress};
use crate::timestamp::now_rfc3339;

/// Immutable upload plus the text derived from it.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    /// Sequential document id.
    pub id: u64,
    /// Name supplied at upload.
    pub file_name: String,
    /// Chunking method configured for the document.
    pub method: ChunkingMethod,
    /// Raw uploaded bytes.
    pub content: Arc<[u8]>,
    /// Cleaned text from the most recent successful clean stage.
    pub cleaned_text: Option<Arc<str>>,
    /// RFC3339 upload time.
    pub created_at: String,
}

/// In-process registry of uploaded documents and their live pipeline state.
pub struct DocumentStore {
    records: RwLock<HashMap<u64, DocumentRecord>>,
    progress: ProgressTracker<DocumentProgress>,
    next_id: AtomicU64,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            progress: ProgressTracker::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl DocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an upload in the `queued` state and return its id.
    pub fn insert(&self, file_name: &str, method: ChunkingMethod, content: Vec<u8>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = DocumentRecord {
            id,
            file_name: file_name.to_string(),
            method,
            content: Arc::from(content),
            cleaned_text: None,
            created_at: now_rfc3339(),
        };
        self.progress.insert(id, DocumentProgress::queued(1));
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, record);
        id
    }

    /// Upload record for `id`.
    pub fn record(&self, id: u64) -> Option<DocumentRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Forget a document whose job could not be queued.
    pub fn remove(&self, id: u64) -> Option<DocumentRecord> {
        self.progress.remove(id);
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Whether a document with this id was uploaded.
    pub fn contains(&self, id: u64) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Remember the cleaned text so later chunk tests skip extraction.
    pub fn set_cleaned_text(&self, id: u64, text: Arc<str>) {
        if let Some(record) = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&id)
        {
            record.cleaned_text = Some(text);
        }
    }

    /// Live pipeline state per document.
    pub fn progress(&self) -> &ProgressTracker<DocumentProgress> {
        &self.progress
    }

    /// API view combining the record and its live state.
    pub fn view(&self, id: u64) -> Option<Document> {
        let record = self.record(id)?;
        let progress = self.progress.snapshot(id)?;
        Some(Document {
            id,
            file_name: record.file_name,
            chunking_method: record.method,
            size_bytes: record.content.len(),
            status: progress.status,
            processing_progress: progress.stage,
            processing_progress_percent: progress.percent,
            last_successful_stage: progress.last_successful_stage,
            error_message: progress.error_message,
            warnings: progress.warnings,
            chunk_count: progress.chunk_count,
            attempt: progress.attempt,
            created_at: record.created_at,
            updated_at: progress.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::types::{DocumentStatus, ProcessingStage};

    #[test]
    fn ids_are_sequential_and_views_start_queued() {
        let store = DocumentStore::new();
        let first = store.insert("a.txt", ChunkingMethod::Sentence, b"alpha".to_vec());
        let second = store.insert("b.txt", ChunkingMethod::FixedSize, b"beta".to_vec());
        assert_eq!((first, second), (1, 2));

        let view = store.view(first).unwrap();
        assert_eq!(view.status, DocumentStatus::Queued);
        assert_eq!(view.processing_progress, None);
        assert_eq!(view.size_bytes, 5);
        assert!(store.view(99).is_none());
    }

    #[test]
    fn removed_documents_disappear_with_their_progress() {
        let store = DocumentStore::new();
        let id = store.insert("a.txt", ChunkingMethod::Sentence, b"alpha".to_vec());
        assert_eq!(store.remove(id).map(|record| record.file_name), Some("a.txt".to_string()));
        assert!(!store.contains(id));
        assert!(store.view(id).is_none());
        assert!(store.progress().snapshot(id).is_none());
        assert!(store.remove(id).is_none());
    }

    #[test]
    fn view_reflects_tracker_updates() {
        let store = DocumentStore::new();
        let id = store.insert("a.txt", ChunkingMethod::Paragraph, b"alpha".to_vec());
        store
            .progress()
            .update(id, |state| state.enter(ProcessingStage::Chunking))
            .unwrap();
        let view = store.view(id).unwrap();
        assert_eq!(view.status, DocumentStatus::Processing);
        assert_eq!(view.processing_progress, Some(ProcessingStage::Chunking));
        assert_eq!(view.processing_progress_percent, 20);
    }
}
