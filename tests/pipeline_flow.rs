use std::sync::Arc;
use std::time::Duration;

use chunklab::chunk_test::{ChunkTestStatus, UserDocumentsTestRequest};
use chunklab::chunking::{ChunkingMethod, ChunkingSettings};
use chunklab::datasets::BuiltinDatasets;
use chunklab::embedding::HashEmbeddingClient;
use chunklab::index::{InMemoryIndex, VectorIndex};
use chunklab::jobs::SchedulerSettings;
use chunklab::metrics::ServiceMetrics;
use chunklab::processing::{CleanOptions, DOCUMENTS_PARTITION, Document, DocumentStatus};
use chunklab::service::{AppService, AppSettings};

const NOTES: &str = "Tides rise and fall twice a day because of the moon's gravity.\n\n\
    Ocean currents carry warm water from the equator toward the poles.\n\n\
    Coral reefs grow slowly in shallow, sunlit tropical water.";

async fn service(dir: &tempfile::TempDir) -> (AppService, Arc<InMemoryIndex>) {
    let index = Arc::new(InMemoryIndex::new());
    let service = AppService::assemble(
        Arc::new(HashEmbeddingClient::new(48)),
        index.clone(),
        Arc::new(BuiltinDatasets::new().expect("builtin datasets")),
        AppSettings {
            chunking: ChunkingSettings {
                chunk_size: 90,
                chunk_overlap: 10,
                semantic_tokens: 20,
                tokenizer_model: "cl100k_base".into(),
            },
            batch_size: 2,
            top_k: 3,
            clean: CleanOptions::default(),
            scheduler: SchedulerSettings {
                pool_size: 2,
                lease_timeout: Duration::from_secs(10),
                lease_check_interval: Duration::from_millis(100),
                max_attempts: 2,
            },
            data_dir: dir.path().to_path_buf(),
        },
        Arc::new(ServiceMetrics::new()),
    )
    .await
    .expect("service");
    (service, index)
}

/// Poll until the document is terminal, returning every observed view.
async fn poll_until_terminal(service: &AppService, id: u64) -> Vec<Document> {
    let mut seen = Vec::new();
    loop {
        let document = service.document(id).unwrap();
        let done = matches!(
            document.status,
            DocumentStatus::Completed | DocumentStatus::Failed
        );
        seen.push(document);
        if done {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn upload_runs_to_completion_with_monotonic_progress() {
    let dir = tempfile::tempdir().unwrap();
    let (service, index) = service(&dir).await;
    let document = service
        .upload_document("ocean.md", Some("paragraph"), NOTES.as_bytes().to_vec())
        .unwrap();

    let seen = poll_until_terminal(&service, document.id).await;
    for pair in seen.windows(2) {
        assert!(pair[1].processing_progress_percent >= pair[0].processing_progress_percent);
    }
    let last = seen.last().unwrap();
    assert_eq!(last.status, DocumentStatus::Completed);
    assert_eq!(last.processing_progress_percent, 100);
    assert_eq!(last.processing_progress, None);
    assert_eq!(last.chunking_method, ChunkingMethod::Paragraph);

    let indexed = index.count(DOCUMENTS_PARTITION).await.unwrap();
    assert_eq!(Some(indexed), last.chunk_count);
    assert_eq!(service.metrics().documents_completed, 1);
}

#[tokio::test]
async fn retry_reindexes_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let (service, index) = service(&dir).await;
    let id = service
        .upload_document("ocean.txt", Some("sentence"), NOTES.as_bytes().to_vec())
        .unwrap()
        .id;
    poll_until_terminal(&service, id).await;
    let first = index.count(DOCUMENTS_PARTITION).await.unwrap();

    let mut retried = None;
    for _ in 0..100 {
        match service.retry_document(id) {
            Ok(document) => {
                retried = Some(document);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    assert_eq!(retried.expect("retry accepted").attempt, 2);
    let last = poll_until_terminal(&service, id).await.pop().unwrap();
    assert_eq!(last.status, DocumentStatus::Completed);
    assert_eq!(index.count(DOCUMENTS_PARTITION).await.unwrap(), first);
}

#[tokio::test]
async fn unsupported_upload_fails_with_a_cause() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = service(&dir).await;
    let id = service
        .upload_document("scan.pdf", None, b"%PDF-1.7 binary".to_vec())
        .unwrap()
        .id;
    let last = poll_until_terminal(&service, id).await.pop().unwrap();
    assert_eq!(last.status, DocumentStatus::Failed);
    assert!(last.error_message.is_some());
    assert_eq!(service.metrics().documents_failed, 1);
}

#[tokio::test]
async fn uploaded_documents_feed_user_document_chunk_tests() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = service(&dir).await;
    let id = service
        .upload_document("ocean.md", None, NOTES.as_bytes().to_vec())
        .unwrap()
        .id;

    let accepted = service
        .chunk_tests()
        .submit_user_documents(UserDocumentsTestRequest {
            document_ids: vec![id],
            queries: vec!["why do tides happen".into(), "where do reefs grow".into()],
            modes: Some(vec!["paragraph".into(), "recursive".into()]),
        })
        .await
        .unwrap();
    let result = service
        .chunk_tests()
        .wait_for_result(accepted.test_id)
        .await
        .unwrap();

    assert_eq!(result.status, ChunkTestStatus::Completed);
    assert_eq!(result.dataset_name, None);
    assert_eq!(result.document_ids, Some(vec![id]));
    for retrieval in result.retrieval_comparison.values() {
        assert_eq!(retrieval.per_query.len(), 2);
        assert_eq!(retrieval.evaluated_queries, 0);
    }
}
