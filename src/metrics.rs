use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and benchmark activity.
#[derive(Default)]
pub struct ServiceMetrics {
    documents_completed: AtomicU64,
    documents_failed: AtomicU64,
    chunks_indexed: AtomicU64,
    chunk_tests_completed: AtomicU64,
    chunk_tests_failed: AtomicU64,
    lease_reclaims: AtomicU64,
    provider_retries: AtomicU64,
}

impl ServiceMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document that finished indexing with the given chunk count.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_completed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a document whose pipeline run failed.
    pub fn record_document_failure(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chunk-test job reaching a terminal status.
    pub fn record_chunk_test(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.chunk_tests_completed
        } else {
            &self.chunk_tests_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job reclaimed after its worker lease expired.
    pub fn record_lease_reclaim(&self) {
        self.lease_reclaims.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retried provider or index call.
    pub fn record_provider_retry(&self) {
        self.provider_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_completed: self.documents_completed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            chunk_tests_completed: self.chunk_tests_completed.load(Ordering::Relaxed),
            chunk_tests_failed: self.chunk_tests_failed.load(Ordering::Relaxed),
            lease_reclaims: self.lease_reclaims.load(Ordering::Relaxed),
            provider_retries: self.provider_retries.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of service counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    /// Documents that reached `completed` since startup.
    pub documents_completed: u64,
    /// Documents that reached `failed` since startup.
    pub documents_failed: u64,
    /// Chunks written to the index by the ingestion pipeline.
    pub chunks_indexed: u64,
    /// Chunk-test jobs that completed.
    pub chunk_tests_completed: u64,
    /// Chunk-test jobs that failed.
    pub chunk_tests_failed: u64,
    /// Jobs reclaimed from stalled or crashed workers.
    pub lease_reclaims: u64,
    /// Provider or index calls that were retried after a transient error.
    pub provider_retries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_documents_and_chunks() {
        let metrics = ServiceMetrics::new();
        metrics.record_document(2);
        metrics.record_document(3);
        metrics.record_document_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_completed, 2);
        assert_eq!(snapshot.documents_failed, 1);
        assert_eq!(snapshot.chunks_indexed, 5);
    }

    #[test]
    fn chunk_test_outcomes_use_separate_counters() {
        let metrics = ServiceMetrics::new();
        metrics.record_chunk_test(true);
        metrics.record_chunk_test(false);
        metrics.record_chunk_test(false);
        metrics.record_lease_reclaim();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.chunk_tests_completed, 1);
        assert_eq!(snapshot.chunk_tests_failed, 2);
        assert_eq!(snapshot.lease_reclaims, 1);
        assert_eq!(snapshot.provider_retries, 0);
    }
}
