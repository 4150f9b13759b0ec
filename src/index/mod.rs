//! Vector index adapters.
//!
//! A [`VectorIndex`] stores chunk vectors in named partitions and answers top-k similarity
//! queries. Partitions isolate callers from one another: the ingestion pipeline writes to a
//! shared partition while each chunk-test method gets its own throwaway partition. Points are
//! keyed by deterministic chunk ids, so upserting the same chunks again overwrites in place.

mod memory;
pub mod qdrant;

pub use memory::InMemoryIndex;
pub use qdrant::{QdrantError, QdrantIndex, QdrantService};

use crate::chunking::{Chunk, ChunkingMethod};
use crate::config::{Config, VectorBackend};
use crate::metrics::ServiceMetrics;
use crate::retry::{Retryable, Retrying};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by vector index adapters.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The Qdrant backend failed.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// The backend did not answer within the per-call timeout.
    #[error("Index call timed out after {0:?}")]
    Timeout(Duration),
    /// A vector does not match the partition's dimension.
    #[error("Vector dimension mismatch in partition '{partition}': expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Partition receiving the vector.
        partition: String,
        /// Dimension already stored in the partition.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
}

impl Retryable for IndexError {
    fn is_transient(&self) -> bool {
        match self {
            IndexError::Qdrant(error) => error.is_transient(),
            IndexError::Timeout(_) => true,
            IndexError::DimensionMismatch { .. } => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        IndexError::Timeout(after)
    }
}

/// Metadata stored alongside each chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Parent document identifier.
    pub document_id: String,
    /// Method that produced the chunk.
    pub method: ChunkingMethod,
    /// Position of the chunk within its document.
    pub ordinal: usize,
    /// Byte offset where the chunk starts.
    pub start: usize,
    /// Byte offset one past the chunk end.
    pub end: usize,
    /// Chunk text.
    pub text: String,
}

impl From<&Chunk> for ChunkPayload {
    fn from(chunk: &Chunk) -> Self {
        Self {
            document_id: chunk.document_id.clone(),
            method: chunk.method,
            ordinal: chunk.ordinal,
            start: chunk.start,
            end: chunk.end,
            text: chunk.text.clone(),
        }
    }
}

/// A vector ready to be written to a partition.
#[derive(Debug, Clone)]
pub struct IndexPoint {
    /// Deterministic chunk identifier.
    pub id: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Chunk metadata.
    pub payload: ChunkPayload,
}

impl IndexPoint {
    /// Pair a chunk with its embedding.
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.id.clone(),
            vector,
            payload: ChunkPayload::from(chunk),
        }
    }
}

/// Scored result of a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    /// Identifier of the matched point.
    pub id: String,
    /// Cosine similarity reported by the backend.
    pub score: f32,
    /// Stored payload, when available.
    pub payload: Option<ChunkPayload>,
}

/// Counters describing an upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSummary {
    /// Points written by the request.
    pub upserted: usize,
}

/// Similarity-search backend shared by every worker.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite points in `partition`, creating it when missing.
    async fn upsert(
        &self,
        partition: &str,
        points: Vec<IndexPoint>,
    ) -> Result<IndexSummary, IndexError>;

    /// Return the `limit` nearest points to `vector`, best first. Missing partitions are empty.
    async fn query(
        &self,
        partition: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError>;

    /// Number of points stored in `partition`.
    async fn count(&self, partition: &str) -> Result<usize, IndexError>;

    /// Remove `partition` and every point in it. Dropping a missing partition succeeds.
    async fn drop_partition(&self, partition: &str) -> Result<(), IndexError>;
}

#[async_trait]
impl<I> VectorIndex for Retrying<I>
where
    I: VectorIndex,
{
    async fn upsert(
        &self,
        partition: &str,
        points: Vec<IndexPoint>,
    ) -> Result<IndexSummary, IndexError> {
        self.call("index_upsert", || self.inner.upsert(partition, points.clone()))
            .await
    }

    async fn query(
        &self,
        partition: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        self.call("index_query", || self.inner.query(partition, vector, limit))
            .await
    }

    async fn count(&self, partition: &str) -> Result<usize, IndexError> {
        self.call("index_count", || self.inner.count(partition)).await
    }

    async fn drop_partition(&self, partition: &str) -> Result<(), IndexError> {
        self.call("index_drop_partition", || self.inner.drop_partition(partition))
            .await
    }
}

/// Build the configured vector index wrapped in the retry decorator.
pub fn build_vector_index(
    config: &Config,
    metrics: Arc<ServiceMetrics>,
) -> Result<Arc<dyn VectorIndex>, IndexError> {
    let policy = config.retry_policy();
    let index: Arc<dyn VectorIndex> = match config.vector_backend {
        VectorBackend::Memory => {
            tracing::info!("Using in-memory vector index");
            Arc::new(Retrying::new(InMemoryIndex::new(), policy).with_metrics(metrics))
        }
        VectorBackend::Qdrant => {
            let url = config
                .qdrant_url
                .as_deref()
                .ok_or_else(|| QdrantError::InvalidUrl("QDRANT_URL is not set".into()))?;
            let service = QdrantService::new(url, config.qdrant_api_key.clone())?;
            tracing::info!(url, prefix = %config.qdrant_collection_prefix, "Using Qdrant vector index");
            Arc::new(
                Retrying::new(
                    QdrantIndex::new(service, &config.qdrant_collection_prefix),
                    policy,
                )
                .with_metrics(metrics),
            )
        }
    };
    Ok(index)
}
