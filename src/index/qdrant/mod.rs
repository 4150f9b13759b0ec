//! Qdrant-backed [`VectorIndex`]: one collection per partition.

mod client;
mod types;

pub use client::QdrantService;
pub use types::{QdrantError, ScoredPoint};

use super::{ChunkPayload, IndexError, IndexHit, IndexPoint, IndexSummary, VectorIndex};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Vector index storing each partition in its own Qdrant collection.
pub struct QdrantIndex {
    service: QdrantService,
    prefix: String,
    ensured: Mutex<HashSet<String>>,
}

impl QdrantIndex {
    /// Wrap a Qdrant client; collections are named `{prefix}-{partition}`.
    pub fn new(service: QdrantService, prefix: &str) -> Self {
        Self {
            service,
            prefix: prefix.trim_end_matches('-').to_string(),
            ensured: Mutex::new(HashSet::new()),
        }
    }

    fn collection_name(&self, partition: &str) -> String {
        if self.prefix.is_empty() {
            partition.to_string()
        } else {
            format!("{}-{partition}", self.prefix)
        }
    }

    fn is_ensured(&self, collection: &str) -> bool {
        self.ensured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(collection)
    }

    fn set_ensured(&self, collection: &str, present: bool) {
        let mut guard = self.ensured.lock().unwrap_or_else(PoisonError::into_inner);
        if present {
            guard.insert(collection.to_string());
        } else {
            guard.remove(collection);
        }
    }
}

fn serialize_point(point: IndexPoint) -> Value {
    json!({
        "id": point.id,
        "vector": point.vector,
        "payload": point.payload,
    })
}

fn to_hit(point: ScoredPoint) -> IndexHit {
    let payload = point
        .payload
        .and_then(|map| serde_json::from_value::<ChunkPayload>(Value::Object(map)).ok());
    IndexHit {
        id: point.id,
        score: point.score,
        payload,
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(
        &self,
        partition: &str,
        points: Vec<IndexPoint>,
    ) -> Result<IndexSummary, IndexError> {
        let Some(first) = points.first() else {
            return Ok(IndexSummary::default());
        };
        let collection = self.collection_name(partition);
        if !self.is_ensured(&collection) {
            self.service
                .create_collection_if_not_exists(&collection, first.vector.len() as u64)
                .await?;
            self.set_ensured(&collection, true);
        }

        let serialized: Vec<Value> = points.into_iter().map(serialize_point).collect();
        let upserted = self.service.upsert_points(&collection, serialized).await?;
        Ok(IndexSummary { upserted })
    }

    async fn query(
        &self,
        partition: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        let collection = self.collection_name(partition);
        let points = self.service.search_points(&collection, vector, limit).await?;
        Ok(points.into_iter().map(to_hit).collect())
    }

    async fn count(&self, partition: &str) -> Result<usize, IndexError> {
        Ok(self
            .service
            .count_points(&self.collection_name(partition))
            .await?)
    }

    async fn drop_partition(&self, partition: &str) -> Result<(), IndexError> {
        let collection = self.collection_name(partition);
        self.service.delete_collection(&collection).await?;
        self.set_ensured(&collection, false);
        tracing::debug!(collection, "Dropped partition collection");
        Ok(())
    }
}
