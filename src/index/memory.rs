use super::{ChunkPayload, IndexError, IndexHit, IndexPoint, IndexSummary, VectorIndex};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

struct StoredPoint {
    vector: Vec<f32>,
    payload: ChunkPayload,
}

/// Process-local cosine-similarity index.
#[derive(Default)]
pub struct InMemoryIndex {
    partitions: RwLock<HashMap<String, HashMap<String, StoredPoint>>>,
}

impl InMemoryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the partitions currently holding points.
    pub fn partitions(&self) -> Vec<String> {
        let guard = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(
        &self,
        partition: &str,
        points: Vec<IndexPoint>,
    ) -> Result<IndexSummary, IndexError> {
        let mut guard = self.partitions.write().unwrap_or_else(PoisonError::into_inner);
        let stored = guard.entry(partition.to_string()).or_default();
        let expected = stored
            .values()
            .next()
            .map(|point| point.vector.len())
            .or_else(|| points.first().map(|point| point.vector.len()));

        if let Some(expected) = expected
            && let Some(bad) = points.iter().find(|point| point.vector.len() != expected)
        {
            return Err(IndexError::DimensionMismatch {
                partition: partition.to_string(),
                expected,
                actual: bad.vector.len(),
            });
        }

        let upserted = points.len();
        for point in points {
            stored.insert(
                point.id,
                StoredPoint {
                    vector: point.vector,
                    payload: point.payload,
                },
            );
        }
        Ok(IndexSummary { upserted })
    }

    async fn query(
        &self,
        partition: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        let guard = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        let Some(stored) = guard.get(partition) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<IndexHit> = stored
            .iter()
            .map(|(id, point)| IndexHit {
                id: id.clone(),
                score: cosine(vector, &point.vector),
                payload: Some(point.payload.clone()),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then_with(|| {
                let key = |hit: &IndexHit| {
                    hit.payload
                        .as_ref()
                        .map(|p| (p.document_id.clone(), p.ordinal))
                };
                key(a).cmp(&key(b))
            })
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self, partition: &str) -> Result<usize, IndexError> {
        let guard = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(partition).map_or(0, HashMap::len))
    }

    async fn drop_partition(&self, partition: &str) -> Result<(), IndexError> {
        let mut guard = self.partitions.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(partition);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingMethod;

    fn point(id: &str, document: &str, ordinal: usize, vector: Vec<f32>) -> IndexPoint {
        IndexPoint {
            id: id.to_string(),
            vector,
            payload: ChunkPayload {
                document_id: document.to_string(),
                method: ChunkingMethod::FixedSize,
                ordinal,
                start: 0,
                end: 1,
                text: format!("chunk {ordinal}"),
            },
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let index = InMemoryIndex::new();
        index
            .upsert("docs", vec![point("a", "d", 0, vec![1.0, 0.0]), point("b", "d", 1, vec![0.0, 1.0])])
            .await
            .unwrap();
        index
            .upsert("docs", vec![point("a", "d", 0, vec![1.0, 0.0]), point("b", "d", 1, vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(index.count("docs").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn query_ranks_by_cosine_and_isolates_partitions() {
        let index = InMemoryIndex::new();
        index
            .upsert("left", vec![point("a", "d", 0, vec![1.0, 0.0]), point("b", "d", 1, vec![0.6, 0.8])])
            .await
            .unwrap();
        index
            .upsert("right", vec![point("c", "d", 0, vec![1.0, 0.0])])
            .await
            .unwrap();

        let hits = index.query("left", &[1.0, 0.0], 5).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        assert!(index.query("missing", &[1.0, 0.0], 5).await.unwrap().is_empty());
        index.drop_partition("left").await.unwrap();
        assert_eq!(index.count("left").await.unwrap(), 0);
        assert_eq!(index.partitions(), vec!["right".to_string()]);
    }

    #[tokio::test]
    async fn rejects_mixed_dimensions() {
        let index = InMemoryIndex::new();
        index.upsert("p", vec![point("a", "d", 0, vec![1.0, 0.0])]).await.unwrap();
        let error = index
            .upsert("p", vec![point("b", "d", 1, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(error, IndexError::DimensionMismatch { expected: 2, actual: 3, .. }));
    }
}
