use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::{Benchmark, BenchmarkDataset, DatasetError, DatasetSource};
use crate::jobs::SingleFlight;

/// Upper bound on canned queries returned in one request.
pub const MAX_TEST_QUERIES: usize = 20;

/// Pseudo-dataset name that samples queries from every catalog entry.
pub const MIXED_DATASET: &str = "mixed";

type SnapshotKey = (String, String);

/// Sample queries returned by [`BenchmarkRegistry::test_queries`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestQueries {
    /// Query texts.
    pub queries: Vec<String>,
    /// Number of queries returned.
    pub count: usize,
    /// Dataset the queries came from, or `mixed`.
    pub dataset: String,
    /// Usage hint for clients.
    pub note: String,
}

/// Current catalog plus immutable per-version corpus snapshots.
pub struct BenchmarkRegistry {
    source: Arc<dyn DatasetSource>,
    catalog: RwLock<Arc<Vec<Benchmark>>>,
    snapshots: Mutex<HashMap<SnapshotKey, Arc<BenchmarkDataset>>>,
    loads: SingleFlight<SnapshotKey, Result<Arc<BenchmarkDataset>, DatasetError>>,
    refreshes: SingleFlight<(), Result<Arc<Vec<Benchmark>>, DatasetError>>,
}

impl BenchmarkRegistry {
    /// Registry over `source`; the catalog is empty until the first [`refresh`](Self::refresh).
    pub fn new(source: Arc<dyn DatasetSource>) -> Self {
        Self {
            source,
            catalog: RwLock::new(Arc::new(Vec::new())),
            snapshots: Mutex::new(HashMap::new()),
            loads: SingleFlight::new(),
            refreshes: SingleFlight::new(),
        }
    }

    /// Current catalog.
    pub fn list(&self) -> Vec<Benchmark> {
        self.current().as_ref().clone()
    }

    fn current(&self) -> Arc<Vec<Benchmark>> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-fetch the catalog and swap it in atomically.
    ///
    /// Concurrent refreshes share one fetch. On failure the previous catalog stays in place.
    /// Snapshots already handed out are never modified.
    pub async fn refresh(&self) -> Result<Vec<Benchmark>, DatasetError> {
        let source = self.source.clone();
        let fetched = self
            .refreshes
            .run((), move || async move { source.catalog().await.map(Arc::new) })
            .await?;

        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = fetched.clone();
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        snapshots.retain(|(name, version), _| {
            fetched
                .iter()
                .any(|entry| &entry.name == name && version_key(entry) == *version)
        });
        tracing::info!(datasets = fetched.len(), "Benchmark catalog refreshed");
        Ok(fetched.as_ref().clone())
    }

    /// Catalog entry for `name`; exact match first, then case-insensitive.
    pub fn find(&self, name: &str) -> Option<Benchmark> {
        let catalog = self.current();
        catalog
            .iter()
            .find(|entry| entry.name == name)
            .or_else(|| {
                catalog
                    .iter()
                    .find(|entry| entry.name.eq_ignore_ascii_case(name))
            })
            .cloned()
    }

    /// Immutable snapshot of the dataset's current version, fetching it if needed.
    pub async fn resolve(&self, name: &str) -> Result<Arc<BenchmarkDataset>, DatasetError> {
        let entry = self
            .find(name)
            .ok_or_else(|| DatasetError::UnknownDataset(name.to_string()))?;
        let key = (entry.name.clone(), version_key(&entry));

        if let Some(snapshot) = self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(snapshot.clone());
        }

        let source = self.source.clone();
        let dataset_name = entry.name.clone();
        let snapshot = self
            .loads
            .run(key.clone(), move || async move {
                tracing::info!(dataset = %dataset_name, "Fetching benchmark corpus");
                let dataset = source
                    .load(&dataset_name)
                    .await?
                    .ok_or_else(|| DatasetError::UnknownDataset(dataset_name.clone()))?;
                if dataset.documents.is_empty() {
                    return Err(DatasetError::EmptyCorpus(dataset_name));
                }
                Ok(Arc::new(dataset))
            })
            .await?;

        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(snapshot)
            .clone())
    }

    /// Up to `count` canned queries (capped at [`MAX_TEST_QUERIES`]).
    ///
    /// `mixed` (or no name) interleaves queries from every dataset in catalog order.
    pub async fn test_queries(
        &self,
        dataset_name: Option<&str>,
        count: usize,
    ) -> Result<TestQueries, DatasetError> {
        let count = count.min(MAX_TEST_QUERIES);
        let dataset = dataset_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(MIXED_DATASET)
            .to_string();

        let queries = if dataset.eq_ignore_ascii_case(MIXED_DATASET) {
            let mut pools = Vec::new();
            for entry in self.current().iter() {
                let snapshot = match self.resolve(&entry.name).await {
                    Ok(snapshot) => snapshot,
                    Err(error) => {
                        tracing::warn!(dataset = %entry.name, %error, "Skipping dataset for mixed queries");
                        continue;
                    }
                };
                pools.push(
                    snapshot
                        .queries
                        .iter()
                        .map(|query| query.query.clone())
                        .collect::<Vec<_>>(),
                );
            }
            round_robin(&pools, count)
        } else {
            let snapshot = self.resolve(&dataset).await?;
            snapshot
                .queries
                .iter()
                .take(count)
                .map(|query| query.query.clone())
                .collect()
        };

        Ok(TestQueries {
            count: queries.len(),
            queries,
            dataset,
            note: "These are example queries. Metrics will be averaged across all queries."
                .to_string(),
        })
    }
}

fn version_key(entry: &Benchmark) -> String {
    entry.version.clone().unwrap_or_default()
}

fn round_robin(pools: &[Vec<String>], count: usize) -> Vec<String> {
    let mut picked = Vec::with_capacity(count);
    let longest = pools.iter().map(Vec::len).max().unwrap_or(0);
    for position in 0..longest {
        for pool in pools {
            if picked.len() == count {
                return picked;
            }
            if let Some(query) = pool.get(position) {
                picked.push(query.clone());
            }
        }
    }
    picked
}
