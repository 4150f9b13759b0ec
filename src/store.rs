//! Durable chunk-test job records and results.
//!
//! Each job is two JSON files under `DATA_DIR/chunk_tests/`: `{id}.job.json`, written at
//! submission, and `{id}.result.json`, written once when the job becomes terminal. Writes go
//! to a temporary file that is renamed into place so readers never see a partial document.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

use crate::chunk_test::{ChunkTestOverview, ChunkTestRecord, ChunkTestResult};

const RECORD_SUFFIX: &str = ".job.json";
const RESULT_SUFFIX: &str = ".result.json";

/// Errors raised by the result store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A result for this job was already written.
    #[error("Result for chunk test {0} already exists")]
    AlreadyExists(u64),
    /// Filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A stored document could not be encoded or decoded.
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File-backed store of chunk-test records and write-once results, fronted by an in-memory
/// cache.
pub struct ResultStore {
    root: PathBuf,
    records: RwLock<BTreeMap<u64, ChunkTestRecord>>,
    results: RwLock<BTreeMap<u64, Arc<ChunkTestResult>>>,
    reserved: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
}

impl ResultStore {
    /// Open (creating if needed) the store under `data_dir/chunk_tests` and load what is there.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let root = data_dir.join("chunk_tests");
        std::fs::create_dir_all(&root).map_err(|error| StoreError::io(&root, error))?;

        let mut records = BTreeMap::new();
        let mut results = BTreeMap::new();
        let entries = std::fs::read_dir(&root).map_err(|error| StoreError::io(&root, error))?;
        for entry in entries {
            let path = entry.map_err(|error| StoreError::io(&root, error))?.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if let Some(id) = parse_id(name, RECORD_SUFFIX) {
                records.insert(id, read_json::<ChunkTestRecord>(&path)?);
            } else if let Some(id) = parse_id(name, RESULT_SUFFIX) {
                results.insert(id, Arc::new(read_json::<ChunkTestResult>(&path)?));
            }
        }

        let highest = records
            .keys()
            .chain(results.keys())
            .copied()
            .max()
            .unwrap_or(0);
        tracing::info!(
            path = %root.display(),
            records = records.len(),
            results = results.len(),
            "Opened chunk-test store"
        );
        Ok(Self {
            root,
            records: RwLock::new(records),
            results: RwLock::new(results),
            reserved: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(highest + 1),
        })
    }

    /// Allocate the next job id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Persist a job record (overwrites any previous record for the id).
    pub async fn save_record(&self, record: &ChunkTestRecord) -> Result<(), StoreError> {
        let path = self.root.join(format!("{}{RECORD_SUFFIX}", record.test_id));
        write_json(&path, record).await?;
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.test_id, record.clone());
        Ok(())
    }

    /// Persist a result. Fails with [`StoreError::AlreadyExists`] when one was already written.
    pub async fn save_result(
        &self,
        result: ChunkTestResult,
    ) -> Result<Arc<ChunkTestResult>, StoreError> {
        let id = result.test_id;
        let _reservation = self.reserve(id)?;

        let path = self.root.join(format!("{id}{RESULT_SUFFIX}"));
        write_json(&path, &result).await?;
        let stored = Arc::new(result);
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, stored.clone());
        Ok(stored)
    }

    fn reserve(&self, id: u64) -> Result<Reservation<'_>, StoreError> {
        let results = self.results.read().unwrap_or_else(PoisonError::into_inner);
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        if results.contains_key(&id) || !reserved.insert(id) {
            return Err(StoreError::AlreadyExists(id));
        }
        Ok(Reservation {
            reserved: &self.reserved,
            id,
        })
    }

    /// Stored record for a job.
    pub fn record(&self, id: u64) -> Option<ChunkTestRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Stored result for a job.
    pub fn result(&self, id: u64) -> Option<Arc<ChunkTestResult>> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Newest-first result summaries, optionally filtered by dataset (case-insensitive).
    pub fn list(&self, dataset_name: Option<&str>, limit: usize) -> Vec<ChunkTestOverview> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .rev()
            .filter(|result| match dataset_name {
                Some(wanted) => result
                    .dataset_name
                    .as_deref()
                    .is_some_and(|name| name.eq_ignore_ascii_case(wanted)),
                None => true,
            })
            .take(limit)
            .map(|result| result.overview())
            .collect()
    }

    /// Records that never received a result.
    pub fn orphaned_records(&self) -> Vec<ChunkTestRecord> {
        let results = self.results.read().unwrap_or_else(PoisonError::into_inner);
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|record| !results.contains_key(&record.test_id))
            .cloned()
            .collect()
    }
}

/// Exclusive claim on writing one result; released on drop, including when the write is
/// abandoned mid-flight.
struct Reservation<'a> {
    reserved: &'a Mutex<HashSet<u64>>,
    id: u64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

fn parse_id(file_name: &str, suffix: &str) -> Option<u64> {
    file_name.strip_suffix(suffix)?.parse().ok()
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let raw = std::fs::read(path).map_err(|error| StoreError::io(path, error))?;
    serde_json::from_slice(&raw).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let temp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&temp, &data)
        .await
        .map_err(|error| StoreError::io(&temp, error))?;
    tokio::fs::rename(&temp, path)
        .await
        .map_err(|error| StoreError::io(path, error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_test::{ChunkTestProgress, ChunkTestSource};
    use crate::chunking::ChunkingMethod;

    fn record(test_id: u64, dataset: &str) -> ChunkTestRecord {
        ChunkTestRecord {
            test_id,
            source: ChunkTestSource::Benchmark {
                dataset_name: dataset.into(),
                version: Some("1.0.0".into()),
            },
            queries: vec!["capital of France".into()],
            methods: vec![ChunkingMethod::FixedSize],
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn result(test_id: u64, dataset: &str) -> ChunkTestResult {
        let mut progress = ChunkTestProgress::pending(test_id);
        progress.fail("cancelled", None);
        ChunkTestResult::failed(&record(test_id, dataset), &progress)
    }

    #[tokio::test]
    async fn results_are_write_once_and_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        assert_eq!(store.next_id(), 1);
        store.save_record(&record(1, "geo-101")).await.unwrap();
        store.save_result(result(1, "geo-101")).await.unwrap();
        assert!(matches!(
            store.save_result(result(1, "geo-101")).await,
            Err(StoreError::AlreadyExists(1))
        ));

        let reopened = ResultStore::open(dir.path()).unwrap();
        assert_eq!(reopened.result(1).unwrap().dataset_name.as_deref(), Some("geo-101"));
        assert_eq!(reopened.record(1).unwrap().queries.len(), 1);
        assert_eq!(reopened.next_id(), 2);
        let leftovers = std::fs::read_dir(dir.path().join("chunk_tests"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn abandoned_write_releases_its_reservation() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ResultStore::open(dir.path()).unwrap());

        let writer = store.clone();
        let handle = tokio::spawn(async move { writer.save_result(result(1, "geo-101")).await });
        tokio::task::yield_now().await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(store.result(1).is_none());

        store.save_result(result(1, "geo-101")).await.unwrap();
        assert!(store.result(1).is_some());
        assert!(ResultStore::open(dir.path()).unwrap().result(1).is_some());
    }

    #[tokio::test]
    async fn orphaned_records_lack_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        store.save_record(&record(1, "geo-101")).await.unwrap();
        store.save_record(&record(2, "geo-101")).await.unwrap();
        store.save_result(result(1, "geo-101")).await.unwrap();

        let orphans: Vec<u64> = store
            .orphaned_records()
            .into_iter()
            .map(|record| record.test_id)
            .collect();
        assert_eq!(orphans, vec![2]);
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        for (id, dataset) in [(1, "geo-101"), (2, "FRAMES"), (3, "geo-101")] {
            store.save_result(result(id, dataset)).await.unwrap();
        }
        let ids: Vec<u64> = store.list(None, 20).iter().map(|row| row.test_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        let geo: Vec<u64> = store
            .list(Some("GEO-101"), 1)
            .iter()
            .map(|row| row.test_id)
            .collect();
        assert_eq!(geo, vec![3]);
    }

    #[test]
    fn malformed_files_fail_to_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("chunk_tests")).unwrap();
        std::fs::write(dir.path().join("chunk_tests/4.result.json"), "{").unwrap();
        assert!(matches!(
            ResultStore::open(dir.path()),
            Err(StoreError::Json { .. })
        ));
    }
}
