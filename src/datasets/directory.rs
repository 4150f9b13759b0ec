use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{Benchmark, BenchmarkDataset, DatasetError, DatasetSource};

/// Dataset JSON files found under a local directory (recursively).
pub struct DirectoryDatasets {
    root: PathBuf,
}

impl DirectoryDatasets {
    /// Source reading `*.json` files below `root`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn scan(root: &Path) -> Result<Vec<BenchmarkDataset>, DatasetError> {
        if !root.exists() {
            tracing::warn!(path = %root.display(), "Dataset directory does not exist");
            return Ok(Vec::new());
        }
        let mut datasets = Vec::new();
        for entry in WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| {
                e.file_type().is_file() && e.path().extension().is_some_and(|ext| ext == "json")
            })
        {
            let path = entry.path();
            let raw = fs::read_to_string(path).map_err(|error| DatasetError::Io {
                path: path.display().to_string(),
                message: error.to_string(),
            })?;
            datasets.push(BenchmarkDataset::from_json(&path.display().to_string(), &raw)?);
        }
        Ok(datasets)
    }

    async fn scan_blocking(&self) -> Result<Vec<BenchmarkDataset>, DatasetError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::scan(&root))
            .await
            .map_err(|error| DatasetError::Io {
                path: self.root.display().to_string(),
                message: error.to_string(),
            })?
    }
}

#[async_trait]
impl DatasetSource for DirectoryDatasets {
    fn label(&self) -> &str {
        "directory"
    }

    async fn catalog(&self) -> Result<Vec<Benchmark>, DatasetError> {
        Ok(self
            .scan_blocking()
            .await?
            .into_iter()
            .map(|dataset| dataset.info)
            .collect())
    }

    async fn load(&self, name: &str) -> Result<Option<BenchmarkDataset>, DatasetError> {
        Ok(self
            .scan_blocking()
            .await?
            .into_iter()
            .find(|dataset| dataset.info.name == name))
    }
}
