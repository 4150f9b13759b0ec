//! Benchmark dataset registry: named, versioned corpora with canned queries and ground truth.
//!
//! Datasets come from layered [`DatasetSource`]s (embedded samples, a local directory, a remote
//! catalog). The [`BenchmarkRegistry`] holds the current catalog and hands out immutable
//! snapshots so a refresh never changes a corpus a running job already resolved.

mod builtin;
mod directory;
mod http;
mod layered;
mod registry;

pub use builtin::BuiltinDatasets;
pub use directory::DirectoryDatasets;
pub use http::HttpDatasets;
pub use layered::LayeredDatasets;
pub use registry::{BenchmarkRegistry, MAX_TEST_QUERIES, MIXED_DATASET, TestQueries};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;

/// Errors raised while listing or loading datasets.
///
/// Cloneable so one failed fetch can be shared by every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DatasetError {
    /// No dataset with this name is in the catalog.
    #[error("Unknown dataset '{0}'")]
    UnknownDataset(String),
    /// The dataset exists but has no documents.
    #[error("Dataset '{0}' has no documents")]
    EmptyCorpus(String),
    /// A remote source could not be reached or answered with an error.
    #[error("Failed to fetch datasets from {source_name}: {message}")]
    Fetch {
        /// Source label.
        source_name: String,
        /// Transport or status description.
        message: String,
    },
    /// A dataset file could not be read.
    #[error("Failed to read {path}: {message}")]
    Io {
        /// Offending path.
        path: String,
        /// OS error description.
        message: String,
    },
    /// A dataset document is not valid JSON for the expected shape.
    #[error("Invalid dataset JSON in {origin}: {message}")]
    Parse {
        /// File, URL or embedded name.
        origin: String,
        /// Parser message.
        message: String,
    },
}

/// Catalog entry describing one benchmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Benchmark {
    /// Unique dataset name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Provenance of the corpus.
    #[serde(default)]
    pub source: String,
    /// Dataset version; snapshots are cached per version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// RFC3339 time of the last upstream change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// One corpus document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDocument {
    /// Identifier unique within the dataset.
    pub id: String,
    /// Optional title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Plain text content.
    pub text: String,
}

/// Ground-truth span supporting a query's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Document containing the span.
    pub document_id: String,
    /// Verbatim span text.
    pub text: String,
}

/// Canned query with optional ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetQuery {
    /// Query text.
    pub query: String,
    /// Reference answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Spans that answer the query.
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

/// Full dataset: catalog entry plus corpus and queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkDataset {
    /// Catalog metadata.
    #[serde(flatten)]
    pub info: Benchmark,
    /// Corpus documents.
    #[serde(default)]
    pub documents: Vec<DatasetDocument>,
    /// Canned queries.
    #[serde(default)]
    pub queries: Vec<DatasetQuery>,
}

impl BenchmarkDataset {
    /// Parse a dataset document, labelling errors with `origin`.
    pub fn from_json(origin: &str, raw: &str) -> Result<Self, DatasetError> {
        serde_json::from_str(raw).map_err(|error| DatasetError::Parse {
            origin: origin.to_string(),
            message: error.to_string(),
        })
    }

    /// Ground truth for a query text, if the dataset has it.
    pub fn evidence_for(&self, query: &str) -> Option<&[Evidence]> {
        self.queries
            .iter()
            .find(|candidate| candidate.query == query)
            .map(|candidate| candidate.evidence.as_slice())
            .filter(|evidence| !evidence.is_empty())
    }
}

/// Provider of benchmark catalogs and corpora.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Label used in logs and errors.
    fn label(&self) -> &str;

    /// Metadata for every dataset this source offers.
    async fn catalog(&self) -> Result<Vec<Benchmark>, DatasetError>;

    /// Load a dataset by name; `Ok(None)` when this source does not have it.
    async fn load(&self, name: &str) -> Result<Option<BenchmarkDataset>, DatasetError>;
}

/// Build the layered source described by the configuration.
///
/// Built-in samples form the base layer; a local directory and a remote catalog override
/// entries with the same name, in that order.
pub fn build_dataset_source(config: &Config) -> Result<Arc<dyn DatasetSource>, DatasetError> {
    let mut layers: Vec<Arc<dyn DatasetSource>> = vec![Arc::new(BuiltinDatasets::new()?)];
    if let Some(dir) = &config.datasets_dir {
        tracing::info!(path = %dir.display(), "Layering local dataset directory");
        layers.push(Arc::new(DirectoryDatasets::new(dir.clone())));
    }
    if let Some(url) = &config.dataset_source_url {
        tracing::info!(url = %url, "Layering remote dataset catalog");
        layers.push(Arc::new(HttpDatasets::new(url)?));
    }
    Ok(Arc::new(LayeredDatasets::new(layers)))
}
