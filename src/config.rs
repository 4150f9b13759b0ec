use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::chunking::ChunkingSettings;
use crate::jobs::SchedulerSettings;
use crate::retry::RetryPolicy;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the chunklab server and CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Directory holding durable job records and results.
    pub data_dir: PathBuf,
    /// Backend used to store and search chunk vectors.
    pub vector_backend: VectorBackend,
    /// Base URL of the Qdrant instance (required for the `qdrant` backend).
    pub qdrant_url: Option<String>,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Prefix applied to every Qdrant collection created for a partition.
    pub qdrant_collection_prefix: String,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Number of texts sent to the provider per call.
    pub embedding_batch_size: usize,
    /// Timeout applied to each provider or index call, in milliseconds.
    pub provider_timeout_ms: u64,
    /// Attempts made for a transient provider failure before giving up.
    pub provider_max_attempts: u32,
    /// Initial backoff between provider attempts, in milliseconds.
    pub provider_backoff_ms: u64,
    /// Maximum number of jobs executing at the same time.
    pub worker_pool_size: usize,
    /// Seconds a worker may go without renewing its lease.
    pub lease_timeout_secs: u64,
    /// Total attempts a job gets when its worker crashes or stalls.
    pub job_max_attempts: u32,
    /// Character budget used by size-bounded chunking methods.
    pub chunk_size: usize,
    /// Character overlap between adjacent fixed-size chunks.
    pub chunk_overlap: usize,
    /// Token budget used by the semantic chunker.
    pub semantic_chunk_tokens: usize,
    /// Number of hits retrieved per query during chunk tests.
    pub retrieval_top_k: usize,
    /// Optional directory of dataset JSON files layered over the built-ins.
    pub datasets_dir: Option<PathBuf>,
    /// Optional base URL of a remote dataset catalog.
    pub dataset_source_url: Option<String>,
    /// Strip URLs and e-mail addresses while cleaning documents.
    pub clean_remove_urls: bool,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic local feature-hashing encoder.
    Hash,
    /// Local Ollama runtime.
    Ollama,
}

/// Supported vector index backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// Process-local cosine index.
    Memory,
    /// Remote Qdrant instance.
    Qdrant,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vector_backend = parse_or("VECTOR_BACKEND", VectorBackend::Memory)?;
        let qdrant_url = load_env_optional("QDRANT_URL");
        if vector_backend == VectorBackend::Qdrant && qdrant_url.is_none() {
            return Err(ConfigError::MissingVariable("QDRANT_URL".to_string()));
        }

        let config = Self {
            server_port: parse_optional("SERVER_PORT")?,
            data_dir: load_env_optional("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            vector_backend,
            qdrant_url,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            qdrant_collection_prefix: load_env_optional("QDRANT_COLLECTION_PREFIX")
                .unwrap_or_else(|| "chunklab".to_string()),
            embedding_provider: parse_or("EMBEDDING_PROVIDER", EmbeddingProvider::Hash)?,
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "nomic-embed-text".to_string()),
            embedding_dimension: parse_or("EMBEDDING_DIMENSION", 384)?,
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            embedding_batch_size: parse_or("EMBEDDING_BATCH_SIZE", 32)?,
            provider_timeout_ms: parse_or("PROVIDER_TIMEOUT_MS", 30_000)?,
            provider_max_attempts: parse_or("PROVIDER_MAX_ATTEMPTS", 3)?,
            provider_backoff_ms: parse_or("PROVIDER_BACKOFF_MS", 200)?,
            worker_pool_size: parse_or("WORKER_POOL_SIZE", 4)?,
            lease_timeout_secs: parse_or("LEASE_TIMEOUT_SECS", 120)?,
            job_max_attempts: parse_or("JOB_MAX_ATTEMPTS", 2)?,
            chunk_size: parse_or("CHUNK_SIZE", 800)?,
            chunk_overlap: parse_or("CHUNK_OVERLAP", 80)?,
            semantic_chunk_tokens: parse_or("SEMANTIC_CHUNK_TOKENS", 200)?,
            retrieval_top_k: parse_or("RETRIEVAL_TOP_K", 10)?,
            datasets_dir: load_env_optional("DATASETS_DIR").map(PathBuf::from),
            dataset_source_url: load_env_optional("DATASET_SOURCE_URL"),
            clean_remove_urls: parse_or("CLEAN_REMOVE_URLS", false)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }
        if self.embedding_batch_size == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_BATCH_SIZE".into()));
        }
        if self.worker_pool_size == 0 {
            return Err(ConfigError::InvalidValue("WORKER_POOL_SIZE".into()));
        }
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidValue("CHUNK_OVERLAP".into()));
        }
        if self.retrieval_top_k == 0 {
            return Err(ConfigError::InvalidValue("RETRIEVAL_TOP_K".into()));
        }
        Ok(())
    }

    /// Chunking parameters shared by the pipeline and the chunk-test orchestrator.
    pub fn chunking_settings(&self) -> ChunkingSettings {
        ChunkingSettings {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            semantic_tokens: self.semantic_chunk_tokens,
            tokenizer_model: self.embedding_model.clone(),
        }
    }

    /// Retry policy applied to every embedding and index call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.provider_max_attempts)
            .with_initial_backoff(Duration::from_millis(self.provider_backoff_ms))
            .with_call_timeout(Duration::from_millis(self.provider_timeout_ms))
    }

    /// Worker pool and lease parameters for the job scheduler.
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        let lease_timeout = Duration::from_secs(self.lease_timeout_secs.max(1));
        SchedulerSettings {
            pool_size: self.worker_pool_size,
            lease_timeout,
            lease_check_interval: lease_timeout / 4,
            max_attempts: self.job_max_attempts.max(1),
        }
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    Ok(parse_optional(key)?.unwrap_or(default))
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

impl FromStr for VectorBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "qdrant" => Ok(Self::Qdrant),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        data_dir = %config.data_dir.display(),
        vector_backend = ?config.vector_backend,
        embedding_provider = ?config.embedding_provider,
        worker_pool_size = config.worker_pool_size,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
