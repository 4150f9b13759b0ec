//! Embedding client abstraction, adapters, and batching helpers.
//!
//! The provider is a black box with a latency and failure contract: it turns texts into
//! fixed-length vectors or fails. Callers reach it through [`EmbeddingClient`], normally wrapped
//! in [`Retrying`] so transient failures are retried with backoff.

mod hash;
mod ollama;

pub use hash::HashEmbeddingClient;
pub use ollama::OllamaEmbeddingClient;

use crate::config::{Config, EmbeddingProvider};
use crate::metrics::ServiceMetrics;
use crate::retry::{Retryable, Retrying};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider could not be reached or reported a temporary failure.
    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),
    /// Provider did not answer within the per-call timeout.
    #[error("Embedding call timed out after {0:?}")]
    Timeout(Duration),
    /// Provider returned vectors of an unexpected size.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the index was configured for.
        expected: usize,
        /// Dimension produced by the provider.
        actual: usize,
    },
    /// Provider returned a different number of vectors than texts submitted.
    #[error("Provider returned {actual} vectors for {expected} texts")]
    CountMismatch {
        /// Number of texts submitted.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
}

impl Retryable for EmbeddingClientError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Length of every vector this client produces.
    fn dimension(&self) -> usize;
}

#[async_trait]
impl<C> EmbeddingClient for Retrying<C>
where
    C: EmbeddingClient,
{
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        self.call("generate_embeddings", || {
            self.inner.generate_embeddings(texts.clone())
        })
        .await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// Embed `texts` in provider-sized batches, reporting `(embedded, total)` after each batch.
///
/// Validates that the provider returned one vector of the expected dimension per text.
pub async fn embed_in_batches<F>(
    client: &dyn EmbeddingClient,
    texts: &[String],
    batch_size: usize,
    mut on_batch: F,
) -> Result<Vec<Vec<f32>>, EmbeddingClientError>
where
    F: FnMut(usize, usize) + Send,
{
    let total = texts.len();
    let mut vectors = Vec::with_capacity(total);
    let expected_dimension = client.dimension();

    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = client.generate_embeddings(batch.to_vec()).await?;
        if embedded.len() != batch.len() {
            return Err(EmbeddingClientError::CountMismatch {
                expected: batch.len(),
                actual: embedded.len(),
            });
        }
        if let Some(bad) = embedded.iter().find(|v| v.len() != expected_dimension) {
            return Err(EmbeddingClientError::DimensionMismatch {
                expected: expected_dimension,
                actual: bad.len(),
            });
        }
        vectors.extend(embedded);
        on_batch(vectors.len(), total);
    }

    Ok(vectors)
}

/// Build the configured embedding client wrapped in the retry decorator.
pub fn build_embedding_client(
    config: &Config,
    metrics: Arc<ServiceMetrics>,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    let policy = config.retry_policy();
    tracing::info!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Initializing embedding client"
    );
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Hash => Arc::new(
            Retrying::new(HashEmbeddingClient::new(config.embedding_dimension), policy)
                .with_metrics(metrics),
        ),
        EmbeddingProvider::Ollama => Arc::new(
            Retrying::new(
                OllamaEmbeddingClient::new(
                    &config.ollama_url,
                    &config.embedding_model,
                    config.embedding_dimension,
                )?,
                policy,
            )
            .with_metrics(metrics),
        ),
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyClient {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl EmbeddingClient for FlakyClient {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(EmbeddingClientError::Unavailable("connection reset".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_initial_backoff(Duration::from_millis(1))
            .with_max_backoff(Duration::from_millis(2))
    }

    #[tokio::test]
    async fn retrying_client_recovers_from_transient_failures() {
        let client = Retrying::new(
            FlakyClient {
                calls: AtomicUsize::new(0),
                failures: 2,
            },
            fast_policy(),
        );
        let vectors = client
            .generate_embeddings(vec!["a".into()])
            .await
            .expect("third attempt succeeds");
        assert_eq!(vectors.len(), 1);
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retrying_client_gives_up_after_max_attempts() {
        let client = Retrying::new(
            FlakyClient {
                calls: AtomicUsize::new(0),
                failures: 10,
            },
            fast_policy().with_max_attempts(3),
        );
        let error = client
            .generate_embeddings(vec!["a".into()])
            .await
            .unwrap_err();
        assert!(matches!(error, EmbeddingClientError::Unavailable(_)));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn batches_report_progress() {
        let client = HashEmbeddingClient::new(16);
        let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();
        let mut reports = Vec::new();
        let vectors = embed_in_batches(&client, &texts, 2, |done, total| {
            reports.push((done, total));
        })
        .await
        .expect("embeddings");

        assert_eq!(vectors.len(), 5);
        assert_eq!(reports, vec![(2, 5), (4, 5), (5, 5)]);
    }

    #[tokio::test]
    async fn batches_reject_wrong_dimension() {
        struct Wrong;

        #[async_trait]
        impl EmbeddingClient for Wrong {
            async fn generate_embeddings(
                &self,
                texts: Vec<String>,
            ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
                Ok(texts.iter().map(|_| vec![0.5; 3]).collect())
            }

            fn dimension(&self) -> usize {
                4
            }
        }

        let error = embed_in_batches(&Wrong, &["x".to_string()], 8, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            EmbeddingClientError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }
}
