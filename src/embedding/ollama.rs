use super::{EmbeddingClient, EmbeddingClientError};
use async_trait::async_trait;
use ollama_rs::Ollama;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};

const DEFAULT_OLLAMA_PORT: u16 = 11434;

/// Embedding client backed by a local Ollama runtime.
pub struct OllamaEmbeddingClient {
    client: Ollama,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddingClient {
    /// Connect to the Ollama runtime at `base_url` using `model`.
    pub fn new(base_url: &str, model: &str, dimension: usize) -> Result<Self, EmbeddingClientError> {
        let parsed = reqwest::Url::parse(base_url).map_err(|err| {
            EmbeddingClientError::GenerationFailed(format!("invalid Ollama URL '{base_url}': {err}"))
        })?;
        let host = parsed.host_str().ok_or_else(|| {
            EmbeddingClientError::GenerationFailed(format!("Ollama URL '{base_url}' has no host"))
        })?;
        let port = parsed.port_or_known_default().unwrap_or(DEFAULT_OLLAMA_PORT);
        tracing::debug!(host, port, model, "Initialized Ollama embedding client");

        Ok(Self {
            client: Ollama::new(format!("{}://{host}", parsed.scheme()), port),
            model: model.to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request =
            GenerateEmbeddingsRequest::new(self.model.clone(), EmbeddingsInput::Multiple(texts));
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|err| EmbeddingClientError::Unavailable(err.to_string()))?;
        Ok(response.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_urls_without_host() {
        assert!(OllamaEmbeddingClient::new("not a url", "nomic-embed-text", 768).is_err());
    }

    #[test]
    fn accepts_default_local_url() {
        let client = OllamaEmbeddingClient::new("http://127.0.0.1:11434", "nomic-embed-text", 768)
            .expect("client");
        assert_eq!(client.dimension(), 768);
    }
}
