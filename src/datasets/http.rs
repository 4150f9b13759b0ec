use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{Benchmark, BenchmarkDataset, DatasetError, DatasetSource};

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    benchmarks: Vec<Benchmark>,
}

/// Remote catalog served as static JSON.
///
/// Expects `GET {base}/catalog.json` to return `{"benchmarks": [...]}` and
/// `GET {base}/datasets/{name}.json` to return a full dataset.
pub struct HttpDatasets {
    client: Client,
    base_url: String,
}

impl HttpDatasets {
    /// Source rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, DatasetError> {
        let client = Client::builder()
            .user_agent("chunklab/0.1")
            .build()
            .map_err(|error| DatasetError::Fetch {
                source_name: base_url.to_string(),
                message: error.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn fetch_error(&self, message: impl ToString) -> DatasetError {
        DatasetError::Fetch {
            source_name: self.base_url.clone(),
            message: message.to_string(),
        }
    }

    async fn get_text(&self, path: &str) -> Result<Option<String>, DatasetError> {
        let url = format!("{}/{path}", self.base_url);
        tracing::debug!(url = %url, "Fetching dataset resource");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|error| self.fetch_error(error))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.fetch_error(format!("GET {path} returned {}", response.status())));
        }
        response
            .text()
            .await
            .map(Some)
            .map_err(|error| self.fetch_error(error))
    }
}

#[async_trait]
impl DatasetSource for HttpDatasets {
    fn label(&self) -> &str {
        &self.base_url
    }

    async fn catalog(&self) -> Result<Vec<Benchmark>, DatasetError> {
        let raw = self
            .get_text("catalog.json")
            .await?
            .ok_or_else(|| self.fetch_error("catalog.json not found"))?;
        let catalog: CatalogResponse =
            serde_json::from_str(&raw).map_err(|error| DatasetError::Parse {
                origin: format!("{}/catalog.json", self.base_url),
                message: error.to_string(),
            })?;
        Ok(catalog.benchmarks)
    }

    async fn load(&self, name: &str) -> Result<Option<BenchmarkDataset>, DatasetError> {
        let path = format!("datasets/{name}.json");
        match self.get_text(&path).await? {
            Some(raw) => {
                BenchmarkDataset::from_json(&format!("{}/{path}", self.base_url), &raw).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn catalog_and_dataset_are_fetched() {
        let server = MockServer::start_async().await;
        let catalog = server
            .mock_async(|when, then| {
                when.method(GET).path("/catalog.json");
                then.status(200).json_body(json!({
                    "benchmarks": [
                        { "name": "remote-qa", "description": "remote", "source": "cdn", "version": "3" }
                    ]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/datasets/remote-qa.json");
                then.status(200).json_body(json!({
                    "name": "remote-qa",
                    "version": "3",
                    "documents": [{ "id": "r1", "text": "Remote corpus text." }],
                    "queries": []
                }));
            })
            .await;

        let source = HttpDatasets::new(&format!("{}/", server.base_url())).unwrap();
        let benchmarks = source.catalog().await.unwrap();
        catalog.assert_async().await;
        assert_eq!(benchmarks[0].name, "remote-qa");

        let dataset = source.load("remote-qa").await.unwrap().unwrap();
        assert_eq!(dataset.documents[0].id, "r1");
    }

    #[tokio::test]
    async fn missing_dataset_is_none_and_errors_are_fetch_failures() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/datasets/absent.json");
                then.status(404);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/catalog.json");
                then.status(503);
            })
            .await;

        let source = HttpDatasets::new(&server.base_url()).unwrap();
        assert!(source.load("absent").await.unwrap().is_none());
        assert!(matches!(
            source.catalog().await,
            Err(DatasetError::Fetch { .. })
        ));
    }
}
