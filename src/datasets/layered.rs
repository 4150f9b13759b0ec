use async_trait::async_trait;
use std::sync::Arc;

use super::{Benchmark, BenchmarkDataset, DatasetError, DatasetSource};

/// Stack of sources where later layers override earlier ones by dataset name.
pub struct LayeredDatasets {
    layers: Vec<Arc<dyn DatasetSource>>,
}

impl LayeredDatasets {
    /// Layers ordered from base to top.
    pub fn new(layers: Vec<Arc<dyn DatasetSource>>) -> Self {
        Self { layers }
    }
}

#[async_trait]
impl DatasetSource for LayeredDatasets {
    fn label(&self) -> &str {
        "layered"
    }

    async fn catalog(&self) -> Result<Vec<Benchmark>, DatasetError> {
        let mut merged: Vec<Benchmark> = Vec::new();
        for layer in &self.layers {
            for benchmark in layer.catalog().await? {
                match merged.iter_mut().find(|entry| entry.name == benchmark.name) {
                    Some(entry) => {
                        tracing::debug!(
                            dataset = %benchmark.name,
                            layer = layer.label(),
                            "Dataset overridden by higher layer"
                        );
                        *entry = benchmark;
                    }
                    None => merged.push(benchmark),
                }
            }
        }
        Ok(merged)
    }

    async fn load(&self, name: &str) -> Result<Option<BenchmarkDataset>, DatasetError> {
        for layer in self.layers.iter().rev() {
            if let Some(dataset) = layer.load(name).await? {
                return Ok(Some(dataset));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::BuiltinDatasets;

    struct Override;

    #[async_trait]
    impl DatasetSource for Override {
        fn label(&self) -> &str {
            "override"
        }

        async fn catalog(&self) -> Result<Vec<Benchmark>, DatasetError> {
            Ok(vec![Benchmark {
                name: "geo-101".into(),
                description: "patched".into(),
                source: "test".into(),
                version: Some("9".into()),
                updated_at: None,
            }])
        }

        async fn load(&self, name: &str) -> Result<Option<BenchmarkDataset>, DatasetError> {
            Ok((name == "geo-101").then(|| BenchmarkDataset {
                info: Benchmark {
                    name: "geo-101".into(),
                    description: "patched".into(),
                    source: "test".into(),
                    version: Some("9".into()),
                    updated_at: None,
                },
                documents: Vec::new(),
                queries: Vec::new(),
            }))
        }
    }

    #[tokio::test]
    async fn higher_layers_override_by_name_and_keep_order() {
        let layered = LayeredDatasets::new(vec![
            Arc::new(BuiltinDatasets::new().unwrap()),
            Arc::new(Override),
        ]);
        let catalog = layered.catalog().await.unwrap();
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog[0].name, "geo-101");
        assert_eq!(catalog[0].version.as_deref(), Some("9"));

        let geo = layered.load("geo-101").await.unwrap().unwrap();
        assert_eq!(geo.info.description, "patched");
        let finance = layered.load("FinanceBench").await.unwrap().unwrap();
        assert!(!finance.documents.is_empty());
    }
}
