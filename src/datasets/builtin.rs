use async_trait::async_trait;

use super::{Benchmark, BenchmarkDataset, DatasetError, DatasetSource};

const EMBEDDED: &[(&str, &str)] = &[
    ("geo-101.json", include_str!("../../datasets/geo-101.json")),
    ("financebench.json", include_str!("../../datasets/financebench.json")),
    ("kg-rag.json", include_str!("../../datasets/kg-rag.json")),
    ("frames.json", include_str!("../../datasets/frames.json")),
    ("pubmedqa.json", include_str!("../../datasets/pubmedqa.json")),
];

/// Sample datasets compiled into the binary.
pub struct BuiltinDatasets {
    datasets: Vec<BenchmarkDataset>,
}

impl BuiltinDatasets {
    /// Parse the embedded samples.
    pub fn new() -> Result<Self, DatasetError> {
        let datasets = EMBEDDED
            .iter()
            .map(|(file, raw)| BenchmarkDataset::from_json(file, raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { datasets })
    }
}

#[async_trait]
impl DatasetSource for BuiltinDatasets {
    fn label(&self) -> &str {
        "builtin"
    }

    async fn catalog(&self) -> Result<Vec<Benchmark>, DatasetError> {
        Ok(self.datasets.iter().map(|dataset| dataset.info.clone()).collect())
    }

    async fn load(&self, name: &str) -> Result<Option<BenchmarkDataset>, DatasetError> {
        Ok(self
            .datasets
            .iter()
            .find(|dataset| dataset.info.name == name)
            .cloned())
    }
}
