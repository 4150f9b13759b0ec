//! Wire and persistence types for chunk-test jobs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::chunk_test::metrics::MethodRetrieval;
use crate::chunk_test::stats::ChunkStatistics;
use crate::chunk_test::summary::{EvaluationResults, TestSummary};
use crate::chunking::ChunkingMethod;
use crate::jobs::TrackedState;
use crate::timestamp::now_rfc3339;

/// Lifecycle status of a chunk test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkTestStatus {
    /// Accepted and waiting for a worker.
    Pending,
    /// A worker is running methods.
    Processing,
    /// At least one method succeeded and the result is persisted.
    Completed,
    /// Every method failed, or the job was cancelled or interrupted.
    Failed,
}

impl ChunkTestStatus {
    /// Whether the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkTestStatus::Completed | ChunkTestStatus::Failed)
    }
}

/// Stage reported while a chunk test runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkTestStage {
    /// Resolving the corpus and embedding the queries.
    Loading,
    /// Splitting the corpus with the current method.
    Chunking,
    /// Embedding the current method's chunks.
    Embedding,
    /// Writing the method partition.
    Indexing,
    /// Running the queries against the partition.
    Retrieval,
    /// Scoring hits against ground truth.
    Evaluation,
    /// Building the cross-method summary.
    Summarizing,
    /// The worker stopped with the process.
    Interrupted,
}

/// Share of the overall percent spent running methods; summarizing takes the rest.
pub const METHODS_PERCENT: f64 = 95.0;

impl ChunkTestStage {
    /// `(start, end)` percent of a method's slice covered by this stage.
    pub fn slice_range(&self) -> (f64, f64) {
        match self {
            ChunkTestStage::Loading => (0.0, 0.0),
            ChunkTestStage::Chunking => (0.0, 15.0),
            ChunkTestStage::Embedding => (15.0, 55.0),
            ChunkTestStage::Indexing => (55.0, 70.0),
            ChunkTestStage::Retrieval => (70.0, 95.0),
            ChunkTestStage::Evaluation => (95.0, 100.0),
            ChunkTestStage::Summarizing | ChunkTestStage::Interrupted => (100.0, 100.0),
        }
    }
}

/// Position of a method within the requested list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSlot {
    /// Zero-based position.
    pub index: usize,
    /// Number of requested methods.
    pub total: usize,
}

impl MethodSlot {
    /// Overall percent after `fraction` of `stage` for this method.
    pub fn percent(&self, stage: ChunkTestStage, fraction: f64) -> u8 {
        let slice = METHODS_PERCENT / self.total.max(1) as f64;
        let (start, end) = stage.slice_range();
        let within = start + (end - start) * fraction.clamp(0.0, 1.0);
        let overall = slice * self.index as f64 + slice * within / 100.0;
        overall.floor().clamp(0.0, METHODS_PERCENT) as u8
    }
}

/// Live progress of a chunk test as returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkTestProgress {
    /// Job id.
    pub test_id: u64,
    /// Lifecycle status.
    pub status: ChunkTestStatus,
    /// Method being run, while processing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_method: Option<ChunkingMethod>,
    /// Stage being run, while processing; `interrupted` after a shutdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<ChunkTestStage>,
    /// Overall percent complete; never decreases.
    pub progress_percent: u8,
    /// Methods whose full run succeeded, in submission order.
    #[serde(default)]
    pub completed_methods: Vec<ChunkingMethod>,
    /// Failure cause once failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// RFC3339 time of the last change.
    pub updated_at: String,
}

impl TrackedState for ChunkTestProgress {
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl ChunkTestProgress {
    /// State of a freshly accepted job.
    pub fn pending(test_id: u64) -> Self {
        Self {
            test_id,
            status: ChunkTestStatus::Pending,
            current_method: None,
            current_stage: None,
            progress_percent: 0,
            completed_methods: Vec::new(),
            error_message: None,
            updated_at: now_rfc3339(),
        }
    }

    /// Enter a job-level stage (loading or summarizing).
    pub fn enter_job_stage(&mut self, stage: ChunkTestStage) {
        self.status = ChunkTestStatus::Processing;
        self.current_method = None;
        self.current_stage = Some(stage);
        if stage == ChunkTestStage::Summarizing {
            self.raise(METHODS_PERCENT as u8);
        } else {
            self.touch();
        }
    }

    /// Enter `stage` of `method`.
    pub fn enter(&mut self, method: ChunkingMethod, slot: MethodSlot, stage: ChunkTestStage) {
        self.status = ChunkTestStatus::Processing;
        self.current_method = Some(method);
        self.current_stage = Some(stage);
        self.raise(slot.percent(stage, 0.0));
    }

    /// Record intra-stage progress.
    pub fn advance(&mut self, slot: MethodSlot, fraction: f64) {
        if let Some(stage) = self.current_stage {
            self.raise(slot.percent(stage, fraction));
        }
    }

    /// Mark a method as fully finished, successful or not, moving the percent to its slice end.
    pub fn finish_method(&mut self, method: ChunkingMethod, slot: MethodSlot, succeeded: bool) {
        if succeeded && !self.completed_methods.contains(&method) {
            self.completed_methods.push(method);
        }
        self.raise(slot.percent(ChunkTestStage::Evaluation, 1.0));
    }

    /// Finalize as completed.
    pub fn complete(&mut self) {
        self.status = ChunkTestStatus::Completed;
        self.current_method = None;
        self.current_stage = None;
        self.error_message = None;
        self.raise(100);
    }

    /// Finalize as failed, keeping the percent reached and the methods that finished.
    pub fn fail(&mut self, cause: impl Into<String>, stage: Option<ChunkTestStage>) {
        self.status = ChunkTestStatus::Failed;
        self.current_method = None;
        self.current_stage = stage;
        self.error_message = Some(cause.into());
        self.touch();
    }

    fn raise(&mut self, percent: u8) {
        self.progress_percent = self.progress_percent.max(percent.min(100));
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = now_rfc3339();
    }
}

/// Corpus a chunk test runs over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkTestSource {
    /// Documents already uploaded through the ingestion pipeline.
    Documents {
        /// Document ids, in submission order.
        document_ids: Vec<u64>,
    },
    /// A named benchmark dataset.
    Benchmark {
        /// Dataset name as resolved in the catalog.
        dataset_name: String,
        /// Version of the snapshot the job runs against.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
}

impl ChunkTestSource {
    /// Dataset name for benchmark sources.
    pub fn dataset_name(&self) -> Option<&str> {
        match self {
            ChunkTestSource::Benchmark { dataset_name, .. } => Some(dataset_name),
            ChunkTestSource::Documents { .. } => None,
        }
    }

    /// Document ids for user-document sources.
    pub fn document_ids(&self) -> Option<&[u64]> {
        match self {
            ChunkTestSource::Documents { document_ids } => Some(document_ids),
            ChunkTestSource::Benchmark { .. } => None,
        }
    }
}

/// Body of `POST /chunk-test/user-documents`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UserDocumentsTestRequest {
    /// Uploaded documents to test.
    pub document_ids: Vec<u64>,
    /// Queries to run.
    #[serde(default)]
    pub queries: Vec<String>,
    /// Chunking methods to compare; defaults to every registered method.
    #[serde(default)]
    pub modes: Option<Vec<String>>,
}

/// Body of `POST /chunk-test/benchmark`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BenchmarkTestRequest {
    /// Catalog name of the dataset.
    pub dataset_name: String,
    /// Queries to run; defaults to the dataset's canned queries.
    #[serde(default)]
    pub queries: Option<Vec<String>>,
    /// Chunking methods to compare; defaults to every registered method.
    #[serde(default)]
    pub modes: Option<Vec<String>>,
}

/// Durable record of an accepted job, written at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkTestRecord {
    /// Job id.
    pub test_id: u64,
    /// Corpus under test.
    pub source: ChunkTestSource,
    /// Queries to run.
    pub queries: Vec<String>,
    /// Methods to compare, in submission order.
    pub methods: Vec<ChunkingMethod>,
    /// RFC3339 submission time.
    pub created_at: String,
}

/// Persisted outcome of a chunk test. Written exactly once, when the job becomes terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkTestResult {
    /// Job id.
    pub test_id: u64,
    /// Benchmark dataset, for benchmark tests.
    pub dataset_name: Option<String>,
    /// Dataset version the job ran against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_version: Option<String>,
    /// Uploaded documents, for user-document tests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<u64>>,
    /// Queries that were run.
    pub queries: Vec<String>,
    /// Methods requested, in submission order.
    pub methods: Vec<ChunkingMethod>,
    /// Chunk statistics per succeeded method.
    pub chunking_comparison: BTreeMap<ChunkingMethod, ChunkStatistics>,
    /// Per-query retrieval results and averages per succeeded method.
    pub retrieval_comparison: BTreeMap<ChunkingMethod, MethodRetrieval>,
    /// Aggregate scores and winners.
    pub summary: TestSummary,
    /// Deeper evaluation, when at least one method succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_results: Option<EvaluationResults>,
    /// Failure cause per failed method.
    #[serde(default)]
    pub method_failures: BTreeMap<ChunkingMethod, String>,
    /// Terminal status of the job.
    pub status: ChunkTestStatus,
    /// Percent reached by the job.
    pub progress_percent: u8,
    /// Methods that succeeded.
    pub completed_methods: Vec<ChunkingMethod>,
    /// Stage at termination (`interrupted` after a shutdown).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<ChunkTestStage>,
    /// Job failure cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// RFC3339 creation time of the result.
    pub created_at: String,
}

impl ChunkTestResult {
    /// Result of a job that ended without producing comparisons.
    pub fn failed(record: &ChunkTestRecord, progress: &ChunkTestProgress) -> Self {
        Self {
            test_id: record.test_id,
            dataset_name: record.source.dataset_name().map(str::to_string),
            dataset_version: source_version(&record.source),
            document_ids: record.source.document_ids().map(<[u64]>::to_vec),
            queries: record.queries.clone(),
            methods: record.methods.clone(),
            chunking_comparison: BTreeMap::new(),
            retrieval_comparison: BTreeMap::new(),
            summary: TestSummary::default(),
            evaluation_results: None,
            method_failures: BTreeMap::new(),
            status: progress.status,
            progress_percent: progress.progress_percent,
            completed_methods: progress.completed_methods.clone(),
            current_stage: progress.current_stage,
            error_message: progress.error_message.clone(),
            created_at: now_rfc3339(),
        }
    }

    /// Summary row used by result listings.
    pub fn overview(&self) -> ChunkTestOverview {
        ChunkTestOverview {
            test_id: self.test_id,
            dataset_name: self.dataset_name.clone(),
            document_ids: self.document_ids.clone(),
            status: self.status,
            methods: self.methods.clone(),
            completed_methods: self.completed_methods.clone(),
            query_count: self.queries.len(),
            retrieval_winner: self.summary.retrieval_winner,
            created_at: self.created_at.clone(),
        }
    }
}

pub(crate) fn source_version(source: &ChunkTestSource) -> Option<String> {
    match source {
        ChunkTestSource::Benchmark { version, .. } => version.clone(),
        ChunkTestSource::Documents { .. } => None,
    }
}

/// Compact listing row for a stored result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkTestOverview {
    /// Job id.
    pub test_id: u64,
    /// Benchmark dataset, if any.
    pub dataset_name: Option<String>,
    /// Uploaded documents, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<u64>>,
    /// Terminal status.
    pub status: ChunkTestStatus,
    /// Requested methods.
    pub methods: Vec<ChunkingMethod>,
    /// Succeeded methods.
    pub completed_methods: Vec<ChunkingMethod>,
    /// Number of queries run.
    pub query_count: usize,
    /// Best method by composite retrieval score.
    pub retrieval_winner: Option<ChunkingMethod>,
    /// RFC3339 creation time.
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two(index: usize) -> MethodSlot {
        MethodSlot { index, total: 2 }
    }

    #[test]
    fn method_slots_split_the_first_ninety_five_percent() {
        assert_eq!(two(0).percent(ChunkTestStage::Chunking, 0.0), 0);
        assert_eq!(two(0).percent(ChunkTestStage::Embedding, 0.0), 7);
        assert_eq!(two(0).percent(ChunkTestStage::Evaluation, 1.0), 47);
        assert_eq!(two(1).percent(ChunkTestStage::Chunking, 0.0), 47);
        assert_eq!(two(1).percent(ChunkTestStage::Evaluation, 1.0), 95);
    }

    #[test]
    fn completed_methods_only_grow_and_percent_is_monotonic() {
        let mut progress = ChunkTestProgress::pending(7);
        progress.enter(ChunkingMethod::FixedSize, two(0), ChunkTestStage::Retrieval);
        let reached = progress.progress_percent;
        progress.enter(ChunkingMethod::FixedSize, two(0), ChunkTestStage::Chunking);
        assert_eq!(progress.progress_percent, reached);

        progress.finish_method(ChunkingMethod::FixedSize, two(0), true);
        progress.finish_method(ChunkingMethod::FixedSize, two(0), true);
        progress.finish_method(ChunkingMethod::Semantic, two(1), false);
        assert_eq!(progress.completed_methods, vec![ChunkingMethod::FixedSize]);
        assert_eq!(progress.progress_percent, 95);

        progress.complete();
        assert!(progress.is_terminal());
        assert_eq!(progress.progress_percent, 100);
        assert_eq!(progress.current_method, None);
    }

    #[test]
    fn progress_serializes_with_wire_names() {
        let mut progress = ChunkTestProgress::pending(3);
        progress.enter(ChunkingMethod::FixedSize, two(0), ChunkTestStage::Embedding);
        let value = serde_json::to_value(&progress).unwrap();
        assert_eq!(value["status"], "processing");
        assert_eq!(value["current_method"], "fixed-size");
        assert_eq!(value["current_stage"], "embedding");
        assert_eq!(value["completed_methods"], serde_json::json!([]));
    }

    #[test]
    fn benchmark_request_defaults_optional_fields() {
        let request: BenchmarkTestRequest =
            serde_json::from_str(r#"{"dataset_name":"geo-101"}"#).unwrap();
        assert!(request.queries.is_none());
        assert!(request.modes.is_none());
    }
}
