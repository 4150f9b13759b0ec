//! Chunk tests: run several chunking methods over one corpus, retrieve with the same queries,
//! and compare chunk statistics and retrieval quality side by side.
//!
//! A test is accepted by [`ChunkTestService`], persisted as a record, and executed as a
//! [`ChunkTestJob`] on the shared scheduler. Every job ends `completed` or `failed` with a
//! stored [`ChunkTestResult`].

pub mod corpus;
pub mod metrics;
mod orchestrator;
mod service;
pub mod stats;
pub mod summary;
mod types;

pub use corpus::{Corpus, CorpusDocument};
pub use metrics::{MethodRetrieval, QueryMetrics, QueryRetrieval, RetrievedChunk};
pub use orchestrator::{ChunkTestJob, ChunkTestRunner, ChunkTestSettings, partition_for};
pub use service::ChunkTestService;
pub use stats::{ChunkStatistics, SizeDistribution};
pub use summary::{EvaluationResults, ScoreBasis, TestSummary};
pub use types::{
    BenchmarkTestRequest, ChunkTestOverview, ChunkTestProgress, ChunkTestRecord, ChunkTestResult,
    ChunkTestSource, ChunkTestStage, ChunkTestStatus, METHODS_PERCENT, MethodSlot,
    UserDocumentsTestRequest,
};

use thiserror::Error;

use crate::chunking::ChunkingError;
use crate::datasets::DatasetError;
use crate::jobs::SchedulerError;
use crate::store::StoreError;

/// Errors returned by [`ChunkTestService`] operations.
#[derive(Debug, Error)]
pub enum ChunkTestError {
    /// A user-document test named no documents.
    #[error("At least one document id is required")]
    NoDocuments,
    /// Every supplied query was blank, or the dataset has no canned queries.
    #[error("At least one non-empty query is required")]
    NoQueries,
    /// A referenced upload does not exist.
    #[error("Unknown document {0}")]
    UnknownDocument(u64),
    /// A referenced upload could not be turned into text.
    #[error("Document {id} cannot be tested: {reason}")]
    UnusableDocument {
        /// Document id.
        id: u64,
        /// Extraction failure.
        reason: String,
    },
    /// A requested chunking method is not registered.
    #[error(transparent)]
    Method(#[from] ChunkingError),
    /// Dataset lookup or loading failed.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// No chunk test with this id.
    #[error("Unknown chunk test {0}")]
    UnknownTest(u64),
    /// The job has not reached a terminal status yet.
    #[error("Chunk test {0} has not finished yet")]
    NotReady(u64),
    /// The job is already terminal.
    #[error("Chunk test {0} has already finished")]
    AlreadyFinished(u64),
    /// The scheduler refused the job.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// The result store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
