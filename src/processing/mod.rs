//! Document processing pipeline: extraction, cleaning, chunking, embedding and indexing.

pub mod clean;
pub mod extract;
mod pipeline;
mod store;
pub mod types;

pub use clean::{CleanOptions, CleanOutcome, clean_text};
pub use extract::{ExtractionError, extract_text};
pub use pipeline::{DOCUMENTS_PARTITION, DocumentJob, DocumentPipeline, PipelineSettings};
pub use store::{DocumentRecord, DocumentStore};
pub use types::{
    Document, DocumentProgress, DocumentStatus, PipelineError, ProcessingStage, STAGE_WEIGHTS,
};
