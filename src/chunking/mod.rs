//! Chunking strategies: a fixed, registered family of methods selected by name.
//!
//! Every strategy maps cleaned text to an ordered list of byte spans. [`chunk_document`] turns
//! those spans into [`Chunk`]s with deterministic identifiers, so chunking the same text with
//! the same method and parameters always yields the same chunk set.

mod fixed;
mod paragraph;
mod recursive;
mod semantic;
mod sentence;
mod spans;

pub use fixed::FixedSizeChunker;
pub use paragraph::ParagraphChunker;
pub use recursive::RecursiveChunker;
pub use semantic::SemanticChunker;
pub use sentence::SentenceChunker;
pub use spans::TextSpan;

use anyhow::Error as TokenizerError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced while turning text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// A size budget of zero was requested.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must leave room for forward progress.
    #[error("chunk overlap {overlap} must be smaller than chunk size {chunk_size}")]
    InvalidOverlap {
        /// Requested overlap.
        overlap: usize,
        /// Requested chunk size.
        chunk_size: usize,
    },
    /// Method name is not part of the registered family.
    #[error("unknown chunking method '{0}'")]
    UnknownMethod(String),
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Registered chunking methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkingMethod {
    /// Character windows with overlap.
    FixedSize,
    /// Token-budgeted hierarchical splitting.
    Semantic,
    /// Blank-line paragraphs merged up to the size budget.
    Paragraph,
    /// Sentences packed up to the size budget.
    Sentence,
    /// Separator hierarchy split then merged.
    Recursive,
}

impl ChunkingMethod {
    /// Every registered method in default reporting order.
    pub const ALL: [ChunkingMethod; 5] = [
        ChunkingMethod::FixedSize,
        ChunkingMethod::Semantic,
        ChunkingMethod::Paragraph,
        ChunkingMethod::Sentence,
        ChunkingMethod::Recursive,
    ];

    /// Stable external name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkingMethod::FixedSize => "fixed-size",
            ChunkingMethod::Semantic => "semantic",
            ChunkingMethod::Paragraph => "paragraph",
            ChunkingMethod::Sentence => "sentence",
            ChunkingMethod::Recursive => "recursive",
        }
    }
}

impl fmt::Display for ChunkingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkingMethod {
    type Err = ChunkingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        ChunkingMethod::ALL
            .into_iter()
            .find(|method| method.as_str() == normalized || normalized == method_alias(*method))
            .ok_or_else(|| ChunkingError::UnknownMethod(s.to_string()))
    }
}

fn method_alias(method: ChunkingMethod) -> &'static str {
    match method {
        ChunkingMethod::FixedSize => "fixed",
        ChunkingMethod::Semantic => "semchunk",
        ChunkingMethod::Paragraph => "paragraphs",
        ChunkingMethod::Sentence => "sentences",
        ChunkingMethod::Recursive => "recursive-character",
    }
}

/// Resolve requested method names, preserving submission order and dropping duplicates.
///
/// An empty request selects every registered method.
pub fn parse_methods<S: AsRef<str>>(names: &[S]) -> Result<Vec<ChunkingMethod>, ChunkingError> {
    if names.is_empty() {
        return Ok(ChunkingMethod::ALL.to_vec());
    }
    let mut methods = Vec::with_capacity(names.len());
    for name in names {
        let method: ChunkingMethod = name.as_ref().parse()?;
        if !methods.contains(&method) {
            methods.push(method);
        }
    }
    Ok(methods)
}

/// Size parameters shared by all strategies.
#[derive(Debug, Clone)]
pub struct ChunkingSettings {
    /// Character budget for size-bounded methods.
    pub chunk_size: usize,
    /// Character overlap between fixed-size windows.
    pub chunk_overlap: usize,
    /// Token budget for the semantic method.
    pub semantic_tokens: usize,
    /// Model or encoding name used to count semantic tokens.
    pub tokenizer_model: String,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 80,
            semantic_tokens: 200,
            tokenizer_model: "cl100k_base".to_string(),
        }
    }
}

impl ChunkingSettings {
    fn validate(&self) -> Result<(), ChunkingError> {
        if self.chunk_size == 0 || self.semantic_tokens == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkingError::InvalidOverlap {
                overlap: self.chunk_overlap,
                chunk_size: self.chunk_size,
            });
        }
        Ok(())
    }
}

/// Capability implemented by every registered chunking method.
pub trait ChunkingStrategy: Send + Sync {
    /// Method tag stamped on produced chunks.
    fn method(&self) -> ChunkingMethod;

    /// Partition `text` into ordered, non-empty byte spans.
    fn split(&self, text: &str) -> Result<Vec<TextSpan>, ChunkingError>;
}

/// Build the strategy registered under `method`.
pub fn strategy_for(
    method: ChunkingMethod,
    settings: &ChunkingSettings,
) -> Result<Box<dyn ChunkingStrategy>, ChunkingError> {
    settings.validate()?;
    let strategy: Box<dyn ChunkingStrategy> = match method {
        ChunkingMethod::FixedSize => Box::new(FixedSizeChunker::new(
            settings.chunk_size,
            settings.chunk_overlap,
        )?),
        ChunkingMethod::Semantic => Box::new(SemanticChunker::new(
            settings.semantic_tokens,
            &settings.tokenizer_model,
        )?),
        ChunkingMethod::Paragraph => Box::new(ParagraphChunker::new(settings.chunk_size)?),
        ChunkingMethod::Sentence => Box::new(SentenceChunker::new(settings.chunk_size)?),
        ChunkingMethod::Recursive => Box::new(RecursiveChunker::new(settings.chunk_size)?),
    };
    Ok(strategy)
}

/// A contiguous span of a document treated as one retrieval unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic identifier derived from document, method and ordinal.
    pub id: String,
    /// Parent document identifier.
    pub document_id: String,
    /// Position of the chunk within the document.
    pub ordinal: usize,
    /// Chunk text.
    pub text: String,
    /// Byte offset where the chunk starts in the cleaned text.
    pub start: usize,
    /// Byte offset one past the chunk end.
    pub end: usize,
    /// Method that produced the chunk.
    pub method: ChunkingMethod,
}

/// Chunk a document's text with `strategy`.
///
/// Spans are trimmed of surrounding whitespace and empty spans are discarded before ordinals
/// are assigned.
pub fn chunk_document(
    document_id: &str,
    text: &str,
    strategy: &dyn ChunkingStrategy,
) -> Result<Vec<Chunk>, ChunkingError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let method = strategy.method();
    let chunks = strategy
        .split(text)?
        .into_iter()
        .filter_map(|span| span.trimmed(text))
        .enumerate()
        .map(|(ordinal, span)| Chunk {
            id: chunk_id(document_id, method, ordinal),
            document_id: document_id.to_string(),
            ordinal,
            text: text[span.start..span.end].to_string(),
            start: span.start,
            end: span.end,
            method,
        })
        .collect();
    Ok(chunks)
}

/// Deterministic UUID for a chunk position, stable across re-runs.
pub fn chunk_id(document_id: &str, method: ChunkingMethod, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0]);
    hasher.update(method.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(ordinal.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0_u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}
