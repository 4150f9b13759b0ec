use super::spans::{TextSpan, window_spans};
use super::{ChunkingError, ChunkingMethod, ChunkingStrategy};

/// Splits text into windows of `size` characters, each overlapping the previous by `overlap`.
pub struct FixedSizeChunker {
    size: usize,
    overlap: usize,
}

impl FixedSizeChunker {
    /// Create a chunker; `overlap` must be smaller than `size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if overlap >= size {
            return Err(ChunkingError::InvalidOverlap {
                overlap,
                chunk_size: size,
            });
        }
        Ok(Self { size, overlap })
    }
}

impl ChunkingStrategy for FixedSizeChunker {
    fn method(&self) -> ChunkingMethod {
        ChunkingMethod::FixedSize
    }

    fn split(&self, text: &str) -> Result<Vec<TextSpan>, ChunkingError> {
        Ok(window_spans(
            text,
            TextSpan::new(0, text.len()),
            self.size,
            self.overlap,
        ))
    }
}
