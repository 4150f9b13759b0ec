use super::spans::{TextSpan, char_len, pack_spans, window_spans};
use super::{ChunkingError, ChunkingMethod, ChunkingStrategy};

const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Recursive character splitter.
///
/// Text is split on the coarsest separator present; pieces still over budget are split again
/// with the next separator, down to raw character windows. Adjacent pieces are then merged back
/// up to `max_chars`.
pub struct RecursiveChunker {
    max_chars: usize,
}

impl RecursiveChunker {
    /// Create a chunker with the given character budget.
    pub fn new(max_chars: usize) -> Result<Self, ChunkingError> {
        if max_chars == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self { max_chars })
    }

    fn split_span(&self, text: &str, span: TextSpan, separators: &[&str], out: &mut Vec<TextSpan>) {
        if char_len(text, span) <= self.max_chars {
            out.push(span);
            return;
        }
        let slice = &text[span.start..span.end];
        let Some((index, separator)) = separators
            .iter()
            .enumerate()
            .find(|(_, separator)| slice.contains(**separator))
        else {
            out.extend(window_spans(text, span, self.max_chars, 0));
            return;
        };

        let remaining = &separators[index + 1..];
        let mut piece_start = span.start;
        for (offset, _) in slice.match_indices(separator) {
            let piece_end = span.start + offset + separator.len();
            self.split_span(text, TextSpan::new(piece_start, piece_end), remaining, out);
            piece_start = piece_end;
        }
        if piece_start < span.end {
            self.split_span(text, TextSpan::new(piece_start, span.end), remaining, out);
        }
    }
}

impl ChunkingStrategy for RecursiveChunker {
    fn method(&self) -> ChunkingMethod {
        ChunkingMethod::Recursive
    }

    fn split(&self, text: &str) -> Result<Vec<TextSpan>, ChunkingError> {
        let mut pieces = Vec::new();
        self.split_span(text, TextSpan::new(0, text.len()), &SEPARATORS, &mut pieces);
        Ok(pack_spans(text, &pieces, self.max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_chunk_fits_budget() {
        let chunker = RecursiveChunker::new(25).unwrap();
        let text = "Intro line here.\n\nA longer paragraph that keeps going. It has sentences. \
                    And more words than fit.\nA trailing line.";
        let spans = chunker.split(text).unwrap();
        assert!(spans.len() > 2);
        for span in &spans {
            assert!(char_len(text, *span) <= 25);
        }
        assert_eq!(spans.first().map(|s| s.start), Some(0));
        assert_eq!(spans.last().map(|s| s.end), Some(text.len()));
    }

    #[test]
    fn spans_are_contiguous() {
        let chunker = RecursiveChunker::new(12).unwrap();
        let text = "aaaa bbbb cccc dddd eeee";
        let spans = chunker.split(text).unwrap();
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn unbroken_text_falls_back_to_windows() {
        let chunker = RecursiveChunker::new(4).unwrap();
        let spans = chunker.split("abcdefghij").unwrap();
        assert_eq!(spans.len(), 3);
    }
}
