use super::spans::{TextSpan, pack_spans};
use super::{ChunkingError, ChunkingMethod, ChunkingStrategy};

/// Splits on blank lines and merges neighbouring paragraphs up to `max_chars`.
pub struct ParagraphChunker {
    max_chars: usize,
}

impl ParagraphChunker {
    /// Create a chunker with the given character budget.
    pub fn new(max_chars: usize) -> Result<Self, ChunkingError> {
        if max_chars == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self { max_chars })
    }
}

/// Paragraph spans separated by one or more blank lines.
pub(crate) fn paragraph_spans(text: &str) -> Vec<TextSpan> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut last_content_end = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let blank = line.trim().is_empty();
        match (blank, start) {
            (false, None) => {
                start = Some(offset);
                last_content_end = offset + line.trim_end().len();
            }
            (false, Some(_)) => last_content_end = offset + line.trim_end().len(),
            (true, Some(open)) => {
                spans.push(TextSpan::new(open, last_content_end));
                start = None;
            }
            (true, None) => {}
        }
        offset += line.len();
    }
    if let Some(open) = start {
        spans.push(TextSpan::new(open, last_content_end));
    }
    spans
}

impl ChunkingStrategy for ParagraphChunker {
    fn method(&self) -> ChunkingMethod {
        ChunkingMethod::Paragraph
    }

    fn split(&self, text: &str) -> Result<Vec<TextSpan>, ChunkingError> {
        Ok(pack_spans(text, &paragraph_spans(text), self.max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_paragraphs_between_blank_lines() {
        let text = "First para\nstill first\n\n\nSecond\n  \nThird";
        let spans = paragraph_spans(text);
        let pieces: Vec<&str> = spans.iter().map(|s| text[s.start..s.end].trim()).collect();
        assert_eq!(pieces, vec!["First para\nstill first", "Second", "Third"]);
    }

    #[test]
    fn small_paragraphs_are_merged() {
        let chunker = ParagraphChunker::new(40).unwrap();
        let text = "Alpha one.\n\nBeta two.\n\nA much longer gamma paragraph here.";
        let spans = chunker.split(text).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].start..spans[0].end], "Alpha one.\n\nBeta two.");
    }

    #[test]
    fn oversized_paragraphs_are_window_split() {
        let chunker = ParagraphChunker::new(10).unwrap();
        let text = "abcdefghijklmnopqrstuvwxy";
        let spans = chunker.split(text).unwrap();
        assert_eq!(spans.len(), 3);
    }
}
