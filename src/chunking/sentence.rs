use super::spans::{TextSpan, pack_spans};
use super::{ChunkingError, ChunkingMethod, ChunkingStrategy};

const TERMINATORS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

/// Packs whole sentences into chunks of at most `max_chars` characters.
pub struct SentenceChunker {
    max_chars: usize,
}

impl SentenceChunker {
    /// Create a chunker with the given character budget.
    pub fn new(max_chars: usize) -> Result<Self, ChunkingError> {
        if max_chars == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self { max_chars })
    }
}

/// Sentence spans: a sentence ends after a terminator followed by whitespace, after a CJK
/// terminator, or at a blank line.
pub(crate) fn sentence_spans(text: &str) -> Vec<TextSpan> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        let end = offset + ch.len_utf8();
        let next = chars.peek().map(|(_, next)| *next);
        let boundary = if TERMINATORS.contains(&ch) {
            !ch.is_ascii() || next.is_none_or(char::is_whitespace)
        } else {
            ch == '\n' && next == Some('\n')
        };
        if boundary {
            spans.push(TextSpan::new(start, end));
            start = end;
        }
    }
    if start < text.len() {
        spans.push(TextSpan::new(start, text.len()));
    }
    spans.into_iter().filter_map(|span| span.trimmed(text)).collect()
}

impl ChunkingStrategy for SentenceChunker {
    fn method(&self) -> ChunkingMethod {
        ChunkingMethod::Sentence
    }

    fn split(&self, text: &str) -> Result<Vec<TextSpan>, ChunkingError> {
        Ok(pack_spans(text, &sentence_spans(text), self.max_chars))
    }
}
