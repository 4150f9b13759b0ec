//! Token-budgeted semantic chunking.
//!
//! `semchunk-rs` splits along the most meaningful delimiter available (paragraphs, lines,
//! sentences, words) until every piece fits the token budget. Tokens are counted with
//! `tiktoken-rs` when the model or encoding is known; otherwise a whitespace counter keeps
//! chunking flowing and the fallback is logged.

use super::spans::TextSpan;
use super::{ChunkingError, ChunkingMethod, ChunkingStrategy};
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

pub(crate) type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Semantic chunker with a hard token budget per chunk.
pub struct SemanticChunker {
    token_budget: usize,
    token_counter: TokenCounter,
}

impl SemanticChunker {
    /// Build a chunker counting tokens with the tokenizer for `model`.
    pub fn new(token_budget: usize, model: &str) -> Result<Self, ChunkingError> {
        if token_budget == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self {
            token_budget,
            token_counter: build_token_counter(model),
        })
    }

    #[cfg(test)]
    fn with_counter(token_budget: usize, token_counter: TokenCounter) -> Self {
        Self {
            token_budget,
            token_counter,
        }
    }
}

impl ChunkingStrategy for SemanticChunker {
    fn method(&self) -> ChunkingMethod {
        ChunkingMethod::Semantic
    }

    fn split(&self, text: &str) -> Result<Vec<TextSpan>, ChunkingError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let counter = self.token_counter.clone();
        let chunker = Chunker::new(
            self.token_budget,
            Box::new(move |segment: &str| counter.as_ref()(segment)),
        );
        let pieces = chunker.chunk(text);
        Ok(locate_pieces(text, &pieces))
    }
}

/// Map chunker output back onto byte offsets of the source text.
///
/// Pieces are searched for in order from the end of the previous match. A piece that cannot be
/// found verbatim is anchored on its first word instead.
fn locate_pieces(text: &str, pieces: &[String]) -> Vec<TextSpan> {
    let mut cursor = 0;
    let mut spans = Vec::with_capacity(pieces.len());

    for piece in pieces {
        let needle = piece.trim();
        if needle.is_empty() {
            continue;
        }
        let start = match text[cursor..].find(needle) {
            Some(offset) => cursor + offset,
            None => {
                let anchor = needle.split_whitespace().next().unwrap_or(needle);
                match text[cursor..].find(anchor) {
                    Some(offset) => cursor + offset,
                    None => {
                        tracing::debug!(piece = needle, "Unable to locate semantic chunk in source");
                        continue;
                    }
                }
            }
        };
        let mut end = (start + needle.len()).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end > start {
            spans.push(TextSpan::new(start, end));
            cursor = end;
        }
    }
    spans
}

/// Build a token counter for the given model or encoding name.
///
/// Unknown models fall back to `cl100k_base`; if no encoding can be loaded at all the
/// whitespace counter is used.
pub(crate) fn build_token_counter(model: &str) -> TokenCounter {
    match build_tiktoken_counter(model) {
        Ok(counter) => counter,
        Err(error) => {
            tracing::warn!(
                model,
                error = %error,
                "Tokenizer unavailable; falling back to whitespace counter"
            );
            default_token_counter()
        }
    }
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, ChunkingError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            encoding_from_name(model).unwrap_or_else(cl100k_base)
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

pub(crate) fn default_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(text: &str, spans: &[TextSpan]) -> Vec<String> {
        spans
            .iter()
            .map(|span| text[span.start..span.end].to_string())
            .collect()
    }

    #[test]
    fn respects_budget_with_whitespace_counter() {
        let chunker = SemanticChunker::with_counter(2, default_token_counter());
        let text = "one two three four five";
        let spans = chunker.split(text).unwrap();
        assert_eq!(texts(text, &spans), vec!["one two", "three four", "five"]);
    }

    #[test]
    fn tiktoken_budget_holds_and_words_are_preserved() {
        let chunker = SemanticChunker::new(5, "text-embedding-3-small").unwrap();
        let text = "The quick brown fox jumps over the lazy dog.";
        let spans = chunker.split(text).unwrap();
        let counter = build_token_counter("text-embedding-3-small");
        let pieces = texts(text, &spans);
        for piece in &pieces {
            assert!(counter.as_ref()(piece) <= 5, "piece over budget: {piece}");
        }
        let words: Vec<&str> = pieces.iter().flat_map(|p| p.split_whitespace()).collect();
        let original: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(words, original);
    }

    #[test]
    fn unknown_model_falls_back_to_cl100k() {
        let counter = build_token_counter("nomic-embed-text");
        assert!(counter.as_ref()("hello world") >= 2);
    }

    #[test]
    fn locate_skips_missing_pieces_and_keeps_order() {
        let text = "alpha beta gamma";
        let spans = locate_pieces(text, &["alpha".into(), "zeta".into(), "gamma".into()]);
        assert_eq!(spans, vec![TextSpan::new(0, 5), TextSpan::new(11, 16)]);
    }

    #[test]
    fn empty_input_yields_no_spans() {
        let chunker = SemanticChunker::with_counter(4, default_token_counter());
        assert!(chunker.split("   ").unwrap().is_empty());
    }
}
