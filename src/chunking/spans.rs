//! Byte-span helpers shared by the chunking strategies.

use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)` into a text, always on char boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    /// Inclusive start offset.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
}

impl TextSpan {
    /// Construct a span.
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Byte length of the span.
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the span covers no bytes.
    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Shrink the span to exclude leading and trailing whitespace; `None` when nothing remains.
    pub fn trimmed(self, text: &str) -> Option<TextSpan> {
        let slice = &text[self.start..self.end];
        let leading = slice.len() - slice.trim_start().len();
        let trailing = slice.len() - slice.trim_end().len();
        let span = TextSpan::new(self.start + leading, self.end - trailing);
        (!span.is_empty() && span.start < self.end).then_some(span)
    }
}

pub(crate) fn char_len(text: &str, span: TextSpan) -> usize {
    text[span.start..span.end].chars().count()
}

/// Slide a window of `size` chars with `overlap` chars of overlap across `span`.
pub(crate) fn window_spans(text: &str, span: TextSpan, size: usize, overlap: usize) -> Vec<TextSpan> {
    let slice = &text[span.start..span.end];
    let mut boundaries: Vec<usize> = slice
        .char_indices()
        .map(|(offset, _)| span.start + offset)
        .collect();
    boundaries.push(span.end);

    let char_count = boundaries.len() - 1;
    if char_count == 0 {
        return Vec::new();
    }
    let stride = size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut first = 0;
    loop {
        let last = (first + size).min(char_count);
        windows.push(TextSpan::new(boundaries[first], boundaries[last]));
        if last == char_count {
            break;
        }
        first += stride;
    }
    windows
}

/// Greedily merge contiguous pieces while the merged span stays within `size` chars.
///
/// Pieces larger than `size` are window-split without overlap.
pub(crate) fn pack_spans(text: &str, pieces: &[TextSpan], size: usize) -> Vec<TextSpan> {
    let mut packed = Vec::new();
    let mut current: Option<TextSpan> = None;

    for piece in pieces.iter().copied().filter(|piece| !piece.is_empty()) {
        if char_len(text, piece) > size {
            if let Some(open) = current.take() {
                packed.push(open);
            }
            packed.extend(window_spans(text, piece, size, 0));
            continue;
        }
        current = match current {
            None => Some(piece),
            Some(open) => {
                let merged = TextSpan::new(open.start, piece.end);
                if char_len(text, merged) <= size {
                    Some(merged)
                } else {
                    packed.push(open);
                    Some(piece)
                }
            }
        };
    }
    if let Some(open) = current {
        packed.push(open);
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_respect_char_boundaries() {
        let text = "héllo wörld";
        let windows = window_spans(text, TextSpan::new(0, text.len()), 4, 1);
        for window in &windows {
            assert!(text.is_char_boundary(window.start) && text.is_char_boundary(window.end));
            assert!(char_len(text, *window) <= 4);
        }
        assert_eq!(windows.last().map(|w| w.end), Some(text.len()));
    }

    #[test]
    fn pack_merges_until_budget() {
        let text = "aa bb cc dd";
        let pieces = [
            TextSpan::new(0, 3),
            TextSpan::new(3, 6),
            TextSpan::new(6, 9),
            TextSpan::new(9, 11),
        ];
        let packed = pack_spans(text, &pieces, 6);
        assert_eq!(packed, vec![TextSpan::new(0, 6), TextSpan::new(6, 11)]);
    }

    #[test]
    fn trimmed_drops_whitespace_only_spans() {
        let text = "  a  ";
        assert_eq!(TextSpan::new(0, 5).trimmed(text), Some(TextSpan::new(2, 3)));
        assert_eq!(TextSpan::new(0, 2).trimmed(text), None);
    }
}
