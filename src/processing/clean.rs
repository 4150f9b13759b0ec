//! Text normalization applied between extraction and chunking.
//!
//! Cleaning never fails: when the rules would leave nothing behind, the extracted text is kept
//! as-is and a warning is attached to the outcome.

use regex::Regex;
use std::sync::LazyLock;

static CONTROL_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F\x{FFFE}]").expect("valid control pattern")
});
static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid newline pattern"));
static HORIZONTAL_SPACE_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\t\x0C\r \x{00A0}\x{1680}\x{180E}\x{2000}-\x{200A}\x{202F}\x{205F}\x{3000}]{2,}")
        .expect("valid space pattern")
});
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9.-]+").expect("valid email pattern")
});
static MARKDOWN_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!?\[[^\]]*\]\(https?://[^)]+\)").expect("valid markdown link pattern")
});
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid url pattern"));

/// Optional cleaning rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanOptions {
    /// Strip bare URLs and e-mail addresses; markdown links and images are kept.
    pub remove_urls: bool,
}

/// Cleaned text plus any non-fatal problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanOutcome {
    /// Text handed to the chunker.
    pub text: String,
    /// Warnings to surface on the document.
    pub warnings: Vec<String>,
}

/// Normalize extracted text.
pub fn clean_text(raw: &str, options: CleanOptions) -> CleanOutcome {
    let mut text = raw.replace("<|", "<").replace("|>", ">");
    text = CONTROL_CHARS.replace_all(&text, "").into_owned();
    text = EXCESS_NEWLINES.replace_all(&text, "\n\n").into_owned();
    text = HORIZONTAL_SPACE_RUN.replace_all(&text, " ").into_owned();
    if options.remove_urls {
        text = strip_urls_and_emails(&text);
    }

    if text.trim().is_empty() {
        return CleanOutcome {
            text: raw.to_string(),
            warnings: vec!["cleaning removed all content; using extracted text".to_string()],
        };
    }
    CleanOutcome {
        text,
        warnings: Vec::new(),
    }
}

fn strip_urls_and_emails(text: &str) -> String {
    let text = EMAIL.replace_all(text, "");
    let links: Vec<(usize, usize)> = MARKDOWN_LINK
        .find_iter(&text)
        .map(|link| (link.start(), link.end()))
        .collect();

    // URLs starting inside a markdown link or image belong to it and are kept.
    let mut cleaned = String::with_capacity(text.len());
    let mut kept_until = 0;
    for url in URL.find_iter(&text) {
        if links
            .iter()
            .any(|&(start, end)| (start..end).contains(&url.start()))
        {
            continue;
        }
        cleaned.push_str(&text[kept_until..url.start()]);
        kept_until = url.end();
    }
    cleaned.push_str(&text[kept_until..]);
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_control_characters_and_collapses_whitespace() {
        let raw = "Title<|x|>\u{7}\n\n\n\nBody  with\u{00A0}\u{00A0}gaps\tand\u{FFFE} more";
        let outcome = clean_text(raw, CleanOptions::default());
        assert_eq!(outcome.text, "Title<x>\n\nBody with gaps\tand more");
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn keeps_single_newlines_and_tabs() {
        let outcome = clean_text("a\nb\tc\r\nd", CleanOptions::default());
        assert_eq!(outcome.text, "a\nb\tc\r\nd");
    }

    #[test]
    fn url_removal_preserves_markdown_links_and_images() {
        let raw = "See [docs](https://example.com/docs) and ![logo](http://cdn.example.com/l.png) \
                   or visit https://example.com/raw now, mail ops@example.com.";
        let outcome = clean_text(raw, CleanOptions { remove_urls: true });
        assert!(outcome.text.contains("[docs](https://example.com/docs)"));
        assert!(outcome.text.contains("![logo](http://cdn.example.com/l.png)"));
        assert!(!outcome.text.contains("example.com/raw"));
        assert!(!outcome.text.contains("ops@example.com"));
    }

    #[test]
    fn private_use_characters_survive_url_removal() {
        let raw = "glyph \u{E000}0\u{E001} and \u{E000}7\u{E001} next to [a](https://a.example) https://b.example";
        let outcome = clean_text(raw, CleanOptions { remove_urls: true });
        assert_eq!(
            outcome.text,
            "glyph \u{E000}0\u{E001} and \u{E000}7\u{E001} next to [a](https://a.example) "
        );
    }

    #[test]
    fn urls_are_kept_unless_requested() {
        let outcome = clean_text("go to https://example.com", CleanOptions::default());
        assert_eq!(outcome.text, "go to https://example.com");
    }

    #[test]
    fn falls_back_to_raw_text_when_cleaning_empties_it() {
        let raw = "https://only-a-link.example";
        let outcome = clean_text(raw, CleanOptions { remove_urls: true });
        assert_eq!(outcome.text, raw);
        assert_eq!(outcome.warnings.len(), 1);
    }
}
