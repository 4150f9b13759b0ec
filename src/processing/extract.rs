//! Raw upload bytes to plain text.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

/// Errors raised while extracting text. Always terminal for the document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// The file type has no text extractor.
    #[error("Unsupported file type '{0}'")]
    UnsupportedType(String),
    /// The content looks binary (NUL bytes or a known binary signature).
    #[error("Content is binary, not text")]
    Binary,
    /// The content is not valid UTF-8.
    #[error("Content is not valid UTF-8 (error at byte {0})")]
    InvalidEncoding(usize),
    /// Nothing remained after extraction.
    #[error("Document contains no extractable text")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Plain,
    Html,
}

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "csv", "json", "log", "rst", "text"];
const HTML_EXTENSIONS: &[&str] = &["html", "htm"];

const BINARY_SIGNATURES: &[&[u8]] = &[
    b"%PDF",
    b"PK\x03\x04",
    b"\x89PNG",
    b"\xFF\xD8\xFF",
    b"GIF8",
    b"\x1F\x8B",
    b"\xD0\xCF\x11\xE0",
];

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->")
        .expect("valid script pattern")
});
static BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|li|h[1-6]|tr|section|article|blockquote|pre)\s*>")
        .expect("valid block pattern")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern")
});
static NUMERIC_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);")
        .expect("valid entity pattern")
});

/// Extract plain text from an upload, choosing the extractor by file extension.
///
/// Extension-less uploads are sniffed: markup that opens like an HTML document is treated as
/// HTML, anything else as plain text.
pub fn extract_text(file_name: &str, bytes: &[u8]) -> Result<String, ExtractionError> {
    let format = detect_format(file_name, bytes)?;
    if BINARY_SIGNATURES.iter().any(|sig| bytes.starts_with(sig)) || bytes.contains(&0) {
        return Err(ExtractionError::Binary);
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|error| ExtractionError::InvalidEncoding(error.valid_up_to()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let extracted = match format {
        Format::Plain => text.to_string(),
        Format::Html => strip_html(text),
    };
    if extracted.trim().is_empty() {
        return Err(ExtractionError::Empty);
    }
    Ok(extracted)
}

fn detect_format(file_name: &str, bytes: &[u8]) -> Result<Format, ExtractionError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some(ext) if TEXT_EXTENSIONS.contains(&ext) => Ok(Format::Plain),
        Some(ext) if HTML_EXTENSIONS.contains(&ext) => Ok(Format::Html),
        Some(ext) => Err(ExtractionError::UnsupportedType(ext.to_string())),
        None => Ok(sniff(bytes)),
    }
}

fn sniff(bytes: &[u8]) -> Format {
    let head = &bytes[..bytes.len().min(512)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let head = head.trim_start_matches('\u{feff}').trim_start();
    if head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<body") {
        Format::Html
    } else {
        Format::Plain
    }
}

fn strip_html(markup: &str) -> String {
    let without_code = SCRIPT_OR_STYLE.replace_all(markup, "");
    let with_breaks = BLOCK_BREAK.replace_all(&without_code, "\n");
    let text = TAG.replace_all(&with_breaks, "");
    decode_entities(&text)
}

fn decode_entities(text: &str) -> String {
    let numeric = NUMERIC_ENTITY.replace_all(text, |caps: &regex::Captures<'_>| {
        let raw = &caps[1];
        let code = match raw.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => raw.parse().ok(),
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    numeric
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
