//! Corpus assembly and ground-truth location for chunk tests.

use std::collections::HashMap;
use std::sync::Arc;

use crate::datasets::BenchmarkDataset;

/// One document of the corpus under test.
#[derive(Debug, Clone)]
pub struct CorpusDocument {
    /// Identifier stamped on the document's chunks.
    pub id: String,
    /// Cleaned text.
    pub text: Arc<str>,
}

/// Location of a ground-truth span inside a corpus document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvidenceSpan<'a> {
    /// Document containing the span.
    pub document_id: &'a str,
    /// Byte offset where the span starts.
    pub start: usize,
    /// Byte offset one past the span end.
    pub end: usize,
}

impl EvidenceSpan<'_> {
    /// Whether the byte range `[start, end)` of `document_id` overlaps this span.
    pub fn overlaps(&self, document_id: &str, start: usize, end: usize) -> bool {
        self.document_id == document_id && start < self.end && self.start < end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OwnedSpan {
    document_id: String,
    start: usize,
    end: usize,
}

/// Documents plus the located evidence for each query that has ground truth.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    documents: Vec<CorpusDocument>,
    ground_truth: HashMap<String, Vec<OwnedSpan>>,
}

impl Corpus {
    /// Corpus without ground truth.
    pub fn new(documents: Vec<CorpusDocument>) -> Self {
        Self {
            documents,
            ground_truth: HashMap::new(),
        }
    }

    /// Corpus for a benchmark snapshot.
    ///
    /// Ground truth is attached only to `queries` that match a dataset query verbatim; evidence
    /// that cannot be located in its document is skipped.
    pub fn from_dataset(dataset: &BenchmarkDataset, queries: &[String]) -> Self {
        let documents: Vec<CorpusDocument> = dataset
            .documents
            .iter()
            .map(|doc| CorpusDocument {
                id: doc.id.clone(),
                text: Arc::from(doc.text.as_str()),
            })
            .collect();

        let mut ground_truth = HashMap::new();
        for query in queries {
            let Some(evidence) = dataset.evidence_for(query) else {
                continue;
            };
            let spans: Vec<OwnedSpan> = evidence
                .iter()
                .filter_map(|item| {
                    let document = documents.iter().find(|doc| doc.id == item.document_id)?;
                    match locate_evidence(&document.text, &item.text) {
                        Some((start, end)) => Some(OwnedSpan {
                            document_id: document.id.clone(),
                            start,
                            end,
                        }),
                        None => {
                            tracing::warn!(
                                dataset = %dataset.info.name,
                                document_id = %item.document_id,
                                "Evidence text not found in document"
                            );
                            None
                        }
                    }
                })
                .collect();
            if !spans.is_empty() {
                ground_truth.insert(query.clone(), spans);
            }
        }

        Self {
            documents,
            ground_truth,
        }
    }

    /// Corpus documents.
    pub fn documents(&self) -> &[CorpusDocument] {
        &self.documents
    }

    /// Total characters across the corpus.
    pub fn total_characters(&self) -> usize {
        self.documents.iter().map(|doc| doc.text.chars().count()).sum()
    }

    /// Evidence spans for `query`, when it has ground truth.
    pub fn evidence(&self, query: &str) -> Option<Vec<EvidenceSpan<'_>>> {
        self.ground_truth.get(query).map(|spans| {
            spans
                .iter()
                .map(|span| EvidenceSpan {
                    document_id: &span.document_id,
                    start: span.start,
                    end: span.end,
                })
                .collect()
        })
    }
}

/// Byte range of `needle` in `haystack`.
///
/// Falls back to a whitespace-insensitive match when the verbatim text is absent (evidence copied
/// across line wraps or collapsed spaces).
pub fn locate_evidence(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }
    if let Some(start) = haystack.find(needle) {
        return Some((start, start + needle.len()));
    }

    let (normalized, offsets) = collapse_whitespace(haystack);
    let (target, _) = collapse_whitespace(needle);
    let found = normalized.find(target.trim())?;
    let last = found + target.trim().len() - 1;
    Some((offsets[found].0, offsets[last].1))
}

/// Collapse whitespace runs to one space, remembering each output byte's source range.
fn collapse_whitespace(text: &str) -> (String, Vec<(usize, usize)>) {
    let mut out = String::with_capacity(text.len());
    let mut offsets: Vec<(usize, usize)> = Vec::with_capacity(text.len());
    let mut in_space = false;
    for (index, ch) in text.char_indices() {
        let end = index + ch.len_utf8();
        if ch.is_whitespace() {
            if in_space {
                if let Some(last) = offsets.last_mut() {
                    last.1 = end;
                }
                continue;
            }
            in_space = true;
            out.push(' ');
            offsets.push((index, end));
        } else {
            in_space = false;
            out.push(ch);
            offsets.extend(std::iter::repeat_n((index, end), ch.len_utf8()));
        }
    }
    (out, offsets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{Benchmark, DatasetDocument, DatasetQuery, Evidence};

    #[test]
    fn verbatim_evidence_is_located() {
        let text = "Paris is the capital of France and its largest city.";
        assert_eq!(locate_evidence(text, "capital of France"), Some((13, 30)));
    }

    #[test]
    fn evidence_matches_across_line_wraps() {
        let text = "The Seine flows\n   through Paris.";
        let (start, end) = locate_evidence(text, "flows through Paris").unwrap();
        assert_eq!(&text[start..end], "flows\n   through Paris");
        assert_eq!(locate_evidence(text, "Danube"), None);
        assert_eq!(locate_evidence(text, "   "), None);
    }

    #[test]
    fn ground_truth_only_for_dataset_queries() {
        let dataset = BenchmarkDataset {
            info: Benchmark {
                name: "mini".into(),
                description: String::new(),
                source: String::new(),
                version: None,
                updated_at: None,
            },
            documents: vec![DatasetDocument {
                id: "d1".into(),
                title: None,
                text: "Lyon is known for its cuisine.".into(),
            }],
            queries: vec![DatasetQuery {
                query: "what is Lyon known for".into(),
                answer: None,
                evidence: vec![
                    Evidence {
                        document_id: "d1".into(),
                        text: "known for its cuisine".into(),
                    },
                    Evidence {
                        document_id: "d1".into(),
                        text: "not in the text".into(),
                    },
                ],
            }],
        };
        let corpus = Corpus::from_dataset(
            &dataset,
            &["what is Lyon known for".to_string(), "free form".to_string()],
        );
        let spans = corpus.evidence("what is Lyon known for").unwrap();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].overlaps("d1", 0, 10));
        assert!(!spans[0].overlaps("d2", 0, 10));
        assert!(corpus.evidence("free form").is_none());
    }
}
