//! Chunk size and coverage statistics for one chunking method.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::chunk_test::corpus::Corpus;
use crate::chunking::Chunk;

/// Chunk counts per size bucket, in characters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeDistribution {
    /// Chunks shorter than 200 characters.
    #[serde(rename = "<200")]
    pub tiny: usize,
    /// Chunks of 200 to 499 characters.
    #[serde(rename = "200-499")]
    pub small: usize,
    /// Chunks of 500 to 999 characters.
    #[serde(rename = "500-999")]
    pub medium: usize,
    /// Chunks of 1000 to 1999 characters.
    #[serde(rename = "1000-1999")]
    pub large: usize,
    /// Chunks of 2000 characters or more.
    #[serde(rename = "2000+")]
    pub huge: usize,
}

impl SizeDistribution {
    fn record(&mut self, characters: usize) {
        let bucket = match characters {
            0..200 => &mut self.tiny,
            200..500 => &mut self.small,
            500..1000 => &mut self.medium,
            1000..2000 => &mut self.large,
            _ => &mut self.huge,
        };
        *bucket += 1;
    }
}

/// Per-method chunk statistics reported in `chunking_comparison`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkStatistics {
    /// Number of chunks.
    pub chunk_count: usize,
    /// Characters across all chunks, overlaps counted twice.
    pub total_characters: usize,
    /// Mean chunk length.
    pub mean_characters: f64,
    /// Median chunk length.
    pub median_characters: f64,
    /// Shortest chunk.
    pub min_characters: usize,
    /// Longest chunk.
    pub max_characters: usize,
    /// Population standard deviation of chunk length.
    pub std_dev_characters: f64,
    /// Mean whitespace-separated tokens per chunk.
    pub mean_tokens: f64,
    /// Chunk counts per size bucket.
    pub size_distribution: SizeDistribution,
    /// Time spent splitting the corpus.
    pub chunking_time_ms: f64,
    /// Distinct corpus characters inside at least one chunk.
    pub covered_characters: usize,
    /// `covered_characters` over total corpus characters.
    pub coverage: f64,
}

/// Summarize `chunks` produced from `corpus`.
pub fn chunk_statistics(chunks: &[Chunk], corpus: &Corpus, elapsed: Duration) -> ChunkStatistics {
    let mut lengths: Vec<usize> = chunks.iter().map(|chunk| chunk.text.chars().count()).collect();
    let mut stats = ChunkStatistics {
        chunk_count: chunks.len(),
        chunking_time_ms: elapsed.as_secs_f64() * 1000.0,
        ..ChunkStatistics::default()
    };
    if lengths.is_empty() {
        return stats;
    }

    lengths.sort_unstable();
    let n = lengths.len() as f64;
    let total: usize = lengths.iter().sum();
    let mean = total as f64 / n;
    let mid = lengths.len() / 2;
    let median = if lengths.len() % 2 == 0 {
        (lengths[mid - 1] + lengths[mid]) as f64 / 2.0
    } else {
        lengths[mid] as f64
    };
    let variance = lengths
        .iter()
        .map(|len| (*len as f64 - mean).powi(2))
        .sum::<f64>()
        / n;

    for len in &lengths {
        stats.size_distribution.record(*len);
    }
    stats.total_characters = total;
    stats.mean_characters = mean;
    stats.median_characters = median;
    stats.min_characters = lengths[0];
    stats.max_characters = lengths[lengths.len() - 1];
    stats.std_dev_characters = variance.sqrt();
    stats.mean_tokens = chunks
        .iter()
        .map(|chunk| chunk.text.split_whitespace().count())
        .sum::<usize>() as f64
        / n;

    stats.covered_characters = covered_characters(chunks, corpus);
    let corpus_characters = corpus.total_characters();
    stats.coverage = if corpus_characters == 0 {
        0.0
    } else {
        stats.covered_characters as f64 / corpus_characters as f64
    };
    stats
}

/// Distinct characters of the corpus that fall inside some chunk span.
fn covered_characters(chunks: &[Chunk], corpus: &Corpus) -> usize {
    let mut spans: HashMap<&str, Vec<(usize, usize)>> = HashMap::new();
    for chunk in chunks {
        spans
            .entry(chunk.document_id.as_str())
            .or_default()
            .push((chunk.start, chunk.end));
    }

    let mut covered = 0;
    for document in corpus.documents() {
        let Some(ranges) = spans.get_mut(document.id.as_str()) else {
            continue;
        };
        ranges.sort_unstable();
        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
        for &(start, end) in ranges.iter() {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        for (start, end) in merged {
            if let Some(slice) = document.text.get(start..end.min(document.text.len())) {
                covered += slice.chars().count();
            }
        }
    }
    covered
}
