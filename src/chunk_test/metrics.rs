//! Retrieval quality metrics computed per query and averaged per method.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::chunk_test::corpus::EvidenceSpan;

/// Cutoffs reported for precision, recall and hit rate, bounded by the retrieval depth.
pub const K_VALUES: [usize; 4] = [1, 3, 5, 10];

/// Characters of chunk text echoed in each hit.
const PREVIEW_CHARS: usize = 160;

/// Cutoffs evaluated for a retrieval depth of `top_k`.
pub fn cutoffs(top_k: usize) -> Vec<usize> {
    let mut ks: Vec<usize> = K_VALUES.iter().copied().filter(|k| *k <= top_k).collect();
    if !ks.contains(&top_k) && top_k > 0 {
        ks.push(top_k);
    }
    ks
}

/// One ranked hit of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// 1-based rank.
    pub rank: usize,
    /// Chunk identifier.
    pub chunk_id: String,
    /// Document the chunk belongs to.
    pub document_id: String,
    /// Similarity reported by the index.
    pub score: f32,
    /// Byte offset where the chunk starts.
    pub start: usize,
    /// Byte offset one past the chunk end.
    pub end: usize,
    /// Leading characters of the chunk.
    pub preview: String,
    /// Whether the chunk overlaps ground truth; absent without ground truth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant: Option<bool>,
}

impl RetrievedChunk {
    /// Build a hit from its rank and stored chunk fields.
    pub fn new(
        rank: usize,
        chunk_id: String,
        document_id: String,
        score: f32,
        span: (usize, usize),
        text: &str,
    ) -> Self {
        Self {
            rank,
            chunk_id,
            document_id,
            score,
            start: span.0,
            end: span.1,
            preview: text.chars().take(PREVIEW_CHARS).collect(),
            relevant: None,
        }
    }
}

/// Ground-truth metrics for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    /// Relevant hits in the top k divided by k.
    pub precision_at: BTreeMap<usize, f64>,
    /// Fraction of evidence spans covered by the top k.
    pub recall_at: BTreeMap<usize, f64>,
    /// 1 when any of the top k is relevant.
    pub hit_rate_at: BTreeMap<usize, f64>,
    /// Reciprocal rank of the first relevant hit.
    pub mrr: f64,
    /// Binary-relevance nDCG over the full retrieval depth.
    pub ndcg: f64,
    /// Average precision over the full retrieval depth.
    pub average_precision: f64,
    /// Harmonic mean of precision and recall at the full retrieval depth.
    pub f1: f64,
}

impl QueryMetrics {
    /// Score `hits` against `evidence`, marking each hit's relevance.
    ///
    /// Returns the metrics and the indexes of evidence spans covered by some hit.
    pub fn score(
        hits: &mut [RetrievedChunk],
        evidence: &[EvidenceSpan<'_>],
        top_k: usize,
    ) -> (Self, BTreeSet<usize>) {
        let mut covered_by_rank: Vec<BTreeSet<usize>> = Vec::with_capacity(hits.len());
        for hit in hits.iter_mut() {
            let covered: BTreeSet<usize> = evidence
                .iter()
                .enumerate()
                .filter(|(_, span)| span.overlaps(&hit.document_id, hit.start, hit.end))
                .map(|(index, _)| index)
                .collect();
            hit.relevant = Some(!covered.is_empty());
            covered_by_rank.push(covered);
        }

        let relevant: Vec<bool> = covered_by_rank.iter().map(|set| !set.is_empty()).collect();
        let total_spans = evidence.len().max(1) as f64;
        let mut metrics = QueryMetrics::default();

        for k in cutoffs(top_k) {
            let depth = k.min(relevant.len());
            let found = relevant[..depth].iter().filter(|flag| **flag).count();
            let spans: BTreeSet<usize> = covered_by_rank[..depth].iter().flatten().copied().collect();
            metrics.precision_at.insert(k, found as f64 / k as f64);
            metrics.recall_at.insert(k, spans.len() as f64 / total_spans);
            metrics
                .hit_rate_at
                .insert(k, if found > 0 { 1.0 } else { 0.0 });
        }

        let depth = top_k.min(relevant.len());
        let ranked = &relevant[..depth];
        metrics.mrr = ranked
            .iter()
            .position(|flag| *flag)
            .map(|index| 1.0 / (index + 1) as f64)
            .unwrap_or(0.0);

        let retrieved_relevant = ranked.iter().filter(|flag| **flag).count();
        let ideal_count = evidence.len().max(retrieved_relevant);
        let dcg: f64 = ranked
            .iter()
            .enumerate()
            .filter(|(_, flag)| **flag)
            .map(|(index, _)| 1.0 / ((index + 2) as f64).log2())
            .sum();
        let idcg: f64 = (0..ideal_count.min(top_k.max(1)))
            .map(|index| 1.0 / ((index + 2) as f64).log2())
            .sum();
        metrics.ndcg = if idcg > 0.0 { dcg / idcg } else { 0.0 };

        let mut seen = 0;
        let mut precision_sum = 0.0;
        for (index, flag) in ranked.iter().enumerate() {
            if *flag {
                seen += 1;
                precision_sum += seen as f64 / (index + 1) as f64;
            }
        }
        metrics.average_precision = if ideal_count > 0 {
            precision_sum / ideal_count as f64
        } else {
            0.0
        };

        let precision = metrics.precision_at.get(&top_k).copied().unwrap_or(0.0);
        let recall = metrics.recall_at.get(&top_k).copied().unwrap_or(0.0);
        metrics.f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        let covered = covered_by_rank[..depth].iter().flatten().copied().collect();
        (metrics, covered)
    }

    /// Mean of each metric across `items`; `None` when empty.
    pub fn average(items: &[QueryMetrics]) -> Option<QueryMetrics> {
        if items.is_empty() {
            return None;
        }
        let n = items.len() as f64;
        let mean_map = |pick: fn(&QueryMetrics) -> &BTreeMap<usize, f64>| -> BTreeMap<usize, f64> {
            let mut sums: BTreeMap<usize, f64> = BTreeMap::new();
            for item in items {
                for (k, value) in pick(item) {
                    *sums.entry(*k).or_default() += value;
                }
            }
            sums.into_iter().map(|(k, sum)| (k, sum / n)).collect()
        };
        Some(QueryMetrics {
            precision_at: mean_map(|m| &m.precision_at),
            recall_at: mean_map(|m| &m.recall_at),
            hit_rate_at: mean_map(|m| &m.hit_rate_at),
            mrr: items.iter().map(|m| m.mrr).sum::<f64>() / n,
            ndcg: items.iter().map(|m| m.ndcg).sum::<f64>() / n,
            average_precision: items.iter().map(|m| m.average_precision).sum::<f64>() / n,
            f1: items.iter().map(|m| m.f1).sum::<f64>() / n,
        })
    }
}

/// Hits and metrics for one query under one method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRetrieval {
    /// Query text.
    pub query: String,
    /// Ranked hits.
    pub hits: Vec<RetrievedChunk>,
    /// Wall time of the index query in milliseconds.
    pub latency_ms: f64,
    /// Ground-truth metrics; absent when the query has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<QueryMetrics>,
    /// Evidence span indexes covered by the hits.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub covered_evidence: Vec<usize>,
}

impl QueryRetrieval {
    /// Similarity of the best hit, 0 without hits.
    pub fn top_score(&self) -> f64 {
        self.hits.first().map(|hit| f64::from(hit.score)).unwrap_or(0.0)
    }
}

/// Retrieval outcome of one method across every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodRetrieval {
    /// Per-query results in query order.
    pub per_query: Vec<QueryRetrieval>,
    /// Metrics averaged over queries with ground truth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<QueryMetrics>,
    /// Queries that had ground truth.
    pub evaluated_queries: usize,
    /// Mean similarity of the top hit across queries.
    pub mean_top_score: f64,
    /// Retrieval depth used.
    pub top_k: usize,
    /// Usage note for clients.
    pub note: String,
}

impl MethodRetrieval {
    /// Aggregate per-query results.
    pub fn new(per_query: Vec<QueryRetrieval>, top_k: usize) -> Self {
        let scored: Vec<QueryMetrics> = per_query
            .iter()
            .filter_map(|query| query.metrics.clone())
            .collect();
        let mean_top_score = if per_query.is_empty() {
            0.0
        } else {
            per_query.iter().map(QueryRetrieval::top_score).sum::<f64>() / per_query.len() as f64
        };
        Self {
            average: QueryMetrics::average(&scored),
            evaluated_queries: scored.len(),
            mean_top_score,
            top_k,
            note: "Metrics are averaged across all queries with ground truth".to_string(),
            per_query,
        }
    }
}

/// Mean pairwise cosine distance of `vectors`; `None` with fewer than two vectors.
pub fn semantic_diversity(vectors: &[&[f32]]) -> Option<f64> {
    if vectors.len() < 2 {
        return None;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in vectors.iter().enumerate() {
        for b in &vectors[i + 1..] {
            total += 1.0 - cosine(a, b);
            pairs += 1;
        }
    }
    Some(total / pairs as f64)
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Value at percentile `p` (0..=100) of `values` using nearest rank.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
