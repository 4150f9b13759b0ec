//! Cross-method summary and deeper evaluation of a finished chunk test.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::chunk_test::metrics::{MethodRetrieval, QueryMetrics, percentile};
use crate::chunk_test::stats::ChunkStatistics;
use crate::chunking::ChunkingMethod;

/// What the composite score was computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBasis {
    /// Weighted precision, recall, MRR and nDCG against evidence spans.
    GroundTruth,
    /// Mean similarity of the top hit.
    #[default]
    Similarity,
}

/// Methods at the extremes of the chunk statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkingExtremes {
    /// Method producing the most chunks.
    pub most_chunks: Option<ChunkingMethod>,
    /// Method producing the fewest chunks.
    pub fewest_chunks: Option<ChunkingMethod>,
    /// Method with the largest mean chunk.
    pub largest_chunks: Option<ChunkingMethod>,
    /// Method with the smallest mean chunk.
    pub smallest_chunks: Option<ChunkingMethod>,
    /// Method that chunked the corpus fastest.
    pub fastest: Option<ChunkingMethod>,
}

/// Aggregate scores and winners across methods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    /// Composite retrieval score per succeeded method.
    pub composite_scores: BTreeMap<ChunkingMethod, f64>,
    /// Inputs of the composite score.
    pub score_basis: ScoreBasis,
    /// Method with the best composite score.
    pub retrieval_winner: Option<ChunkingMethod>,
    /// Best method for each individual metric.
    pub best_by_metric: BTreeMap<String, ChunkingMethod>,
    /// Chunk statistic extremes.
    pub chunking: ChunkingExtremes,
    /// Composite score gap between the winner and each method.
    pub deltas_to_winner: BTreeMap<ChunkingMethod, f64>,
    /// Human-readable findings.
    pub recommendations: Vec<String>,
}

/// Deeper per-method measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodEvaluation {
    /// Fraction of corpus characters inside some chunk.
    pub coverage: f64,
    /// Distinct characters covered over total chunk characters (1.0 means no overlap).
    pub storage_efficiency: f64,
    /// Mean pairwise cosine distance of retrieved chunks, averaged over queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_diversity: Option<f64>,
    /// Mean index query latency.
    pub mean_latency_ms: f64,
    /// 95th percentile index query latency.
    pub p95_latency_ms: f64,
}

/// Head-to-head comparison when exactly two methods succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossMethodComparison {
    /// First method in submission order.
    pub method_a: ChunkingMethod,
    /// Second method in submission order.
    pub method_b: ChunkingMethod,
    /// Jaccard similarity of chunk end offsets.
    pub boundary_agreement: f64,
    /// Evidence spans retrieved only by `method_a`.
    pub evidence_only_in_a: usize,
    /// Evidence spans retrieved only by `method_b`.
    pub evidence_only_in_b: usize,
}

/// `evaluation_results` of a chunk test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResults {
    /// Measurements per succeeded method.
    pub per_method: BTreeMap<ChunkingMethod, MethodEvaluation>,
    /// Two-method comparison, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_method: Option<CrossMethodComparison>,
}

/// Everything a succeeded method produced.
#[derive(Debug, Clone)]
pub struct MethodRun {
    /// Method that ran.
    pub method: ChunkingMethod,
    /// Chunk statistics.
    pub stats: ChunkStatistics,
    /// Retrieval results.
    pub retrieval: MethodRetrieval,
    /// `(document_id, end)` of every chunk.
    pub boundaries: HashSet<(String, usize)>,
    /// Mean semantic diversity of retrieved chunks.
    pub diversity: Option<f64>,
}

const WEIGHT_PRECISION: f64 = 0.3;
const WEIGHT_RECALL: f64 = 0.3;
const WEIGHT_MRR: f64 = 0.2;
const WEIGHT_NDCG: f64 = 0.2;

fn composite(average: &QueryMetrics, top_k: usize) -> f64 {
    WEIGHT_PRECISION * average.precision_at.get(&top_k).copied().unwrap_or(0.0)
        + WEIGHT_RECALL * average.recall_at.get(&top_k).copied().unwrap_or(0.0)
        + WEIGHT_MRR * average.mrr
        + WEIGHT_NDCG * average.ndcg
}

/// First method in `runs` order with the highest `score`.
fn best_by<F>(runs: &[MethodRun], score: F) -> Option<ChunkingMethod>
where
    F: Fn(&MethodRun) -> Option<f64>,
{
    let mut best: Option<(ChunkingMethod, f64)> = None;
    for run in runs {
        if let Some(value) = score(run)
            && best.is_none_or(|(_, current)| value > current)
        {
            best = Some((run.method, value));
        }
    }
    best.map(|(method, _)| method)
}

/// Build the summary for the succeeded `runs` (in submission order).
pub fn summarize(
    runs: &[MethodRun],
    failures: &BTreeMap<ChunkingMethod, String>,
    top_k: usize,
) -> TestSummary {
    let mut summary = TestSummary::default();
    let graded = runs.iter().any(|run| run.retrieval.average.is_some());
    summary.score_basis = if graded {
        ScoreBasis::GroundTruth
    } else {
        ScoreBasis::Similarity
    };

    for run in runs {
        let score = match (&run.retrieval.average, graded) {
            (Some(average), true) => composite(average, top_k),
            (None, true) => 0.0,
            (_, false) => run.retrieval.mean_top_score,
        };
        summary.composite_scores.insert(run.method, score);
    }
    summary.retrieval_winner = best_by(runs, |run| summary.composite_scores.get(&run.method).copied());

    if let Some(winner) = summary.retrieval_winner {
        let top = summary.composite_scores[&winner];
        for (method, score) in &summary.composite_scores {
            summary.deltas_to_winner.insert(*method, top - score);
        }
    }

    let mut metric = |name: String, pick: &dyn Fn(&QueryMetrics) -> f64| {
        if let Some(method) = best_by(runs, |run| run.retrieval.average.as_ref().map(pick)) {
            summary.best_by_metric.insert(name, method);
        }
    };
    if graded {
        metric(format!("precision@{top_k}"), &|m| {
            m.precision_at.get(&top_k).copied().unwrap_or(0.0)
        });
        metric(format!("recall@{top_k}"), &|m| {
            m.recall_at.get(&top_k).copied().unwrap_or(0.0)
        });
        metric("mrr".into(), &|m| m.mrr);
        metric(format!("ndcg@{top_k}"), &|m| m.ndcg);
        metric("map".into(), &|m| m.average_precision);
        metric(format!("f1@{top_k}"), &|m| m.f1);
    }
    if let Some(method) = best_by(runs, |run| Some(run.retrieval.mean_top_score)) {
        summary.best_by_metric.insert("mean_top_score".into(), method);
    }

    summary.chunking = ChunkingExtremes {
        most_chunks: best_by(runs, |run| Some(run.stats.chunk_count as f64)),
        fewest_chunks: best_by(runs, |run| Some(-(run.stats.chunk_count as f64))),
        largest_chunks: best_by(runs, |run| Some(run.stats.mean_characters)),
        smallest_chunks: best_by(runs, |run| Some(-run.stats.mean_characters)),
        fastest: best_by(runs, |run| Some(-run.stats.chunking_time_ms)),
    };

    summary.recommendations = recommendations(&summary, runs, failures);
    summary
}

fn recommendations(
    summary: &TestSummary,
    runs: &[MethodRun],
    failures: &BTreeMap<ChunkingMethod, String>,
) -> Vec<String> {
    let mut notes = Vec::new();
    if let Some(winner) = summary.retrieval_winner {
        let score = summary.composite_scores[&winner];
        notes.push(match summary.score_basis {
            ScoreBasis::GroundTruth => {
                format!("{winner} shows the best retrieval performance (composite {score:.3})")
            }
            ScoreBasis::Similarity => format!(
                "{winner} returns the most similar top hits (mean similarity {score:.3}); \
                 supply ground truth for a quality comparison"
            ),
        });
    }
    if runs.len() > 1
        && let (Some(most), Some(fewest)) = (summary.chunking.most_chunks, summary.chunking.fewest_chunks)
        && most != fewest
    {
        notes.push(format!(
            "{fewest} produces the fewest chunks; {most} splits the corpus most finely"
        ));
    }
    for run in runs {
        if run.stats.coverage < 0.9 {
            notes.push(format!(
                "{} leaves {:.0}% of the corpus outside any chunk",
                run.method,
                (1.0 - run.stats.coverage) * 100.0
            ));
        }
    }
    for (method, cause) in failures {
        notes.push(format!("{method} failed: {cause}"));
    }
    notes
}

/// Deeper evaluation of the succeeded `runs`; `None` without any.
pub fn evaluate(runs: &[MethodRun]) -> Option<EvaluationResults> {
    if runs.is_empty() {
        return None;
    }
    let per_method = runs
        .iter()
        .map(|run| {
            let latencies: Vec<f64> = run
                .retrieval
                .per_query
                .iter()
                .map(|query| query.latency_ms)
                .collect();
            let mean_latency_ms = if latencies.is_empty() {
                0.0
            } else {
                latencies.iter().sum::<f64>() / latencies.len() as f64
            };
            let storage_efficiency = if run.stats.total_characters == 0 {
                0.0
            } else {
                run.stats.covered_characters as f64 / run.stats.total_characters as f64
            };
            (
                run.method,
                MethodEvaluation {
                    coverage: run.stats.coverage,
                    storage_efficiency,
                    semantic_diversity: run.diversity,
                    mean_latency_ms,
                    p95_latency_ms: percentile(&latencies, 95.0),
                },
            )
        })
        .collect();

    let cross_method = match runs {
        [a, b] => Some(compare_pair(a, b)),
        _ => None,
    };

    Some(EvaluationResults {
        per_method,
        cross_method,
    })
}

fn compare_pair(a: &MethodRun, b: &MethodRun) -> CrossMethodComparison {
    let union = a.boundaries.union(&b.boundaries).count();
    let shared = a.boundaries.intersection(&b.boundaries).count();
    let boundary_agreement = if union == 0 {
        0.0
    } else {
        shared as f64 / union as f64
    };

    let mut only_a = 0;
    let mut only_b = 0;
    for (left, right) in a.retrieval.per_query.iter().zip(&b.retrieval.per_query) {
        let left: BTreeSet<usize> = left.covered_evidence.iter().copied().collect();
        let right: BTreeSet<usize> = right.covered_evidence.iter().copied().collect();
        only_a += left.difference(&right).count();
        only_b += right.difference(&left).count();
    }

    CrossMethodComparison {
        method_a: a.method,
        method_b: b.method,
        boundary_agreement,
        evidence_only_in_a: only_a,
        evidence_only_in_b: only_b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_test::metrics::QueryRetrieval;

    fn run(method: ChunkingMethod, mrr: Option<f64>, top: f64, chunks: usize) -> MethodRun {
        let metrics = mrr.map(|mrr| QueryMetrics {
            precision_at: BTreeMap::from([(5, mrr / 2.0)]),
            recall_at: BTreeMap::from([(5, mrr)]),
            hit_rate_at: BTreeMap::from([(5, 1.0)]),
            mrr,
            ndcg: mrr,
            average_precision: mrr,
            f1: mrr,
        });
        let query = QueryRetrieval {
            query: "q".into(),
            hits: Vec::new(),
            latency_ms: 2.0,
            metrics,
            covered_evidence: if mrr.is_some() { vec![0] } else { Vec::new() },
        };
        let mut retrieval = MethodRetrieval::new(vec![query], 5);
        retrieval.mean_top_score = top;
        MethodRun {
            method,
            stats: ChunkStatistics {
                chunk_count: chunks,
                total_characters: 100,
                covered_characters: 80,
                coverage: 1.0,
                ..ChunkStatistics::default()
            },
            retrieval,
            boundaries: (0..chunks).map(|end| ("d1".to_string(), end * 10)).collect(),
            diversity: Some(0.4),
        }
    }

    #[test]
    fn ground_truth_composite_picks_the_winner() {
        let runs = vec![
            run(ChunkingMethod::FixedSize, Some(0.5), 0.9, 4),
            run(ChunkingMethod::Semantic, Some(1.0), 0.7, 2),
        ];
        let summary = summarize(&runs, &BTreeMap::new(), 5);
        assert_eq!(summary.score_basis, ScoreBasis::GroundTruth);
        assert_eq!(summary.retrieval_winner, Some(ChunkingMethod::Semantic));
        let semantic = summary.composite_scores[&ChunkingMethod::Semantic];
        assert!((semantic - (0.3 * 0.5 + 0.3 + 0.2 + 0.2)).abs() < 1e-9);
        assert_eq!(summary.deltas_to_winner[&ChunkingMethod::Semantic], 0.0);
        assert_eq!(summary.best_by_metric["mrr"], ChunkingMethod::Semantic);
        assert_eq!(summary.best_by_metric["mean_top_score"], ChunkingMethod::FixedSize);
        assert_eq!(summary.chunking.fewest_chunks, Some(ChunkingMethod::Semantic));
        assert!(summary.recommendations[0].starts_with("semantic shows the best"));
    }

    #[test]
    fn similarity_fallback_without_ground_truth() {
        let runs = vec![
            run(ChunkingMethod::Paragraph, None, 0.6, 3),
            run(ChunkingMethod::Sentence, None, 0.8, 5),
        ];
        let failures = BTreeMap::from([(ChunkingMethod::Recursive, "index down".to_string())]);
        let summary = summarize(&runs, &failures, 5);
        assert_eq!(summary.score_basis, ScoreBasis::Similarity);
        assert_eq!(summary.retrieval_winner, Some(ChunkingMethod::Sentence));
        assert!(!summary.best_by_metric.contains_key("mrr"));
        assert!(summary
            .recommendations
            .iter()
            .any(|note| note == "recursive failed: index down"));
    }

    #[test]
    fn ties_go_to_the_earlier_method() {
        let runs = vec![
            run(ChunkingMethod::Sentence, None, 0.5, 3),
            run(ChunkingMethod::FixedSize, None, 0.5, 3),
        ];
        let summary = summarize(&runs, &BTreeMap::new(), 5);
        assert_eq!(summary.retrieval_winner, Some(ChunkingMethod::Sentence));
    }

    #[test]
    fn evaluation_compares_exactly_two_methods() {
        let runs = vec![
            run(ChunkingMethod::FixedSize, Some(1.0), 0.9, 4),
            run(ChunkingMethod::Semantic, None, 0.7, 2),
        ];
        let evaluation = evaluate(&runs).unwrap();
        let fixed = &evaluation.per_method[&ChunkingMethod::FixedSize];
        assert!((fixed.storage_efficiency - 0.8).abs() < 1e-9);
        assert!((fixed.p95_latency_ms - 2.0).abs() < 1e-9);

        let cross = evaluation.cross_method.unwrap();
        assert!((cross.boundary_agreement - 0.5).abs() < 1e-9);
        assert_eq!(cross.evidence_only_in_a, 1);
        assert_eq!(cross.evidence_only_in_b, 0);

        assert!(evaluate(&runs[..1]).unwrap().cross_method.is_none());
        assert!(evaluate(&[]).is_none());
    }
}
