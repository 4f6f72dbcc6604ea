//! Hybrid fusion of vector similarity and keyword relevance.

use serde::{Deserialize, Serialize};

use crate::document::{HybridSearchResult, SearchResult};

/// Hits at which the saturation half of the keyword score reaches 0.5.
const HIT_SATURATION: f32 = 2.0;

/// Aggregate statistics over one fused result set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HybridStats {
    /// Number of fused results.
    pub result_count: usize,
    /// Share of results with at least one keyword hit, in `[0, 1]`.
    pub keyword_hit_ratio: f32,
    /// Mean vector score.
    pub mean_vector_score: f32,
    /// Mean keyword score.
    pub mean_keyword_score: f32,
    /// Mean fused score.
    pub mean_hybrid_score: f32,
}

impl HybridStats {
    /// Compute stats over `results`. All means are zero for an empty set.
    pub fn from_results(results: &[HybridSearchResult]) -> Self {
        if results.is_empty() {
            return Self {
                result_count: 0,
                keyword_hit_ratio: 0.0,
                mean_vector_score: 0.0,
                mean_keyword_score: 0.0,
                mean_hybrid_score: 0.0,
            };
        }
        let n = results.len() as f32;
        let mean = |f: fn(&HybridSearchResult) -> f32| results.iter().map(f).sum::<f32>() / n;
        Self {
            result_count: results.len(),
            keyword_hit_ratio: results.iter().filter(|r| r.keyword_score > 0.0).count() as f32 / n,
            mean_vector_score: mean(|r| r.result.score),
            mean_keyword_score: mean(|r| r.keyword_score),
            mean_hybrid_score: mean(|r| r.hybrid_score),
        }
    }
}

/// Scores chunk text against an explicit keyword list and fuses it with the
/// vector score.
///
/// The keyword score is `0.5 * coverage + 0.5 * hits / (hits + 2)` where
/// `coverage` is the share of distinct keywords that occur at least once and
/// `hits` the total case-insensitive occurrence count. Both halves are
/// bounded and non-decreasing in the number of hits.
#[derive(Debug, Clone, Copy, Default)]
pub struct HybridScorer;

impl HybridScorer {
    /// Keyword relevance of `text` in `[0, 1]`.
    pub fn keyword_score(text: &str, keywords: &[String]) -> f32 {
        let text = text.to_lowercase();
        let mut matched = 0usize;
        let mut total = 0usize;
        let mut considered = 0usize;
        for keyword in keywords {
            let keyword = keyword.trim().to_lowercase();
            if keyword.is_empty() {
                continue;
            }
            considered += 1;
            let hits = text.matches(keyword.as_str()).count();
            if hits > 0 {
                matched += 1;
                total += hits;
            }
        }
        if considered == 0 {
            return 0.0;
        }
        let coverage = matched as f32 / considered as f32;
        let hits = total as f32;
        let saturation = hits / (hits + HIT_SATURATION);
        (0.5 * coverage + 0.5 * saturation).clamp(0.0, 1.0)
    }

    /// Fused score of one result, clamped to `[0, 1]`.
    pub fn combine(vector_score: f32, keyword_score: f32, vector_weight: f32, keyword_weight: f32) -> f32 {
        (vector_weight * vector_score + keyword_weight * keyword_score).clamp(0.0, 1.0)
    }

    /// Fuse `results` with keyword relevance and re-rank.
    ///
    /// Ordered by fused score descending, then vector score descending, then
    /// document ID and chunk index ascending.
    pub fn fuse(
        results: Vec<SearchResult>,
        keywords: &[String],
        vector_weight: f32,
        keyword_weight: f32,
    ) -> (Vec<HybridSearchResult>, HybridStats) {
        let mut fused: Vec<HybridSearchResult> = results
            .into_iter()
            .map(|result| {
                let keyword_score = Self::keyword_score(&result.text, keywords);
                let hybrid_score =
                    Self::combine(result.score, keyword_score, vector_weight, keyword_weight);
                HybridSearchResult { result, keyword_score, hybrid_score }
            })
            .collect();

        fused.sort_by(|a, b| {
            b.hybrid_score
                .total_cmp(&a.hybrid_score)
                .then_with(|| b.result.score.total_cmp(&a.result.score))
                .then_with(|| a.result.document_id.cmp(&b.result.document_id))
                .then_with(|| a.result.chunk_index.cmp(&b.result.chunk_index))
        });

        let stats = HybridStats::from_results(&fused);
        (fused, stats)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn result(doc: &str, text: &str, score: f32) -> SearchResult {
        SearchResult {
            document_id: doc.into(),
            document_title: String::new(),
            chunk_id: format!("{doc}_0"),
            chunk_index: 0,
            text: text.into(),
            score,
            metadata: HashMap::new(),
            highlights: Vec::new(),
        }
    }

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn more_hits_score_higher() {
        let keywords = kw(&["cyber"]);
        let none = HybridScorer::keyword_score("cloud hosting", &keywords);
        let one = HybridScorer::keyword_score("cyber hosting", &keywords);
        let two = HybridScorer::keyword_score("Cyber and CYBER hosting", &keywords);
        assert_eq!(none, 0.0);
        assert!(one > none);
        assert!(two > one);
        assert!(two <= 1.0);
    }

    #[test]
    fn vector_only_weights_keep_vector_order() {
        let results = vec![
            result("a", "nothing relevant", 0.9),
            result("b", "cyber cyber cyber", 0.5),
        ];
        let (fused, _) = HybridScorer::fuse(results, &kw(&["cyber"]), 1.0, 0.0);
        assert_eq!(fused[0].result.document_id, "a");
    }

    #[test]
    fn keyword_only_weights_rank_by_keyword_score() {
        let results = vec![
            result("a", "nothing relevant", 0.9),
            result("b", "cyber once", 0.6),
            result("c", "cyber cyber cyber", 0.5),
        ];
        let (fused, stats) = HybridScorer::fuse(results, &kw(&["cyber"]), 0.0, 1.0);
        let order: Vec<_> = fused.iter().map(|r| r.result.document_id.as_str()).collect();
        assert_eq!(order, ["c", "b", "a"]);
        assert_eq!(stats.result_count, 3);
        assert!((stats.keyword_hit_ratio - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn ties_fall_back_to_vector_score_then_document() {
        let results = vec![result("b", "x", 0.5), result("a", "x", 0.5), result("c", "x", 0.6)];
        let (fused, _) = HybridScorer::fuse(results, &kw(&["zzz"]), 0.0, 1.0);
        let order: Vec<_> = fused.iter().map(|r| r.result.document_id.as_str()).collect();
        assert_eq!(order, ["c", "a", "b"]);
    }

    #[test]
    fn empty_stats_are_zero() {
        let stats = HybridStats::from_results(&[]);
        assert_eq!(stats.result_count, 0);
        assert_eq!(stats.mean_hybrid_score, 0.0);
    }
}
