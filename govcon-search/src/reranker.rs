//! Reranker trait for re-scoring search results.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::document::SearchResult;
use crate::error::Result;

/// A reranker that re-scores and reorders search results.
///
/// The orchestrator hands it the `3 * top_k` candidate set and truncates the
/// output to `top_k` afterwards.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank search results given the original query.
    ///
    /// Returns results in a new order with potentially updated scores.
    async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> Result<Vec<SearchResult>>;
}

/// A no-op reranker that returns results unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    async fn rerank(&self, _query: &str, results: Vec<SearchResult>) -> Result<Vec<SearchResult>> {
        Ok(results)
    }
}

/// Boosts candidates whose text is dense in query terms.
///
/// Density is query-term occurrences over word count, using query terms of
/// at least three characters. Densities are normalised by the densest
/// candidate, and the new score is
/// `vector_weight * score + (1 - vector_weight) * normalised_density`.
///
/// # Example
///
/// ```rust,ignore
/// use govcon_search::KeywordDensityReranker;
///
/// let reranked = KeywordDensityReranker::default().rerank("fisma audit", results).await?;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct KeywordDensityReranker {
    vector_weight: f32,
}

impl Default for KeywordDensityReranker {
    fn default() -> Self {
        Self { vector_weight: 0.7 }
    }
}

impl KeywordDensityReranker {
    /// Create a reranker with a custom vector weight in `[0, 1]`.
    pub fn new(vector_weight: f32) -> Self {
        Self { vector_weight: vector_weight.clamp(0.0, 1.0) }
    }

    fn terms(query: &str) -> HashSet<String> {
        query
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| w.chars().count() >= 3)
            .collect()
    }

    /// Query-term occurrences per word of `text`.
    pub fn density(text: &str, terms: &HashSet<String>) -> f32 {
        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() || terms.is_empty() {
            return 0.0;
        }
        let hits = words.iter().filter(|w| terms.contains(w.as_str())).count();
        hits as f32 / words.len() as f32
    }
}

#[async_trait]
impl Reranker for KeywordDensityReranker {
    async fn rerank(&self, query: &str, mut results: Vec<SearchResult>) -> Result<Vec<SearchResult>> {
        let terms = Self::terms(query);
        let densities: Vec<f32> = results.iter().map(|r| Self::density(&r.text, &terms)).collect();
        let max = densities.iter().copied().fold(0.0f32, f32::max);

        for (result, density) in results.iter_mut().zip(densities) {
            let normalised = if max > 0.0 { density / max } else { 0.0 };
            result.score = (self.vector_weight * result.score
                + (1.0 - self.vector_weight) * normalised)
                .clamp(0.0, 1.0);
        }

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.document_id.cmp(&b.document_id))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        Ok(results)
    }
}
