//! Turning raw vector matches into [`SearchResult`]s.
//!
//! Both vector store backends feed their matches through the same
//! [`ResultHydrator`], which applies the score threshold, swaps index
//! previews for the full chunk text, and extracts highlight sentences. Doing
//! this in one place keeps primary and fallback responses indistinguishable.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::warn;

use crate::docstore::DocumentStore;
use crate::document::SearchResult;
use crate::vectorstore::{VectorMatch, sort_matches};

/// Maximum number of highlight sentences per result.
pub const MAX_HIGHLIGHTS: usize = 3;

/// Lower-cased query words used for highlighting. Words shorter than two
/// characters are ignored.
pub fn query_words(query: &str) -> Vec<String> {
    let mut words: Vec<String> = query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.chars().count() >= 2)
        .collect();
    words.dedup();
    words
}

/// Split `text` into sentences on `.`, `!`, `?` and line breaks.
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Up to [`MAX_HIGHLIGHTS`] sentences of `text` that contain at least one of
/// `words` (case-insensitive substring match), in document order.
pub fn extract_highlights(text: &str, words: &[String]) -> Vec<String> {
    if words.is_empty() {
        return Vec::new();
    }
    split_sentences(text)
        .into_iter()
        .filter(|sentence| {
            let lower = sentence.to_lowercase();
            words.iter().any(|w| lower.contains(w.as_str()))
        })
        .take(MAX_HIGHLIGHTS)
        .map(str::to_string)
        .collect()
}

/// Resolves full chunk text and builds final results.
#[derive(Clone)]
pub struct ResultHydrator {
    documents: Arc<dyn DocumentStore>,
}

impl ResultHydrator {
    /// Create a hydrator reading full text from `documents`.
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    /// The document store used for full-text lookups.
    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Build results from `matches`.
    ///
    /// Matches under `min_score` are dropped, scores are clamped to `[0, 1]`,
    /// and the output is ordered by descending score with deterministic tie
    /// breaks. When the document store cannot supply a preview's full text the
    /// preview is kept and a warning is logged; this never fails the query.
    pub async fn hydrate(
        &self,
        mut matches: Vec<VectorMatch>,
        query: &str,
        min_score: f32,
        include_metadata: bool,
    ) -> Vec<SearchResult> {
        matches.retain(|m| m.score >= min_score);
        for m in &mut matches {
            m.score = m.score.clamp(0.0, 1.0);
        }
        sort_matches(&mut matches);

        let full_text = self.resolve_full_text(&matches).await;
        let words = query_words(query);

        matches
            .into_iter()
            .map(|m| {
                let text = if m.text_is_preview {
                    full_text
                        .get(&(m.document_id.clone(), m.chunk_index))
                        .cloned()
                        .unwrap_or_else(|| {
                            warn!(
                                document_id = %m.document_id,
                                chunk_index = m.chunk_index,
                                "full chunk text unavailable, using preview"
                            );
                            m.text.clone()
                        })
                } else {
                    m.text.clone()
                };
                let highlights = extract_highlights(&text, &words);
                SearchResult {
                    document_id: m.document_id,
                    document_title: m.document_title,
                    chunk_id: m.chunk_id,
                    chunk_index: m.chunk_index,
                    text,
                    score: m.score,
                    metadata: if include_metadata { m.metadata } else { HashMap::new() },
                    highlights,
                }
            })
            .collect()
    }

    /// Fetch chunk lists for every document that only has previews, one
    /// request per document, concurrently.
    async fn resolve_full_text(&self, matches: &[VectorMatch]) -> HashMap<(String, u32), String> {
        let mut seen = HashSet::new();
        let documents: Vec<&str> = matches
            .iter()
            .filter(|m| m.text_is_preview)
            .map(|m| m.document_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect();
        if documents.is_empty() {
            return HashMap::new();
        }

        let fetched = join_all(documents.iter().map(|id| async move {
            (*id, self.documents.get_document_chunks(id).await)
        }))
        .await;

        let mut out = HashMap::new();
        for (document_id, result) in fetched {
            match result {
                Ok(chunks) => {
                    for chunk in chunks {
                        out.insert((document_id.to_string(), chunk.chunk_index), chunk.content);
                    }
                }
                Err(e) => {
                    warn!(document_id, error = %e, "failed to load document chunks");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::docstore::InMemoryDocumentStore;
    use crate::document::DocumentChunk;
    use crate::error::{Result, SearchError};

    fn vm(doc: &str, idx: u32, text: &str, preview: bool, score: f32) -> VectorMatch {
        VectorMatch {
            chunk_id: format!("{doc}_{idx}"),
            document_id: doc.into(),
            document_title: format!("{doc} title"),
            chunk_index: idx,
            text: text.into(),
            text_is_preview: preview,
            score,
            metadata: HashMap::from([("source".to_string(), serde_json::json!("sam.gov"))]),
        }
    }

    #[test]
    fn highlights_keep_matching_sentences_only() {
        let text = "FISMA compliance audit for cloud systems. Budget is fixed! \
                    Staff must hold clearances? Annual fisma review required.";
        let words = query_words("FISMA compliance");
        let highlights = extract_highlights(text, &words);
        assert_eq!(
            highlights,
            ["FISMA compliance audit for cloud systems.", "Annual fisma review required."]
        );
    }

    #[test]
    fn highlights_are_capped_at_three() {
        let text = "cloud one. cloud two. cloud three. cloud four.";
        assert_eq!(extract_highlights(text, &query_words("cloud")).len(), MAX_HIGHLIGHTS);
    }

    #[test]
    fn query_words_ignore_punctuation_and_single_letters() {
        assert_eq!(query_words("FISMA, a (cloud)"), ["fisma", "cloud"]);
    }

    #[tokio::test]
    async fn previews_are_replaced_with_full_text() {
        let docs = Arc::new(InMemoryDocumentStore::new());
        docs.insert_document(
            "doc-1",
            vec![DocumentChunk { chunk_index: 0, content: "Full FISMA text here.".into() }],
        )
        .await;
        let hydrator = ResultHydrator::new(docs);

        let results = hydrator
            .hydrate(vec![vm("doc-1", 0, "Full FISMA", true, 0.9)], "fisma", 0.0, true)
            .await;
        assert_eq!(results[0].text, "Full FISMA text here.");
        assert_eq!(results[0].highlights, ["Full FISMA text here."]);
    }

    struct Broken;

    #[async_trait]
    impl DocumentStore for Broken {
        async fn get_document_chunks(&self, _id: &str) -> Result<Vec<DocumentChunk>> {
            Err(SearchError::DocumentStoreError("connection reset".into()))
        }

        async fn existing_document_ids(&self, _ids: &[String]) -> Result<HashSet<String>> {
            Err(SearchError::DocumentStoreError("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn store_failure_falls_back_to_preview() {
        let hydrator = ResultHydrator::new(Arc::new(Broken));
        let results = hydrator
            .hydrate(vec![vm("doc-1", 0, "Preview text", true, 0.9)], "preview", 0.0, true)
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "Preview text");
    }

    #[tokio::test]
    async fn threshold_and_metadata_flags_apply() {
        let hydrator = ResultHydrator::new(Arc::new(InMemoryDocumentStore::new()));
        let results = hydrator
            .hydrate(
                vec![vm("doc-1", 0, "a", false, 0.2), vm("doc-2", 0, "b", false, 0.8)],
                "query",
                0.5,
                false,
            )
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "doc-2");
        assert!(results[0].metadata.is_empty());
    }
}
