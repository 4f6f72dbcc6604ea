//! Vector store adapter trait shared by the primary and secondary backends.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::docstore::DocumentStore;
use crate::document::ChunkRecord;
use crate::error::Result;
use crate::filter::SearchFilters;
use crate::maintenance::{BackendStats, CleanupReport, OptimizeReport};
use crate::namespace::Namespace;

/// Number of characters of chunk text kept in index payloads that only
/// store a preview.
pub const PREVIEW_CHARS: usize = 500;

/// A nearest-neighbour query against one namespace.
#[derive(Debug, Clone, Copy)]
pub struct VectorQuery<'a> {
    /// The query embedding.
    pub vector: &'a [f32],
    /// Maximum number of matches to return.
    pub top_k: usize,
    /// Matches scoring below this are dropped.
    pub min_score: f32,
    /// Metadata restrictions; `filters.organization_id` always applies.
    pub filters: &'a SearchFilters,
}

/// A raw match from a vector store, before full-text resolution and highlighting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorMatch {
    /// Chunk identifier.
    pub chunk_id: String,
    /// Owning document.
    pub document_id: String,
    /// Title of the owning document.
    pub document_title: String,
    /// Position of the chunk within its document.
    pub chunk_index: u32,
    /// Chunk text as stored by the backend.
    pub text: String,
    /// Whether `text` is a truncated preview of the chunk.
    pub text_is_preview: bool,
    /// Cosine similarity mapped to `[0, 1]`.
    pub score: f32,
    /// Metadata stored with the vector.
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Truncate `text` to [`PREVIEW_CHARS`] characters on a char boundary.
///
/// Returns the preview and whether anything was cut.
pub fn preview(text: &str) -> (String, bool) {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => (text[..cut].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// Order matches by descending score, breaking ties by document and chunk so
/// identical inputs always rank identically.
pub fn sort_matches(matches: &mut [VectorMatch]) {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

/// A vector index that can serve filtered similarity queries.
///
/// The orchestrator picks between a primary and a secondary implementation
/// at runtime; both must honour the same filter and threshold semantics so
/// callers cannot tell which one served a request.
///
/// # Example
///
/// ```rust,ignore
/// use govcon_search::{InMemoryVectorStore, Namespace, VectorQuery, VectorStoreAdapter};
///
/// let store = InMemoryVectorStore::new();
/// let ns = Namespace::for_organization("org", "acme");
/// store.create_namespace(&ns, 384).await?;
/// store.upsert(&ns, &records).await?;
/// let matches = store.query(&ns, &VectorQuery { vector: &q, top_k: 5, min_score: 0.3, filters: &f }).await?;
/// ```
#[async_trait]
pub trait VectorStoreAdapter: Send + Sync {
    /// Backend name used in errors, logs and reports.
    fn name(&self) -> &str;

    /// Create a namespace. No-op if it already exists.
    async fn create_namespace(&self, namespace: &Namespace, dimensions: usize) -> Result<()>;

    /// Upsert chunk records into a namespace. Records must have embeddings set.
    async fn upsert(&self, namespace: &Namespace, records: &[ChunkRecord]) -> Result<()>;

    /// Delete chunks by their IDs from a namespace.
    async fn delete(&self, namespace: &Namespace, ids: &[&str]) -> Result<()>;

    /// Return at most `query.top_k` matches scoring at least `query.min_score`,
    /// ordered by descending score.
    async fn query(&self, namespace: &Namespace, query: &VectorQuery<'_>) -> Result<Vec<VectorMatch>>;

    /// Cheap reachability probe.
    async fn health_check(&self) -> Result<()>;

    /// Counts and orphan totals for the whole backend.
    async fn stats(&self, documents: &dyn DocumentStore) -> Result<BackendStats>;

    /// Remove vectors whose document no longer exists in `documents`.
    ///
    /// Per-document failures are recorded in the report rather than aborting.
    async fn cleanup_orphans(&self, documents: &dyn DocumentStore) -> Result<CleanupReport>;

    /// Rebuild or tune indexes where the backend supports it; otherwise
    /// return recommendations only.
    async fn optimize(&self) -> Result<OptimizeReport>;
}
