//! Data types for indexed chunks, document chunks, and search results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An indexed slice of a document together with its embedding and the
/// attributes search filters operate on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    /// Unique identifier for the chunk.
    pub id: String,
    /// The organization that owns the parent document.
    pub organization_id: String,
    /// The ID of the parent document.
    pub document_id: String,
    /// Title of the parent document.
    pub document_title: String,
    /// Position of the chunk within its document.
    pub chunk_index: u32,
    /// The text content of the chunk.
    pub text: String,
    /// The vector embedding for this chunk's text.
    pub embedding: Vec<f32>,
    /// Document type (e.g. `rfp`, `proposal`, `capability_statement`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    /// NAICS codes attached to the parent document.
    #[serde(default)]
    pub naics_codes: Vec<String>,
    /// Free-form tags attached to the parent document.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Publication or upload date of the parent document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Any additional metadata carried through to search results.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A chunk as stored in the authoritative document store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentChunk {
    /// Position of the chunk within its document.
    pub chunk_index: u32,
    /// Full chunk text.
    pub content: String,
}

/// One matched chunk returned by a search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The ID of the document that owns the chunk.
    pub document_id: String,
    /// Title of the owning document.
    pub document_title: String,
    /// Unique identifier of the chunk.
    pub chunk_id: String,
    /// Position of the chunk within its document.
    pub chunk_index: u32,
    /// Full chunk text.
    pub text: String,
    /// Similarity score in `[0, 1]` (higher is more relevant).
    pub score: f32,
    /// Metadata carried from the index; empty when metadata was not requested.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Up to three sentences of the chunk that mention query words.
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// A [`SearchResult`] re-scored by hybrid fusion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HybridSearchResult {
    /// The underlying vector result; `result.score` is the vector score.
    #[serde(flatten)]
    pub result: SearchResult,
    /// Keyword relevance in `[0, 1]`.
    pub keyword_score: f32,
    /// Fused score in `[0, 1]`.
    pub hybrid_score: f32,
}

/// The ranked hits of a search, plain or fused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "results", rename_all = "snake_case")]
pub enum SearchHits {
    /// Results ranked by vector similarity (optionally reranked).
    Vector(Vec<SearchResult>),
    /// Results ranked by fused vector and keyword score.
    Hybrid(Vec<HybridSearchResult>),
}

impl SearchHits {
    /// Number of hits.
    pub fn len(&self) -> usize {
        match self {
            Self::Vector(r) => r.len(),
            Self::Hybrid(r) => r.len(),
        }
    }

    /// Whether there are no hits.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chunk IDs in rank order.
    pub fn chunk_ids(&self) -> Vec<&str> {
        match self {
            Self::Vector(r) => r.iter().map(|r| r.chunk_id.as_str()).collect(),
            Self::Hybrid(r) => r.iter().map(|r| r.result.chunk_id.as_str()).collect(),
        }
    }

    /// The vector-level view of every hit, in rank order.
    pub fn results(&self) -> Vec<&SearchResult> {
        match self {
            Self::Vector(r) => r.iter().collect(),
            Self::Hybrid(r) => r.iter().map(|r| &r.result).collect(),
        }
    }
}

/// Which path produced a [`SearchResponse`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// A fresh cache entry.
    Cache,
    /// An expired cache entry, served because every backend failed.
    StaleCache,
    /// The primary vector store.
    Primary,
    /// The secondary vector store.
    Secondary,
}

/// The response envelope of [`SearchOrchestrator::search`](crate::SearchOrchestrator::search).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    /// Ranked hits.
    pub hits: SearchHits,
    /// Which path served the request.
    pub source: ResultSource,
    /// Fusion statistics, present when hybrid scoring ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hybrid_stats: Option<crate::hybrid::HybridStats>,
}
