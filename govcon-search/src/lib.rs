//! Semantic document search for government-contracting workspaces.
//!
//! This crate provides:
//! - A query embedding client with a hard deadline and classified errors
//! - Per-organization namespaces in the primary vector index
//! - Primary (Qdrant) and secondary (pgvector) vector store adapters behind
//!   one [`VectorStoreAdapter`] trait, plus an in-memory adapter
//! - A search orchestrator with fallback, result caching, rerank and
//!   hybrid keyword fusion under a single request budget
//! - Index maintenance: stats, orphan cleanup and optimization
//!
//! Backends are feature gated: `openai`, `qdrant`, `pgvector`, or `full`.

pub mod cache;
pub mod config;
pub mod docstore;
pub mod document;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod hybrid;
pub mod hydrate;
pub mod inmemory;
pub mod maintenance;
pub mod namespace;
pub mod orchestrator;
pub mod reranker;
pub mod telemetry;
pub mod vectorstore;

#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "pgvector")]
pub mod pgvector;
#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use cache::{CacheGeneration, CachedSearch, ResultCache, cache_key};
pub use config::{SearchConfig, SearchConfigBuilder};
pub use docstore::{DocumentStore, InMemoryDocumentStore};
pub use document::{
    ChunkRecord, DocumentChunk, HybridSearchResult, ResultSource, SearchHits, SearchResponse,
    SearchResult,
};
pub use embedding::{EmbeddingClient, EmbeddingProvider};
pub use error::{Result, SearchError};
pub use filter::{DateRange, SearchFilters, SearchOptions};
pub use hybrid::{HybridScorer, HybridStats};
pub use hydrate::ResultHydrator;
pub use inmemory::InMemoryVectorStore;
pub use maintenance::{
    BackendStats, CleanupReport, CleanupSummary, HealthLevel, IndexMaintenance, IndexStats,
    OptimizeReport,
};
pub use namespace::{Namespace, NamespaceResolver};
pub use orchestrator::{FallbackMode, HealthStatus, SearchOrchestrator, SearchOrchestratorBuilder};
pub use reranker::{KeywordDensityReranker, NoOpReranker, Reranker};
pub use telemetry::init_tracing;
pub use vectorstore::{VectorMatch, VectorQuery, VectorStoreAdapter};

#[cfg(feature = "openai")]
pub use openai::OpenAIEmbeddingProvider;
#[cfg(feature = "pgvector")]
pub use pgvector::{PgDocumentStore, PgVectorStore};
#[cfg(feature = "qdrant")]
pub use qdrant::QdrantVectorStore;
