//! Search orchestrator.
//!
//! The [`SearchOrchestrator`] drives every search request through
//! `cache check → embed → primary query → (fallback) → post-process` under a
//! single wall-clock budget, and exposes the health and maintenance entry
//! points used by operators and scheduled jobs.
//!
//! # Example
//!
//! ```rust,ignore
//! use govcon_search::{SearchOrchestrator, SearchConfig, SearchFilters, SearchOptions};
//!
//! let orchestrator = SearchOrchestrator::builder()
//!     .config(SearchConfig::default())
//!     .embedding_provider(Arc::new(embedder))
//!     .primary_store(Arc::new(qdrant))
//!     .secondary_store(Arc::new(pgvector))   // optional
//!     .document_store(Arc::new(documents))
//!     .build()?;
//!
//! let filters = SearchFilters::for_organization("acme").with_naics_codes(["541512"]);
//! let response = orchestrator.search("FISMA compliance", &filters, &SearchOptions::default()).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::cache::{CachedSearch, ResultCache};
use crate::config::SearchConfig;
use crate::docstore::DocumentStore;
use crate::document::{ChunkRecord, ResultSource, SearchHits, SearchResponse, SearchResult};
use crate::embedding::{EmbeddingClient, EmbeddingProvider};
use crate::error::{Result, SearchError};
use crate::filter::{SearchFilters, SearchOptions};
use crate::hybrid::HybridScorer;
use crate::hydrate::ResultHydrator;
use crate::maintenance::{CleanupSummary, IndexMaintenance, IndexStats, OptimizeReport};
use crate::namespace::{Namespace, NamespaceResolver};
use crate::reranker::{KeywordDensityReranker, Reranker};
use crate::vectorstore::{VectorQuery, VectorStoreAdapter};

/// Which vector store the orchestrator sends queries to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Primary first, secondary on timeout or error.
    #[default]
    Auto,
    /// Primary only; failures are never retried on the secondary.
    ForcePrimary,
    /// Skip the primary entirely.
    ForceSecondary,
}

impl FallbackMode {
    fn to_u8(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::ForcePrimary => 1,
            Self::ForceSecondary => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::ForcePrimary,
            2 => Self::ForceSecondary,
            _ => Self::Auto,
        }
    }
}

/// Reachability report returned by [`SearchOrchestrator::health_check`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    /// The primary store answered its probe.
    pub primary_available: bool,
    /// A secondary store is configured and answered its probe.
    pub secondary_available: bool,
    /// Fallback is enabled and a secondary store is configured.
    pub fallback_enabled: bool,
    /// The current routing override.
    pub fallback_mode: FallbackMode,
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn primary_error(e: SearchError) -> SearchError {
    match e {
        SearchError::VectorStoreError { backend, message } => {
            SearchError::PrimaryStoreError { backend, message }
        }
        other => other,
    }
}

fn secondary_error(e: SearchError) -> SearchError {
    match e {
        SearchError::VectorStoreError { backend, message } => {
            SearchError::SecondaryStoreError { backend, message }
        }
        other => other,
    }
}

/// The search orchestrator.
///
/// One instance per process. Holds the only shared mutable state of the
/// subsystem: the result cache, the namespace map and the fallback mode.
/// Construct one via [`SearchOrchestrator::builder()`].
pub struct SearchOrchestrator {
    config: SearchConfig,
    embedder: EmbeddingClient,
    namespaces: NamespaceResolver,
    primary: Arc<dyn VectorStoreAdapter>,
    secondary: Option<Arc<dyn VectorStoreAdapter>>,
    hydrator: ResultHydrator,
    reranker: Arc<dyn Reranker>,
    cache: Arc<ResultCache>,
    maintenance: IndexMaintenance,
    fallback_mode: AtomicU8,
}

impl SearchOrchestrator {
    /// Create a new [`SearchOrchestratorBuilder`].
    pub fn builder() -> SearchOrchestratorBuilder {
        SearchOrchestratorBuilder::default()
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Return the result cache.
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Return the namespace resolver.
    pub fn namespaces(&self) -> &NamespaceResolver {
        &self.namespaces
    }

    /// Return the maintenance service.
    pub fn maintenance(&self) -> &IndexMaintenance {
        &self.maintenance
    }

    /// The current routing override.
    pub fn fallback_mode(&self) -> FallbackMode {
        FallbackMode::from_u8(self.fallback_mode.load(Ordering::Relaxed))
    }

    /// Change the routing override. Takes effect for requests that start
    /// after the call; in-flight requests keep their route.
    pub fn set_fallback_mode(&self, mode: FallbackMode) {
        info!(?mode, "fallback mode changed");
        self.fallback_mode.store(mode.to_u8(), Ordering::Relaxed);
    }

    /// Search an organization's documents.
    ///
    /// # Errors
    ///
    /// - [`SearchError::InvalidRequest`] for a blank query or invalid
    ///   filters/options. No backend is contacted.
    /// - An embedding error when the query cannot be embedded and no stale
    ///   result is cached.
    /// - [`SearchError::SearchUnavailable`] when neither store produced a
    ///   result and no stale result is cached.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let span = info_span!(
            "search",
            organization_id = %filters.organization_id,
            document_scoped = filters.is_document_scoped(),
            hybrid = options.hybrid,
        );
        self.run_search(query, filters, options).instrument(span).await
    }

    async fn run_search(
        &self,
        query: &str,
        filters: &SearchFilters,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidRequest("query must not be empty".to_string()));
        }
        filters.validate()?;
        options.validate(self.config.max_top_k)?;

        let started = Instant::now();
        let budget = if filters.is_document_scoped() {
            self.config.document_timeout()
        } else {
            self.config.open_timeout()
        };
        let deadline = started + budget;
        let cacheable = self.cache.should_cache(query, filters, options);
        let generation = self.cache.generation(&filters.organization_id).await;

        if cacheable {
            if let Some(cached) = self.cache.get(query, filters, options).await {
                debug!(result_count = cached.hits.len(), "served from cache");
                return Ok(Self::respond(cached, ResultSource::Cache));
            }
        }

        let vector = match self.embedder.embed_within(query, remaining(deadline)).await {
            Ok(vector) => vector,
            Err(e) => {
                if let Some(stale) = self.stale(query, filters, options, cacheable).await {
                    warn!(error = %e, "embedding failed, serving stale cached results");
                    return Ok(stale);
                }
                error!(error = %e, "query embedding failed");
                return Err(e);
            }
        };

        let (results, source) = match (self.fallback_mode(), &self.secondary) {
            (FallbackMode::ForceSecondary, None) => {
                return Err(SearchError::unavailable(
                    "forced fallback requested but no secondary store is configured",
                    None,
                    None,
                ));
            }
            (FallbackMode::ForceSecondary, Some(secondary)) => {
                debug!(backend = secondary.name(), "forced fallback, skipping primary store");
                match self.query_secondary(secondary, query, &vector, filters, options, deadline).await {
                    Ok(results) => (results, ResultSource::Secondary),
                    Err(e) if e.is_invalid_request() => return Err(e),
                    Err(e) => {
                        if let Some(stale) = self.stale(query, filters, options, cacheable).await {
                            warn!(error = %e, "secondary store failed, serving stale cached results");
                            return Ok(stale);
                        }
                        error!(error = %e, "secondary vector store failed");
                        return Err(SearchError::unavailable(
                            "secondary vector store failed",
                            None,
                            Some(e),
                        ));
                    }
                }
            }
            (mode, secondary) => {
                let fallback = match secondary {
                    Some(store) if mode == FallbackMode::Auto && self.config.fallback_enabled => {
                        Some(store)
                    }
                    _ => None,
                };
                // Leave the fallback at least half of what is left.
                let primary_deadline = if fallback.is_some() {
                    Instant::now() + self.config.primary_timeout().min(remaining(deadline) / 2)
                } else {
                    deadline
                };

                match self.query_primary(query, &vector, filters, options, primary_deadline).await {
                    Ok(results) => (results, ResultSource::Primary),
                    Err(e) if e.is_invalid_request() => return Err(e),
                    Err(primary_err) => {
                        warn!(error = %primary_err, "primary vector store failed");
                        if let Some(stale) = self.stale(query, filters, options, cacheable).await {
                            warn!("serving stale cached results");
                            return Ok(stale);
                        }
                        let Some(secondary) = fallback else {
                            error!(error = %primary_err, "no fallback available");
                            return Err(SearchError::unavailable(
                                "primary vector store failed and no fallback is available",
                                Some(primary_err),
                                None,
                            ));
                        };

                        warn!(backend = secondary.name(), "falling back to secondary vector store");
                        match self
                            .query_secondary(secondary, query, &vector, filters, options, deadline)
                            .await
                        {
                            Ok(results) => (results, ResultSource::Secondary),
                            Err(e) if e.is_invalid_request() => return Err(e),
                            Err(secondary_err) => {
                                error!(
                                    primary_error = %primary_err,
                                    secondary_error = %secondary_err,
                                    "all vector stores failed"
                                );
                                return Err(SearchError::unavailable(
                                    "primary and secondary vector stores failed",
                                    Some(primary_err),
                                    Some(secondary_err),
                                ));
                            }
                        }
                    }
                }
            }
        };

        let vector_scores: HashMap<String, f32> = if options.hybrid && options.rerank {
            results.iter().map(|r| (r.chunk_id.clone(), r.score)).collect()
        } else {
            HashMap::new()
        };
        let mut results = self.rerank(query, options, results).await;

        let (hits, hybrid_stats) = if options.hybrid {
            // Rerank picks the candidates; fusion scores them on vector similarity.
            for result in &mut results {
                if let Some(score) = vector_scores.get(&result.chunk_id) {
                    result.score = *score;
                }
            }
            let keywords = options.normalized().keywords;
            let (fused, stats) =
                HybridScorer::fuse(results, &keywords, options.vector_weight, options.keyword_weight);
            debug!(
                result_count = stats.result_count,
                keyword_hit_ratio = stats.keyword_hit_ratio,
                mean_vector_score = stats.mean_vector_score,
                mean_keyword_score = stats.mean_keyword_score,
                mean_hybrid_score = stats.mean_hybrid_score,
                "hybrid fusion"
            );
            (SearchHits::Hybrid(fused), Some(stats))
        } else {
            (SearchHits::Vector(results), None)
        };

        if cacheable {
            let value = CachedSearch { hits: hits.clone(), hybrid_stats: hybrid_stats.clone() };
            self.cache.set_if_current(query, filters, options, value, generation).await;
        }

        info!(
            ?source,
            result_count = hits.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search completed"
        );
        Ok(SearchResponse { hits, source, hybrid_stats })
    }

    fn respond(cached: CachedSearch, source: ResultSource) -> SearchResponse {
        SearchResponse { hits: cached.hits, source, hybrid_stats: cached.hybrid_stats }
    }

    async fn stale(
        &self,
        query: &str,
        filters: &SearchFilters,
        options: &SearchOptions,
        cacheable: bool,
    ) -> Option<SearchResponse> {
        if !cacheable {
            return None;
        }
        let cached = self.cache.get_stale(query, filters, options).await?;
        Some(Self::respond(cached, ResultSource::StaleCache))
    }

    async fn run_query(
        &self,
        store: &dyn VectorStoreAdapter,
        namespace: &Namespace,
        query: &str,
        vector: &[f32],
        filters: &SearchFilters,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let request = VectorQuery {
            vector,
            top_k: options.candidate_count(),
            min_score: options.min_score,
            filters,
        };
        let matches = store.query(namespace, &request).await?;
        debug!(backend = store.name(), match_count = matches.len(), "vector query returned");
        Ok(self.hydrator.hydrate(matches, query, options.min_score, options.include_metadata).await)
    }

    async fn query_primary(
        &self,
        query: &str,
        vector: &[f32],
        filters: &SearchFilters,
        options: &SearchOptions,
        deadline: Instant,
    ) -> Result<Vec<SearchResult>> {
        let started = Instant::now();
        let attempt = async {
            let namespace = self.namespaces.resolve(&filters.organization_id).await?;
            self.run_query(self.primary.as_ref(), &namespace, query, vector, filters, options).await
        };
        match tokio::time::timeout_at(deadline, attempt).await {
            Ok(result) => result.map_err(primary_error),
            Err(_) => Err(SearchError::PrimaryStoreTimeout { elapsed: started.elapsed() }),
        }
    }

    async fn query_secondary(
        &self,
        store: &Arc<dyn VectorStoreAdapter>,
        query: &str,
        vector: &[f32],
        filters: &SearchFilters,
        options: &SearchOptions,
        deadline: Instant,
    ) -> Result<Vec<SearchResult>> {
        let started = Instant::now();
        let namespace = self.namespaces.namespace_for(&filters.organization_id);
        let attempt = self.run_query(store.as_ref(), &namespace, query, vector, filters, options);
        match tokio::time::timeout_at(deadline, attempt).await {
            Ok(result) => result.map_err(secondary_error),
            Err(_) => Err(SearchError::SecondaryStoreError {
                backend: store.name().to_string(),
                message: format!("timed out after {:?}", started.elapsed()),
            }),
        }
    }

    /// Apply the optional rerank, re-apply the threshold and cut to `top_k`.
    async fn rerank(
        &self,
        query: &str,
        options: &SearchOptions,
        results: Vec<SearchResult>,
    ) -> Vec<SearchResult> {
        let mut results = if options.rerank {
            match self.reranker.rerank(query, results.clone()).await {
                Ok(reranked) => reranked,
                Err(e) => {
                    warn!(error = %e, "rerank failed, keeping vector order");
                    results
                }
            }
        } else {
            results
        };
        results.retain(|r| r.score >= options.min_score);
        results.truncate(options.top_k);
        results
    }

    /// Probe both stores concurrently, each bounded by the embedding timeout.
    pub async fn health_check(&self) -> HealthStatus {
        let probe = self.config.embedding_timeout();
        let primary = async {
            matches!(tokio::time::timeout(probe, self.primary.health_check()).await, Ok(Ok(())))
        };
        let secondary = async {
            match &self.secondary {
                Some(store) => {
                    matches!(tokio::time::timeout(probe, store.health_check()).await, Ok(Ok(())))
                }
                None => false,
            }
        };
        let (primary_available, secondary_available) = futures::future::join(primary, secondary).await;

        HealthStatus {
            primary_available,
            secondary_available,
            fallback_enabled: self.config.fallback_enabled && self.secondary.is_some(),
            fallback_mode: self.fallback_mode(),
        }
    }

    /// Index chunks for an organization in every configured store and drop
    /// the organization's cached results.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InvalidRequest`] if a record belongs to another
    /// organization or has the wrong embedding length, otherwise the
    /// relabelled store error of the first store that failed.
    pub async fn index_chunks(&self, organization_id: &str, records: &[ChunkRecord]) -> Result<()> {
        let dimensions = self.config.embedding_dimensions;
        for record in records {
            if record.organization_id != organization_id {
                return Err(SearchError::InvalidRequest(format!(
                    "chunk '{}' belongs to organization '{}'",
                    record.id, record.organization_id
                )));
            }
            if record.embedding.len() != dimensions {
                return Err(SearchError::InvalidRequest(format!(
                    "chunk '{}' has {} dimensions, expected {dimensions}",
                    record.id,
                    record.embedding.len()
                )));
            }
        }

        let namespace = self.namespaces.resolve(organization_id).await.map_err(primary_error)?;
        self.primary.upsert(&namespace, records).await.map_err(primary_error)?;
        if let Some(secondary) = &self.secondary {
            secondary.upsert(&namespace, records).await.map_err(secondary_error)?;
        }
        self.cache.invalidate_organization(organization_id).await;
        info!(organization_id, chunk_count = records.len(), "indexed chunks");
        Ok(())
    }

    /// Remove chunks by ID from every configured store and drop the
    /// organization's cached results.
    pub async fn remove_chunks(&self, organization_id: &str, chunk_ids: &[&str]) -> Result<()> {
        let namespace = self.namespaces.namespace_for(organization_id);
        self.primary.delete(&namespace, chunk_ids).await.map_err(primary_error)?;
        if let Some(secondary) = &self.secondary {
            secondary.delete(&namespace, chunk_ids).await.map_err(secondary_error)?;
        }
        self.cache.invalidate_organization(organization_id).await;
        info!(organization_id, chunk_count = chunk_ids.len(), "removed chunks");
        Ok(())
    }

    /// Combined statistics of both stores.
    pub async fn get_index_stats(&self) -> IndexStats {
        self.maintenance.get_stats().await
    }

    /// Remove orphaned vectors from both stores. The result cache is cleared
    /// when anything was removed.
    pub async fn cleanup_orphaned_vectors(&self) -> CleanupSummary {
        let summary = self.maintenance.cleanup_orphans().await;
        if summary.removed_vectors > 0 {
            self.cache.clear().await;
        }
        summary
    }

    /// Optimize both stores' indexes.
    pub async fn optimize_indexes(&self) -> Vec<OptimizeReport> {
        self.maintenance.optimize().await
    }
}

/// Builder for constructing a [`SearchOrchestrator`].
///
/// `config`, `embedding_provider`, `primary_store` and `document_store` are
/// required. Without a `reranker` the [`KeywordDensityReranker`] is used;
/// without a `cache` one is built from the config.
#[derive(Default)]
pub struct SearchOrchestratorBuilder {
    config: Option<SearchConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    primary_store: Option<Arc<dyn VectorStoreAdapter>>,
    secondary_store: Option<Arc<dyn VectorStoreAdapter>>,
    document_store: Option<Arc<dyn DocumentStore>>,
    reranker: Option<Arc<dyn Reranker>>,
    cache: Option<Arc<ResultCache>>,
    fallback_mode: FallbackMode,
}

impl SearchOrchestratorBuilder {
    /// Set the configuration.
    pub fn config(mut self, config: SearchConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the primary vector store.
    pub fn primary_store(mut self, store: Arc<dyn VectorStoreAdapter>) -> Self {
        self.primary_store = Some(store);
        self
    }

    /// Set the secondary (fallback) vector store.
    pub fn secondary_store(mut self, store: Arc<dyn VectorStoreAdapter>) -> Self {
        self.secondary_store = Some(store);
        self
    }

    /// Set the authoritative document store.
    pub fn document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.document_store = Some(store);
        self
    }

    /// Set the reranker used when a request asks for reranking.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Share an existing result cache.
    pub fn cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the initial routing override.
    pub fn fallback_mode(mut self, mode: FallbackMode) -> Self {
        self.fallback_mode = mode;
        self
    }

    /// Build the [`SearchOrchestrator`].
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::ConfigError`] if a required component is
    /// missing or the provider's dimensions disagree with the config.
    pub fn build(self) -> Result<SearchOrchestrator> {
        let config =
            self.config.ok_or_else(|| SearchError::ConfigError("config is required".to_string()))?;
        let provider = self
            .embedding_provider
            .ok_or_else(|| SearchError::ConfigError("embedding_provider is required".to_string()))?;
        let primary = self
            .primary_store
            .ok_or_else(|| SearchError::ConfigError("primary_store is required".to_string()))?;
        let documents = self
            .document_store
            .ok_or_else(|| SearchError::ConfigError("document_store is required".to_string()))?;

        if provider.dimensions() != config.embedding_dimensions {
            return Err(SearchError::ConfigError(format!(
                "embedding provider '{}' produces {} dimensions, config expects {}",
                provider.name(),
                provider.dimensions(),
                config.embedding_dimensions
            )));
        }

        let namespaces = NamespaceResolver::new(
            Arc::clone(&primary),
            config.namespace_prefix.clone(),
            config.embedding_dimensions,
        );
        let cache = self.cache.unwrap_or_else(|| Arc::new(ResultCache::from_config(&config)));
        let reranker = self.reranker.unwrap_or_else(|| Arc::new(KeywordDensityReranker::default()));
        let maintenance =
            IndexMaintenance::new(Arc::clone(&primary), self.secondary_store.clone(), Arc::clone(&documents));

        Ok(SearchOrchestrator {
            embedder: EmbeddingClient::new(provider, config.embedding_timeout()),
            namespaces,
            primary,
            secondary: self.secondary_store,
            hydrator: ResultHydrator::new(documents),
            reranker,
            cache,
            maintenance,
            fallback_mode: AtomicU8::new(self.fallback_mode.to_u8()),
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_mode_round_trips_through_atomic_encoding() {
        for mode in [FallbackMode::Auto, FallbackMode::ForcePrimary, FallbackMode::ForceSecondary] {
            assert_eq!(FallbackMode::from_u8(mode.to_u8()), mode);
        }
    }

    #[test]
    fn adapter_errors_are_relabelled_by_path() {
        let err = || SearchError::VectorStoreError { backend: "x".into(), message: "down".into() };
        assert!(matches!(primary_error(err()), SearchError::PrimaryStoreError { .. }));
        assert!(matches!(secondary_error(err()), SearchError::SecondaryStoreError { .. }));
        assert!(matches!(
            primary_error(SearchError::InvalidRequest("bad".into())),
            SearchError::InvalidRequest(_)
        ));
    }
}
