//! Result cache keyed on the normalized request.
//!
//! Entries are fresh for `ttl` and kept around as stale until `stale_ttl`,
//! so the orchestrator can still answer when every backend is down. The
//! least recently used entry is evicted once `max_entries` is reached.
//!
//! Each organization carries a generation that invalidation bumps. A search
//! snapshots it with [`ResultCache::generation`] before touching a backend
//! and stores through [`ResultCache::set_if_current`], so results computed
//! before an index write never land after the write invalidated the cache.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::config::SearchConfig;
use crate::document::SearchHits;
use crate::filter::{SearchFilters, SearchOptions};
use crate::hybrid::HybridStats;

/// A cached search outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSearch {
    /// The ranked hits as they were returned.
    pub hits: SearchHits,
    /// Fusion statistics, when hybrid scoring ran.
    pub hybrid_stats: Option<HybridStats>,
}

#[derive(Debug)]
struct Entry {
    value: CachedSearch,
    organization_id: String,
    inserted_at: Instant,
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    query: &'a str,
    filters: &'a SearchFilters,
    options: &'a SearchOptions,
}

/// Collapse runs of whitespace and trim.
fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable cache key: SHA-256 over the canonical JSON of the normalized
/// query, filters and options.
pub fn cache_key(query: &str, filters: &SearchFilters, options: &SearchOptions) -> String {
    let query = normalize_query(query);
    let filters = filters.normalized();
    let options = options.normalized();
    let material = KeyMaterial { query: &query, filters: &filters, options: &options };
    // Serializing plain structs of strings, vecs and numbers cannot fail.
    let json = serde_json::to_vec(&material).unwrap_or_default();
    let digest = Sha256::digest(&json);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Snapshot of an organization's invalidation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeneration {
    epoch: u64,
    organization: u64,
}

struct Inner {
    entries: LruCache<String, Entry>,
    /// Bumped by `clear`.
    epoch: u64,
    /// Bumped per organization by `invalidate_organization`.
    generations: HashMap<String, u64>,
}

impl Inner {
    fn generation(&self, organization_id: &str) -> CacheGeneration {
        CacheGeneration {
            epoch: self.epoch,
            organization: self.generations.get(organization_id).copied().unwrap_or(0),
        }
    }
}

/// In-process cache of search results.
pub struct ResultCache {
    ttl: Duration,
    stale_ttl: Duration,
    max_filter_values: usize,
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("stale_ttl", &self.stale_ttl)
            .field("max_filter_values", &self.max_filter_values)
            .finish_non_exhaustive()
    }
}

impl ResultCache {
    /// Create a cache with explicit limits. A `max_entries` of zero is
    /// treated as one.
    pub fn new(ttl: Duration, stale_ttl: Duration, max_entries: usize, max_filter_values: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            stale_ttl: stale_ttl.max(ttl),
            max_filter_values,
            inner: RwLock::new(Inner {
                entries: LruCache::new(capacity),
                epoch: 0,
                generations: HashMap::new(),
            }),
        }
    }

    /// Create a cache from the service configuration.
    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(
            config.cache_ttl(),
            config.cache_stale_ttl(),
            config.cache_max_entries,
            config.cache_max_filter_values,
        )
    }

    /// Whether a request is eligible for caching.
    ///
    /// Blank queries and requests with more than `max_filter_values`
    /// filter values are not cached.
    pub fn should_cache(&self, query: &str, filters: &SearchFilters, _options: &SearchOptions) -> bool {
        !query.trim().is_empty() && filters.value_count() <= self.max_filter_values
    }

    /// A fresh entry for the request, if any.
    pub async fn get(
        &self,
        query: &str,
        filters: &SearchFilters,
        options: &SearchOptions,
    ) -> Option<CachedSearch> {
        self.lookup(&cache_key(query, filters, options), self.ttl).await
    }

    /// An entry for the request that may be past its TTL but is still
    /// within the stale window.
    pub async fn get_stale(
        &self,
        query: &str,
        filters: &SearchFilters,
        options: &SearchOptions,
    ) -> Option<CachedSearch> {
        self.lookup(&cache_key(query, filters, options), self.stale_ttl).await
    }

    async fn lookup(&self, key: &str, max_age: Duration) -> Option<CachedSearch> {
        let mut inner = self.inner.write().await;
        let entry = inner.entries.get(key)?;
        (entry.inserted_at.elapsed() < max_age).then(|| entry.value.clone())
    }

    /// The current generation of `organization_id`.
    pub async fn generation(&self, organization_id: &str) -> CacheGeneration {
        self.inner.read().await.generation(organization_id)
    }

    /// Store a result set. Empty result sets and ineligible requests are
    /// ignored; returns whether the entry was stored.
    pub async fn set(
        &self,
        query: &str,
        filters: &SearchFilters,
        options: &SearchOptions,
        value: CachedSearch,
    ) -> bool {
        let generation = self.generation(&filters.organization_id).await;
        self.set_if_current(query, filters, options, value, generation).await
    }

    /// Like [`set`](Self::set), but only if the organization has not been
    /// invalidated since `generation` was taken.
    pub async fn set_if_current(
        &self,
        query: &str,
        filters: &SearchFilters,
        options: &SearchOptions,
        value: CachedSearch,
        generation: CacheGeneration,
    ) -> bool {
        if value.hits.is_empty() || !self.should_cache(query, filters, options) {
            return false;
        }
        let key = cache_key(query, filters, options);

        let mut inner = self.inner.write().await;
        if inner.generation(&filters.organization_id) != generation {
            debug!(
                organization_id = %filters.organization_id,
                "organization invalidated during search, not caching"
            );
            return false;
        }
        let entry = Entry {
            value,
            organization_id: filters.organization_id.clone(),
            inserted_at: Instant::now(),
        };
        inner.entries.put(key, entry);
        true
    }

    /// Drop every entry belonging to `organization_id`. Returns how many
    /// entries were removed.
    pub async fn invalidate_organization(&self, organization_id: &str) -> usize {
        let mut inner = self.inner.write().await;
        *inner.generations.entry(organization_id.to_string()).or_default() += 1;
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.organization_id == organization_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            inner.entries.pop(key);
        }
        debug!(organization_id, removed = keys.len(), "invalidated cached results");
        keys.len()
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.generations.clear();
        inner.epoch += 1;
    }

    /// Number of entries, fresh or stale.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::document::SearchResult;

    fn hits(doc: &str) -> CachedSearch {
        CachedSearch {
            hits: SearchHits::Vector(vec![SearchResult {
                document_id: doc.into(),
                document_title: String::new(),
                chunk_id: format!("{doc}_0"),
                chunk_index: 0,
                text: "text".into(),
                score: 0.9,
                metadata: HashMap::new(),
                highlights: Vec::new(),
            }]),
            hybrid_stats: None,
        }
    }

    fn cache() -> ResultCache {
        ResultCache::new(Duration::from_secs(60), Duration::from_secs(600), 2, 3)
    }

    #[test]
    fn equivalent_requests_share_a_key() {
        let a = SearchFilters::for_organization("acme").with_tags(["b", "a", "a"]);
        let b = SearchFilters::for_organization("acme").with_tags(["a", "b"]);
        let opts = SearchOptions::default();
        assert_eq!(cache_key("cloud  migration ", &a, &opts), cache_key("cloud migration", &b, &opts));
        assert_ne!(
            cache_key("cloud migration", &a, &opts),
            cache_key("cloud migration", &a, &opts.clone().with_top_k(5))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn entries_go_stale_then_expire() {
        let cache = cache();
        let filters = SearchFilters::for_organization("acme");
        let opts = SearchOptions::default();
        assert!(cache.set("cloud", &filters, &opts, hits("d1")).await);
        assert!(cache.get("cloud", &filters, &opts).await.is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("cloud", &filters, &opts).await.is_none());
        assert!(cache.get_stale("cloud", &filters, &opts).await.is_some());

        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(cache.get_stale("cloud", &filters, &opts).await.is_none());
    }

    #[tokio::test]
    async fn skips_empty_and_oversized_requests() {
        let cache = cache();
        let opts = SearchOptions::default();
        let filters = SearchFilters::for_organization("acme");
        let empty = CachedSearch { hits: SearchHits::Vector(Vec::new()), hybrid_stats: None };
        assert!(!cache.set("cloud", &filters, &opts, empty).await);
        assert!(!cache.set("   ", &filters, &opts, hits("d1")).await);

        let wide = filters.with_tags(["a", "b", "c", "d"]);
        assert!(!cache.should_cache("cloud", &wide, &opts));
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_oldest_at_capacity() {
        let cache = cache();
        let opts = SearchOptions::default();
        let filters = SearchFilters::for_organization("acme");
        cache.set("one", &filters, &opts, hits("d1")).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set("two", &filters, &opts, hits("d2")).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set("three", &filters, &opts, hits("d3")).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("one", &filters, &opts).await.is_none());
        assert!(cache.get("three", &filters, &opts).await.is_some());
    }

    #[tokio::test]
    async fn reads_keep_entries_alive() {
        let cache = cache();
        let opts = SearchOptions::default();
        let filters = SearchFilters::for_organization("acme");
        cache.set("one", &filters, &opts, hits("d1")).await;
        cache.set("two", &filters, &opts, hits("d2")).await;
        assert!(cache.get("one", &filters, &opts).await.is_some());
        cache.set("three", &filters, &opts, hits("d3")).await;

        assert!(cache.get("one", &filters, &opts).await.is_some());
        assert!(cache.get("two", &filters, &opts).await.is_none());
    }

    #[tokio::test]
    async fn writes_from_before_an_invalidation_are_dropped() {
        let cache = cache();
        let opts = SearchOptions::default();
        let acme = SearchFilters::for_organization("acme");
        let globex = SearchFilters::for_organization("globex");

        let acme_before = cache.generation("acme").await;
        let globex_before = cache.generation("globex").await;
        cache.invalidate_organization("acme").await;

        assert!(!cache.set_if_current("cloud", &acme, &opts, hits("d1"), acme_before).await);
        assert!(cache.get("cloud", &acme, &opts).await.is_none());
        assert!(cache.set_if_current("cloud", &globex, &opts, hits("d2"), globex_before).await);

        let acme_now = cache.generation("acme").await;
        cache.clear().await;
        assert!(!cache.set_if_current("cloud", &acme, &opts, hits("d1"), acme_now).await);
        assert!(cache.set("cloud", &acme, &opts, hits("d1")).await);
    }

    #[tokio::test]
    async fn invalidates_one_organization() {
        let cache = cache();
        let opts = SearchOptions::default();
        let acme = SearchFilters::for_organization("acme");
        let globex = SearchFilters::for_organization("globex");
        cache.set("cloud", &acme, &opts, hits("d1")).await;
        cache.set("cloud", &globex, &opts, hits("d2")).await;

        assert_eq!(cache.invalidate_organization("acme").await, 1);
        assert!(cache.get("cloud", &acme, &opts).await.is_none());
        assert!(cache.get("cloud", &globex, &opts).await.is_some());

        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
