//! Configuration for the search service.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// Service-wide configuration for [`SearchOrchestrator`](crate::SearchOrchestrator)
/// and its collaborators.
///
/// Per-request behaviour lives in [`SearchOptions`](crate::SearchOptions).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Dimensionality of query and chunk embeddings.
    pub embedding_dimensions: usize,
    /// Upper bound for a single embedding call, in milliseconds.
    pub embedding_timeout_ms: u64,
    /// Upper bound for the primary-store attempt when a fallback is available,
    /// in milliseconds. The attempt also never takes more than half of what is
    /// left of the request budget, so the secondary store keeps the rest.
    pub primary_timeout_ms: u64,
    /// Total budget for searches scoped to a single document, in milliseconds.
    pub document_timeout_ms: u64,
    /// Total budget for open or multi-document searches, in milliseconds.
    pub open_timeout_ms: u64,
    /// Whether the secondary store is queried when the primary fails.
    pub fallback_enabled: bool,
    /// How long a cached result set is served as fresh, in seconds.
    pub cache_ttl_secs: u64,
    /// How long an expired entry is kept for stale-on-error serving, in seconds.
    pub cache_stale_ttl_secs: u64,
    /// Maximum number of cached result sets.
    pub cache_max_entries: usize,
    /// Requests whose filters carry more values than this are not cached.
    pub cache_max_filter_values: usize,
    /// Prefix for primary-store namespaces (`{prefix}_{organization_id}`).
    pub namespace_prefix: String,
    /// Largest `top_k` a caller may request.
    pub max_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            embedding_dimensions: 1536,
            embedding_timeout_ms: 3_000,
            primary_timeout_ms: 4_000,
            document_timeout_ms: 5_000,
            open_timeout_ms: 10_000,
            fallback_enabled: true,
            cache_ttl_secs: 600,
            cache_stale_ttl_secs: 3_600,
            cache_max_entries: 1_000,
            cache_max_filter_values: 200,
            namespace_prefix: "org".to_string(),
            max_top_k: 100,
        }
    }
}

impl SearchConfig {
    /// Create a new builder for constructing a [`SearchConfig`].
    pub fn builder() -> SearchConfigBuilder {
        SearchConfigBuilder::default()
    }

    /// Build a configuration from `GOVSEARCH_*` environment variables,
    /// falling back to defaults for anything unset.
    ///
    /// Recognised variables: `GOVSEARCH_EMBEDDING_DIMENSIONS`,
    /// `GOVSEARCH_EMBEDDING_TIMEOUT_MS`, `GOVSEARCH_PRIMARY_TIMEOUT_MS`,
    /// `GOVSEARCH_DOCUMENT_TIMEOUT_MS`,
    /// `GOVSEARCH_OPEN_TIMEOUT_MS`, `GOVSEARCH_FALLBACK_ENABLED`,
    /// `GOVSEARCH_CACHE_TTL_SECS`, `GOVSEARCH_CACHE_STALE_TTL_SECS`,
    /// `GOVSEARCH_CACHE_MAX_ENTRIES`, `GOVSEARCH_NAMESPACE_PREFIX`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::ConfigError`] if a variable cannot be parsed or
    /// the resulting configuration is inconsistent.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(v) = env_parse("GOVSEARCH_EMBEDDING_DIMENSIONS")? {
            builder = builder.embedding_dimensions(v);
        }
        if let Some(v) = env_parse("GOVSEARCH_EMBEDDING_TIMEOUT_MS")? {
            builder = builder.embedding_timeout(Duration::from_millis(v));
        }
        if let Some(v) = env_parse("GOVSEARCH_PRIMARY_TIMEOUT_MS")? {
            builder = builder.primary_timeout(Duration::from_millis(v));
        }
        if let Some(v) = env_parse("GOVSEARCH_DOCUMENT_TIMEOUT_MS")? {
            builder = builder.document_timeout(Duration::from_millis(v));
        }
        if let Some(v) = env_parse("GOVSEARCH_OPEN_TIMEOUT_MS")? {
            builder = builder.open_timeout(Duration::from_millis(v));
        }
        if let Some(v) = env_parse("GOVSEARCH_FALLBACK_ENABLED")? {
            builder = builder.fallback_enabled(v);
        }
        if let Some(v) = env_parse("GOVSEARCH_CACHE_TTL_SECS")? {
            builder = builder.cache_ttl(Duration::from_secs(v));
        }
        if let Some(v) = env_parse("GOVSEARCH_CACHE_STALE_TTL_SECS")? {
            builder = builder.cache_stale_ttl(Duration::from_secs(v));
        }
        if let Some(v) = env_parse("GOVSEARCH_CACHE_MAX_ENTRIES")? {
            builder = builder.cache_max_entries(v);
        }
        if let Ok(prefix) = std::env::var("GOVSEARCH_NAMESPACE_PREFIX") {
            builder = builder.namespace_prefix(prefix);
        }
        builder.build()
    }

    /// Upper bound for a single embedding call.
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    /// Upper bound for the primary attempt when a fallback is available.
    pub fn primary_timeout(&self) -> Duration {
        Duration::from_millis(self.primary_timeout_ms)
    }

    /// Total budget for single-document searches.
    pub fn document_timeout(&self) -> Duration {
        Duration::from_millis(self.document_timeout_ms)
    }

    /// Total budget for open or multi-document searches.
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Fresh lifetime of a cache entry.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Total lifetime of a cache entry, including the stale window.
    pub fn cache_stale_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_stale_ttl_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SearchError::ConfigError(format!("{key} has an invalid value '{raw}'"))),
        Err(_) => Ok(None),
    }
}

/// Builder for constructing a validated [`SearchConfig`].
#[derive(Debug, Clone, Default)]
pub struct SearchConfigBuilder {
    config: SearchConfig,
}

impl SearchConfigBuilder {
    /// Set the embedding dimensionality.
    pub fn embedding_dimensions(mut self, dimensions: usize) -> Self {
        self.config.embedding_dimensions = dimensions;
        self
    }

    /// Set the per-call embedding timeout.
    pub fn embedding_timeout(mut self, timeout: Duration) -> Self {
        self.config.embedding_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the upper bound for the primary attempt when a fallback is available.
    pub fn primary_timeout(mut self, timeout: Duration) -> Self {
        self.config.primary_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the total budget for single-document searches.
    pub fn document_timeout(mut self, timeout: Duration) -> Self {
        self.config.document_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the total budget for open or multi-document searches.
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.config.open_timeout_ms = duration_ms(timeout);
        self
    }

    /// Enable or disable the secondary-store fallback.
    pub fn fallback_enabled(mut self, enabled: bool) -> Self {
        self.config.fallback_enabled = enabled;
        self
    }

    /// Set how long cached results are served as fresh.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl_secs = ttl.as_secs();
        self
    }

    /// Set how long expired results remain available for stale-on-error serving.
    pub fn cache_stale_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_stale_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the maximum number of cached result sets.
    pub fn cache_max_entries(mut self, max: usize) -> Self {
        self.config.cache_max_entries = max;
        self
    }

    /// Set the filter size above which requests are not cached.
    pub fn cache_max_filter_values(mut self, max: usize) -> Self {
        self.config.cache_max_filter_values = max;
        self
    }

    /// Set the primary-store namespace prefix.
    pub fn namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.namespace_prefix = prefix.into();
        self
    }

    /// Set the largest `top_k` callers may request.
    pub fn max_top_k(mut self, max: usize) -> Self {
        self.config.max_top_k = max;
        self
    }

    /// Build the [`SearchConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::ConfigError`] if:
    /// - `embedding_dimensions == 0` or `max_top_k == 0`
    /// - any timeout is zero
    /// - the single-document budget exceeds the open budget
    /// - the stale window is shorter than the fresh TTL
    /// - the namespace prefix is empty
    pub fn build(self) -> Result<SearchConfig> {
        let c = self.config;
        if c.embedding_dimensions == 0 {
            return Err(SearchError::ConfigError(
                "embedding_dimensions must be greater than zero".to_string(),
            ));
        }
        if c.max_top_k == 0 {
            return Err(SearchError::ConfigError("max_top_k must be greater than zero".to_string()));
        }
        if c.embedding_timeout_ms == 0
            || c.primary_timeout_ms == 0
            || c.document_timeout_ms == 0
            || c.open_timeout_ms == 0
        {
            return Err(SearchError::ConfigError("timeouts must be greater than zero".to_string()));
        }
        if c.document_timeout_ms > c.open_timeout_ms {
            return Err(SearchError::ConfigError(format!(
                "document_timeout_ms ({}) must not exceed open_timeout_ms ({})",
                c.document_timeout_ms, c.open_timeout_ms
            )));
        }
        if c.cache_stale_ttl_secs < c.cache_ttl_secs {
            return Err(SearchError::ConfigError(format!(
                "cache_stale_ttl_secs ({}) must be at least cache_ttl_secs ({})",
                c.cache_stale_ttl_secs, c.cache_ttl_secs
            )));
        }
        if c.namespace_prefix.trim().is_empty() {
            return Err(SearchError::ConfigError("namespace_prefix must not be empty".to_string()));
        }
        Ok(c)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
