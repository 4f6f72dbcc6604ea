//! Embedding provider trait and the deadline-enforcing query embedding client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Result, SearchError};

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap a specific embedding backend behind a unified async
/// interface and classify upstream failures into the embedding variants of
/// [`SearchError`] (`EmbeddingAuthFailed`, `EmbeddingRateLimited`,
/// `EmbeddingUnavailable`, `EmbeddingMalformed`). They must not retry.
///
/// # Example
///
/// ```rust,ignore
/// use govcon_search::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Short provider name used in errors and logs.
    fn name(&self) -> &str {
        "embedding"
    }
}

/// Turns query text into a fixed-length vector within a deadline.
///
/// Makes exactly one attempt per call. On expiry of the deadline the
/// in-flight request future is dropped, which aborts the underlying HTTP call.
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
}

impl EmbeddingClient {
    /// Create a client with a default per-call timeout.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Expected vector length.
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed with the client's default timeout.
    pub async fn embed(&self, query: &str) -> Result<Vec<f32>> {
        self.embed_within(query, self.timeout).await
    }

    /// Embed with an explicit timeout (capped at the client default).
    ///
    /// # Errors
    ///
    /// - [`SearchError::EmbeddingTimeout`] if the call does not finish in time.
    /// - [`SearchError::EmbeddingMalformed`] if the vector has the wrong length
    ///   or contains non-finite values.
    /// - Any classified error raised by the provider.
    pub async fn embed_within(&self, query: &str, timeout: Duration) -> Result<Vec<f32>> {
        let timeout = timeout.min(self.timeout);
        if timeout.is_zero() {
            return Err(SearchError::EmbeddingTimeout { elapsed: Duration::ZERO });
        }

        debug!(provider = self.provider.name(), query_len = query.len(), ?timeout, "embedding query");

        let vector = match tokio::time::timeout(timeout, self.provider.embed(query)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(provider = self.provider.name(), ?timeout, "embedding timed out");
                return Err(SearchError::EmbeddingTimeout { elapsed: timeout });
            }
        };

        let expected = self.provider.dimensions();
        if vector.len() != expected {
            return Err(SearchError::EmbeddingMalformed {
                provider: self.provider.name().to_string(),
                message: format!("expected {expected} dimensions, got {}", vector.len()),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(SearchError::EmbeddingMalformed {
                provider: self.provider.name().to_string(),
                message: "embedding contains non-finite values".to_string(),
            });
        }
        Ok(vector)
    }
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("provider", &self.provider.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}
