//! Error types for the `govcon-search` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while serving or maintaining document search.
///
/// Only [`SearchError::SearchUnavailable`] and [`SearchError::InvalidRequest`]
/// are expected to reach callers of
/// [`SearchOrchestrator::search`](crate::SearchOrchestrator::search) in the
/// common case; the other variants surface from individual components and
/// are recovered from (fallback, stale cache) by the orchestrator.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The embedding call did not complete within its deadline.
    #[error("Embedding timed out after {elapsed:?}")]
    EmbeddingTimeout {
        /// How long the call was allowed to run.
        elapsed: Duration,
    },

    /// The embedding API could not be reached or returned a server error.
    #[error("Embedding provider unavailable ({provider}): {message}")]
    EmbeddingUnavailable {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The embedding API rejected the credentials.
    #[error("Embedding authentication failed ({provider}): {message}")]
    EmbeddingAuthFailed {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The embedding API is throttling requests.
    #[error("Embedding rate limited ({provider}): {message}")]
    EmbeddingRateLimited {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The embedding API answered with something that is not a usable vector.
    #[error("Malformed embedding response ({provider}): {message}")]
    EmbeddingMalformed {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A vector store backend failed. Adapters raise this; the orchestrator
    /// relabels it as a primary or secondary failure depending on the path.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The primary vector store did not answer within the request budget.
    #[error("Primary vector store timed out after {elapsed:?}")]
    PrimaryStoreTimeout {
        /// Time spent waiting before giving up.
        elapsed: Duration,
    },

    /// The primary vector store failed.
    #[error("Primary vector store error ({backend}): {message}")]
    PrimaryStoreError {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The secondary (fallback) vector store failed.
    #[error("Secondary vector store error ({backend}): {message}")]
    SecondaryStoreError {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// No path (cache, primary, secondary) produced a result.
    #[error("Search temporarily unavailable: {reason}")]
    SearchUnavailable {
        /// Short description of why the request could not be served.
        reason: String,
        /// The failure observed on the primary path, if it was attempted.
        primary: Option<Box<SearchError>>,
        /// The failure observed on the secondary path, if it was attempted.
        secondary: Option<Box<SearchError>>,
    },

    /// The request itself is malformed (bad filters, weights, `top_k`, ...).
    #[error("Invalid search request: {0}")]
    InvalidRequest(String),

    /// The authoritative document store failed.
    #[error("Document store error: {0}")]
    DocumentStoreError(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl SearchError {
    /// Whether the caller may retry the same request later.
    ///
    /// Nothing is retried in-process: the request budget is already spent by
    /// the time an error surfaces.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable { .. }
                | Self::EmbeddingRateLimited { .. }
                | Self::SearchUnavailable { .. }
        )
    }

    /// Whether the error was caused by the request rather than the system.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }

    /// Whether the error came out of the embedding step.
    pub fn is_embedding_error(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingTimeout { .. }
                | Self::EmbeddingUnavailable { .. }
                | Self::EmbeddingAuthFailed { .. }
                | Self::EmbeddingRateLimited { .. }
                | Self::EmbeddingMalformed { .. }
        )
    }

    pub(crate) fn unavailable(
        reason: impl Into<String>,
        primary: Option<SearchError>,
        secondary: Option<SearchError>,
    ) -> Self {
        Self::SearchUnavailable {
            reason: reason.into(),
            primary: primary.map(Box::new),
            secondary: secondary.map(Box::new),
        }
    }
}

/// A convenience result type for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        let rate_limited =
            SearchError::EmbeddingRateLimited { provider: "OpenAI".into(), message: "429".into() };
        let auth =
            SearchError::EmbeddingAuthFailed { provider: "OpenAI".into(), message: "401".into() };
        let timeout = SearchError::EmbeddingTimeout { elapsed: Duration::from_secs(3) };

        assert!(rate_limited.is_retryable());
        assert!(!auth.is_retryable());
        assert!(!timeout.is_retryable());
        assert!(!SearchError::InvalidRequest("bad".into()).is_retryable());
    }

    #[test]
    fn unavailable_keeps_both_causes() {
        let err = SearchError::unavailable(
            "all backends failed",
            Some(SearchError::PrimaryStoreTimeout { elapsed: Duration::from_secs(8) }),
            Some(SearchError::SecondaryStoreError {
                backend: "pgvector".into(),
                message: "connection refused".into(),
            }),
        );
        match err {
            SearchError::SearchUnavailable { primary, secondary, .. } => {
                assert!(matches!(primary.as_deref(), Some(SearchError::PrimaryStoreTimeout { .. })));
                assert!(matches!(
                    secondary.as_deref(),
                    Some(SearchError::SecondaryStoreError { .. })
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
