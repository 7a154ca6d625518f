//! Error types for the Open Sonar engine

use thiserror::Error;

/// Failures raised by search, LLM and cache operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Transport-level failure talking to a remote service
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A backend answered, but not with something usable
    #[error("{provider} error: {message}")]
    Provider { provider: String, message: String },

    /// The requested LLM provider is unknown or not registered
    #[error("unsupported LLM provider: {0}")]
    UnsupportedProvider(String),

    /// Provider is known but lacks configuration (API key, host)
    #[error("{0} is not configured")]
    NotConfigured(String),

    /// Web search failed
    #[error("search error: {0}")]
    Search(String),

    /// Unknown recency filter
    #[error("invalid recency filter: {0}")]
    InvalidRecency(String),

    /// Route table rejected a registration
    #[error("Router error: {0}")]
    Router(#[from] crate::RouterError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn provider<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Convenient Result type for engine operations
pub type CoreResult<T> = Result<T, CoreError>;
