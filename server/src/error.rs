//! Error handling for the Sonar server
//!
//! Every failure the server can surface, with the HTTP status it maps to
//! when it ends up in a response.

use std::io;

use hyper::StatusCode;
use sonar_core::CoreError;
use thiserror::Error;

/// Sonar error type covering all possible failure modes
#[derive(Debug, Error)]
pub enum SonarError {
    /// Malformed HTTP input
    #[error("HTTP error: {0}")]
    Http(String),

    /// No route for a path
    #[error("Routing error: {0}")]
    Routing(String),

    /// Handler execution errors
    #[error("Handler error: {0}")]
    Handler(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Search, LLM and cache failures from the engine
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Non-2xx answer received by [`crate::SonarClient`]
    #[error("request failed with status {status}: {body}")]
    Client { status: u16, body: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SonarError {
    /// Status used when this error becomes a response
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Http(_) | Self::Serialization(_) => StatusCode::BAD_REQUEST,
            Self::Routing(_) => StatusCode::NOT_FOUND,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Core(
                CoreError::UnsupportedProvider(_)
                | CoreError::NotConfigured(_)
                | CoreError::InvalidRecency(_),
            ) => StatusCode::BAD_REQUEST,
            Self::Client { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<String> for SonarError {
    fn from(msg: String) -> Self {
        Self::Internal(msg)
    }
}

impl From<&str> for SonarError {
    fn from(msg: &str) -> Self {
        Self::Internal(msg.to_string())
    }
}

impl From<sonar_core::RouterError> for SonarError {
    fn from(err: sonar_core::RouterError) -> Self {
        Self::Routing(err.to_string())
    }
}

impl From<reqwest::Error> for SonarError {
    fn from(err: reqwest::Error) -> Self {
        Self::Core(CoreError::Http(err))
    }
}

/// Convenient Result type for Sonar operations
pub type SonarResult<T> = Result<T, SonarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            SonarError::Routing("/nope".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SonarError::Core(CoreError::UnsupportedProvider("gpt-x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SonarError::Client { status: 429, body: String::new() }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            SonarError::from("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_display() {
        let err = SonarError::Client {
            status: 401,
            body: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "request failed with status 401: nope");
        assert_eq!(
            SonarError::InvalidState("server already running".into()).to_string(),
            "Invalid state: server already running"
        );
    }
}
