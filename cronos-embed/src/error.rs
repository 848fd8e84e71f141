//! Embedding client error types.

use cronos_core::CronosError;
use thiserror::Error;

/// Errors that can occur while fetching embeddings over the network.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// HTTP request failed.
    #[error("Embedding request failed: {0}")]
    RequestFailed(String),

    /// The endpoint answered with a non-success status.
    #[error("Embedding endpoint returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Response did not contain an embedding.
    #[error("Failed to parse embedding response: {0}")]
    ParseError(String),

    /// The returned vector does not have the configured size.
    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        /// Configured dimensions.
        expected: usize,
        /// Dimensions actually returned.
        actual: usize,
    },

    /// Request timed out.
    #[error("Embedding request timed out after {0}ms")]
    Timeout(u64),

    /// Endpoint could not be reached.
    #[error("Embedding endpoint unavailable: {0}")]
    Unavailable(String),

    /// Configuration error.
    #[error("Embedding configuration error: {0}")]
    ConfigError(String),
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EmbedError::Timeout(0)
        } else if err.is_connect() {
            EmbedError::Unavailable(err.to_string())
        } else {
            EmbedError::RequestFailed(err.to_string())
        }
    }
}

impl From<EmbedError> for CronosError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::ConfigError(msg) => CronosError::Config(msg),
            other => CronosError::StoreUnavailable(other.to_string()),
        }
    }
}
