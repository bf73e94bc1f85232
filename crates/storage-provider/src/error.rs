//! Storage provider errors

use thiserror::Error;

/// Errors that can occur when talking to the storage service
#[derive(Debug, Error)]
pub enum StorageProviderError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Storage service returned an error
    #[error("Storage API error ({code}): {message}")]
    Api {
        /// Error code
        code: String,
        /// Error message
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Namespace, filesystem or agent not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Size string is neither `<N>GB` nor `<N>TB`
    #[error("Invalid storage size: {0}")]
    InvalidSize(String),

    /// No provider registered under the requested name
    #[error("Unsupported storage provider: {0}")]
    Unsupported(String),
}

impl StorageProviderError {
    /// Whether the error means the resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageProviderError::NotFound(_))
    }
}
