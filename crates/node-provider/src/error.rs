//! Node provider errors

use thiserror::Error;

/// Errors that can occur when talking to a node provider
#[derive(Debug, Error)]
pub enum NodeProviderError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider returned an error
    #[error("Node provider API error ({code}): {message}")]
    Api {
        /// Provider error code
        code: String,
        /// Provider error message
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Instance, instance group or metadata not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request could not be built from the nodegroup
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No provider registered under the requested name
    #[error("Unsupported node provider: {0}")]
    Unsupported(String),
}

impl NodeProviderError {
    /// Whether the error means the resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, NodeProviderError::NotFound(_))
    }

    /// Provider error code, used when surfacing failures in status messages.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            NodeProviderError::Http(_) => "Unavailable",
            NodeProviderError::Api { code, .. } => code,
            NodeProviderError::Serialization(_) => "Internal",
            NodeProviderError::NotFound(_) => "NotFound",
            NodeProviderError::InvalidRequest(_) => "InvalidArgument",
            NodeProviderError::Unsupported(_) => "Unimplemented",
        }
    }

    /// Human-readable message without the code prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            NodeProviderError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
