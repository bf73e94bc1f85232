//! Etcd client errors

use thiserror::Error;

/// Errors that can occur when talking to etcd
#[derive(Debug, Error)]
pub enum EtcdError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Etcd returned an error
    #[error("etcd API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Call exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Member not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// TLS material could not be loaded
    #[error("Invalid TLS configuration: {0}")]
    Tls(String),
}

impl EtcdError {
    /// Whether the error means the member does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, EtcdError::NotFound(_))
    }
}
