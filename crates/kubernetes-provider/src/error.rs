//! Kubernetes provider errors

use thiserror::Error;

/// Errors that can occur when talking to a downstream cluster
#[derive(Debug, Error)]
pub enum KubernetesProviderError {
    /// Downstream API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Client configuration could not be built
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Certificate generation failed
    #[error("Certificate error: {0}")]
    Pki(#[from] pki::PkiError),

    /// Bootstrap script could not be read
    #[error("Failed to read bootstrap script {path}: {source}")]
    BootstrapScript {
        /// Script path
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Requested object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// No client for the downstream cluster (its secret is gone)
    #[error("Downstream cluster is not connected")]
    NotConnected,

    /// Cluster object lacks what the provider needs
    #[error("Invalid cluster: {0}")]
    InvalidCluster(String),

    /// No provider registered under the requested name
    #[error("Unsupported kubernetes provider: {0}")]
    Unsupported(String),
}

impl KubernetesProviderError {
    /// Whether the error means the object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            KubernetesProviderError::NotFound(_) => true,
            KubernetesProviderError::Kube(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }
}
