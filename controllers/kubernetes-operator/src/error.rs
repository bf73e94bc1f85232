//! Controller-specific error types.
//!
//! Each provider crate owns its own error enum; this module wraps them and
//! adds the failures that only the reconcilers can hit.

use etcd_gateway::EtcdError;
use kube::Error as KubeError;
use kubernetes_provider::KubernetesProviderError;
use node_provider::NodeProviderError;
use pki::PkiError;
use storage_provider::StorageProviderError;
use thiserror::Error;

/// Errors that can occur in the kubernetes operator.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Node provider error
    #[error("Node provider error: {0}")]
    NodeProvider(#[from] NodeProviderError),

    /// Downstream cluster error
    #[error("Kubernetes provider error: {0}")]
    KubernetesProvider(#[from] KubernetesProviderError),

    /// Storage service error
    #[error("Storage provider error: {0}")]
    StorageProvider(#[from] StorageProviderError),

    /// Etcd error
    #[error("Etcd error: {0}")]
    Etcd(#[from] EtcdError),

    /// Certificate error
    #[error("Certificate error: {0}")]
    Pki(#[from] PkiError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cluster secret is missing a key or holds malformed data
    #[error("Invalid cluster secret: {0}")]
    InvalidSecret(String),

    /// Encryption configuration could not be read or rotated
    #[error("Encryption config error: {0}")]
    Encryption(String),

    /// Node creation failed
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// Object changed since it was read
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Several independent steps failed
    #[error("{0}")]
    Multiple(MultiError),
}

impl ControllerError {
    /// Whether the error means the object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            ControllerError::Kube(KubeError::Api(e)) => e.code == 404,
            ControllerError::NodeProvider(e) => e.is_not_found(),
            ControllerError::KubernetesProvider(e) => e.is_not_found(),
            ControllerError::StorageProvider(e) => e.is_not_found(),
            ControllerError::Etcd(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Whether the write lost an optimistic-concurrency race.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            ControllerError::Conflict(_) => true,
            ControllerError::Kube(KubeError::Api(e)) => e.code == 409,
            _ => false,
        }
    }
}

/// Collects failures of independent steps so siblings still run.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<ControllerError>,
}

impl MultiError {
    /// Empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one failure
    pub fn add(&mut self, error: impl Into<ControllerError>) {
        self.errors.push(error.into());
    }

    /// Whether nothing failed
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of failures
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok` when empty, the single error when there is one, all of them otherwise.
    pub fn into_result(mut self) -> Result<(), ControllerError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(ControllerError::Multiple(self)),
        }
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} errors occurred:", self.errors.len())?;
        for e in &self.errors {
            write!(f, "\n\t* {e}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_error_collapses() {
        assert!(MultiError::new().into_result().is_ok());

        let mut one = MultiError::new();
        one.add(ControllerError::Provisioning("boom".to_string()));
        assert!(matches!(one.into_result(), Err(ControllerError::Provisioning(_))));

        let mut many = MultiError::new();
        many.add(ControllerError::Provisioning("first".to_string()));
        many.add(NodeProviderError::NotFound("instance x".to_string()));
        assert_eq!(many.len(), 2);
        let err = many.into_result().unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("2 errors occurred:"));
        assert!(text.contains("first"));
        assert!(text.contains("instance x"));
    }

    #[test]
    fn test_not_found_passthrough() {
        let err: ControllerError = NodeProviderError::NotFound("instance a".to_string()).into();
        assert!(err.is_not_found());
        assert!(!ControllerError::InvalidSecret("ca.crt".to_string()).is_not_found());
    }
}
