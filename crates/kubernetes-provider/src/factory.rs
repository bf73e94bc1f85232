//! Kubernetes provider factory

use crate::error::KubernetesProviderError;
use crate::iks::IksProvider;
use crate::provider_trait::KubernetesProviderTrait;
use chrono::Duration;
use kube::Client;
use std::path::PathBuf;
use std::sync::Arc;

/// Name of the kubeadm-based provider
pub const IKS_PROVIDER: &str = "iks";

/// Settings shared by kubernetes providers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesProviderConfig {
    /// Control-plane bootstrap script path
    pub controlplane_bootstrap_script: PathBuf,
    /// Worker bootstrap script path
    pub worker_bootstrap_script: PathBuf,
    /// Validity of generated CAs
    pub ca_cert_ttl: Duration,
    /// Validity of control-plane certificates issued by the bootstrap script
    pub controlplane_cert_ttl: Duration,
}

impl Default for KubernetesProviderConfig {
    fn default() -> Self {
        Self {
            controlplane_bootstrap_script: PathBuf::from("/etc/kaas/bootstrap/controlplane.sh"),
            worker_bootstrap_script: PathBuf::from("/etc/kaas/bootstrap/worker.sh"),
            ca_cert_ttl: Duration::days(pki::DEFAULT_CA_TTL_DAYS),
            controlplane_cert_ttl: Duration::days(365),
        }
    }
}

/// Builds the provider registered under `name`.
///
/// `client` is `None` when the downstream cluster cannot be reached because
/// its secret is gone, in which case `cluster_deleted` should be set.
pub fn new_kubernetes_provider(
    name: &str,
    config: &KubernetesProviderConfig,
    cluster_deleted: bool,
    client: Option<Client>,
) -> Result<Arc<dyn KubernetesProviderTrait>, KubernetesProviderError> {
    match name.to_ascii_lowercase().as_str() {
        IKS_PROVIDER => Ok(Arc::new(IksProvider::new(
            config.controlplane_bootstrap_script.clone(),
            config.worker_bootstrap_script.clone(),
            cluster_deleted,
            client,
            config.ca_cert_ttl,
            config.controlplane_cert_ttl,
        ))),
        other => Err(KubernetesProviderError::Unsupported(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_dispatch() {
        let config = KubernetesProviderConfig::default();
        let provider = new_kubernetes_provider("IKS", &config, true, None).unwrap();
        assert!(!provider.is_connected());

        let err = new_kubernetes_provider("rancher", &config, false, None).err().unwrap();
        assert!(matches!(err, KubernetesProviderError::Unsupported(_)));
    }
}
