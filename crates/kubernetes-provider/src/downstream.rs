//! Downstream cluster client construction

use crate::error::KubernetesProviderError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use pki::IssuedCert;
use serde_json::json;

/// Builds an in-memory kubeconfig for a client certificate identity.
pub fn kubeconfig_for(
    server: &str,
    ca_pem: &[u8],
    identity: &IssuedCert,
    user: &str,
) -> Result<Kubeconfig, KubernetesProviderError> {
    let config = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": "downstream",
            "cluster": {
                "server": server,
                "certificate-authority-data": STANDARD.encode(ca_pem),
            },
        }],
        "users": [{
            "name": user,
            "user": {
                "client-certificate-data": STANDARD.encode(&identity.cert_pem),
                "client-key-data": STANDARD.encode(&identity.key_pem),
            },
        }],
        "contexts": [{
            "name": "downstream",
            "context": { "cluster": "downstream", "user": user },
        }],
        "current-context": "downstream",
    });
    serde_json::from_value(config).map_err(|e| KubernetesProviderError::Kubeconfig(e.to_string()))
}

/// Connects to a downstream API server with a client certificate.
///
/// # Arguments
/// * `server` - API server URL (e.g., "https://10.0.0.3:6443")
/// * `ca_pem` - Cluster CA certificate
/// * `identity` - Client certificate signed by the cluster CA
/// * `user` - Name of the kubeconfig user entry
pub async fn connect_downstream(
    server: &str,
    ca_pem: &[u8],
    identity: &IssuedCert,
    user: &str,
) -> Result<Client, KubernetesProviderError> {
    let kubeconfig = kubeconfig_for(server, ca_pem, identity, user)?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| KubernetesProviderError::Kubeconfig(e.to_string()))?;
    Ok(Client::try_from(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kubeconfig_for_identity() {
        let identity = IssuedCert {
            cert_pem: b"cert".to_vec(),
            key_pem: b"key".to_vec(),
        };
        let config = kubeconfig_for("https://10.0.0.3:6443", b"ca", &identity, "iks:nodegroup-controller").unwrap();
        assert_eq!(config.current_context.as_deref(), Some("downstream"));
        assert_eq!(config.clusters.len(), 1);
        let cluster = config.clusters[0].cluster.as_ref().unwrap();
        assert_eq!(cluster.server.as_deref(), Some("https://10.0.0.3:6443"));
        assert_eq!(config.auth_infos[0].name, "iks:nodegroup-controller");
    }
}
