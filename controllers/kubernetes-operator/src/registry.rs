//! Provider registry.
//!
//! Nodegroups and clusters name their providers (`spec.nodeProvider`,
//! `spec.kubernetesProvider`, `spec.storage[].provider`). The reconcilers
//! resolve those names only through [`ProviderRegistry`]; the default
//! implementation delegates to each provider crate's factory and mints the
//! client identities needed for the downstream cluster and etcd.

use crate::cluster_secret::ClusterSecret;
use crate::config::OperatorConfig;
use crate::error::ControllerError;
use etcd_gateway::{EtcdClientTrait, EtcdConnector, EtcdTls, HttpEtcdConnector};
use kubernetes_provider::{connect_downstream, new_kubernetes_provider, KubernetesProviderTrait};
use node_provider::{new_node_provider, NodeProviderTrait};
use pki::{create_and_sign_cert, CertConfig, CertificateAuthority, IssuedCert};
use std::sync::Arc;
use storage_provider::{new_storage_agent, new_storage_provider, StorageAgentTrait, StorageProviderTrait};
use tracing::debug;

/// Identity the reconcilers use against a downstream API server.
pub const NODEGROUP_CONTROLLER_USER: &str = "iks:nodegroup-controller";

/// Common name of the etcd client identity.
pub const ETCD_CLIENT_COMMON_NAME: &str = "operator-etcd-client";

/// Organization of the etcd client identity.
pub const ETCD_CLIENT_ORGANIZATION: &str = "kubernetes-operator";

/// Downstream API server target: server URL plus the cluster secret holding its CA.
pub type Downstream<'a> = (&'a str, &'a ClusterSecret);

/// Resolves provider names to provider instances
#[async_trait::async_trait]
pub trait ProviderRegistry: Send + Sync {
    fn node_provider(&self, name: &str) -> Result<Arc<dyn NodeProviderTrait>, ControllerError>;

    /// Kubernetes provider, connected to the downstream cluster when `downstream` is given.
    async fn kubernetes_provider(
        &self,
        name: &str,
        downstream: Option<Downstream<'_>>,
    ) -> Result<Arc<dyn KubernetesProviderTrait>, ControllerError>;

    fn storage_provider(&self, name: &str) -> Result<Arc<dyn StorageProviderTrait>, ControllerError>;

    fn storage_agent(&self) -> Result<Arc<dyn StorageAgentTrait>, ControllerError>;

    /// Etcd client bound to the cluster's etcd CA.
    async fn etcd_client(&self, endpoint: &str, secret: &ClusterSecret) -> Result<Box<dyn EtcdClientTrait>, ControllerError>;
}

/// Issues a client certificate against a CA stored in the cluster secret.
pub fn issue_identity(
    ca_cert: &[u8],
    ca_key: &[u8],
    common_name: &str,
    organization: &str,
) -> Result<IssuedCert, ControllerError> {
    let ca = CertificateAuthority::from_pem(ca_cert, ca_key)?;
    Ok(create_and_sign_cert(
        &ca,
        &CertConfig {
            common_name: common_name.to_string(),
            organizations: vec![organization.to_string()],
            ..Default::default()
        },
        None,
    )?)
}

/// Registry backed by the provider crates' factories
pub struct DefaultProviderRegistry {
    config: OperatorConfig,
    etcd_connector: Arc<dyn EtcdConnector>,
}

impl DefaultProviderRegistry {
    pub fn new(config: OperatorConfig) -> Self {
        Self::with_etcd_connector(config, Arc::new(HttpEtcdConnector))
    }

    pub fn with_etcd_connector(config: OperatorConfig, etcd_connector: Arc<dyn EtcdConnector>) -> Self {
        Self { config, etcd_connector }
    }
}

#[async_trait::async_trait]
impl ProviderRegistry for DefaultProviderRegistry {
    fn node_provider(&self, name: &str) -> Result<Arc<dyn NodeProviderTrait>, ControllerError> {
        Ok(new_node_provider(name, &self.config.node_provider_config())?)
    }

    async fn kubernetes_provider(
        &self,
        name: &str,
        downstream: Option<Downstream<'_>>,
    ) -> Result<Arc<dyn KubernetesProviderTrait>, ControllerError> {
        let config = self.config.kubernetes_provider_config();
        let Some((server, secret)) = downstream else {
            return Ok(new_kubernetes_provider(name, &config, true, None)?);
        };

        debug!("Connecting to downstream cluster at {}", server);
        let identity = issue_identity(
            secret.ca_cert()?,
            secret.ca_key()?,
            NODEGROUP_CONTROLLER_USER,
            NODEGROUP_CONTROLLER_USER,
        )?;
        let client = connect_downstream(server, secret.ca_cert()?, &identity, NODEGROUP_CONTROLLER_USER).await?;
        Ok(new_kubernetes_provider(name, &config, false, Some(client))?)
    }

    fn storage_provider(&self, name: &str) -> Result<Arc<dyn StorageProviderTrait>, ControllerError> {
        Ok(new_storage_provider(name, &self.config.storage_provider_config())?)
    }

    fn storage_agent(&self) -> Result<Arc<dyn StorageAgentTrait>, ControllerError> {
        Ok(new_storage_agent(&self.config.storage_provider_config())?)
    }

    async fn etcd_client(&self, endpoint: &str, secret: &ClusterSecret) -> Result<Box<dyn EtcdClientTrait>, ControllerError> {
        let ca_cert = secret.etcd_ca_cert()?;
        let identity = issue_identity(ca_cert, secret.etcd_ca_key()?, ETCD_CLIENT_COMMON_NAME, ETCD_CLIENT_ORGANIZATION)?;
        let tls = EtcdTls {
            ca_pem: ca_cert.to_vec(),
            cert_pem: identity.cert_pem,
            key_pem: identity.key_pem,
        };
        Ok(self.etcd_connector.connect(endpoint, &tls)?)
    }
}
