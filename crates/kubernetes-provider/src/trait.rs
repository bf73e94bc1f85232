//! KubernetesProvider trait for mocking

use crate::error::KubernetesProviderError;
use crate::models::{BootstrapToken, ClusterEndpoints, ClusterHealth};
use crds::{Cluster, NodeStatus, NodegroupType};
use std::collections::BTreeMap;

/// Operations against a managed cluster
#[async_trait::async_trait]
pub trait KubernetesProviderTrait: Send + Sync {
    /// Whether a downstream client is available
    fn is_connected(&self) -> bool;

    /// Generates the initial cluster secret data (PKI and registration commands)
    async fn init_cluster(
        &self,
        cluster: &Cluster,
        endpoints: &ClusterEndpoints,
    ) -> Result<BTreeMap<String, Vec<u8>>, KubernetesProviderError>;

    /// Probes `/readyz` and `/livez`
    async fn get_cluster(&self) -> Result<ClusterHealth, KubernetesProviderError>;

    /// Releases provider-side resources of a deleted cluster
    async fn clean_up_cluster(&self, cluster_name: &str) -> Result<(), KubernetesProviderError>;

    /// Reads one node
    async fn get_node(&self, name: &str) -> Result<NodeStatus, KubernetesProviderError>;

    /// Lists nodes whose name minus the generated suffix equals `nodegroup`
    async fn get_nodes(&self, nodegroup: &str) -> Result<Vec<NodeStatus>, KubernetesProviderError>;

    /// Deletes a node; absent nodes are not an error
    async fn delete_node(&self, name: &str) -> Result<(), KubernetesProviderError>;

    /// Cordons a node; absent nodes are not an error
    async fn drain_node(&self, name: &str) -> Result<(), KubernetesProviderError>;

    /// Bootstrap script contents for a node type
    async fn get_bootstrap_script(&self, nodegroup_type: NodegroupType) -> Result<String, KubernetesProviderError>;

    /// Stores a bootstrap token secret in `kube-system`
    async fn create_bootstrap_token_secret(&self, token: &BootstrapToken) -> Result<(), KubernetesProviderError>;

    /// Approves pending kubelet-serving CSRs of nodes whose name contains `node_name_prefix`.
    ///
    /// Returns the names of the approved CSRs.
    async fn approve_kubelet_serving_csrs(&self, node_name_prefix: &str) -> Result<Vec<String>, KubernetesProviderError>;

    /// Creates a namespace
    async fn create_namespace(&self, name: &str) -> Result<(), KubernetesProviderError>;

    /// Creates an opaque secret from string data
    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), KubernetesProviderError>;

    /// Reads the data of a secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, KubernetesProviderError>;
}
