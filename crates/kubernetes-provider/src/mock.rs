//! Mock kubernetes provider for unit testing
//!
//! Holds downstream nodes, secrets and namespaces in memory and records
//! drains, deletions, bootstrap tokens and CSR approvals.

use crate::error::KubernetesProviderError;
use crate::models::*;
use crate::provider_trait::KubernetesProviderTrait;
use crds::{Cluster, NodeStatus, NodegroupType};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Mock kubernetes provider for testing
#[derive(Clone)]
pub struct MockKubernetesProvider {
    connected: Arc<Mutex<bool>>,
    health: Arc<Mutex<ClusterHealth>>,
    nodes: Arc<Mutex<BTreeMap<String, NodeStatus>>>,
    pending_csrs: Arc<Mutex<Vec<(String, String)>>>,
    approved_csrs: Arc<Mutex<Vec<String>>>,
    tokens: Arc<Mutex<Vec<BootstrapToken>>>,
    drained: Arc<Mutex<Vec<String>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    namespaces: Arc<Mutex<BTreeSet<String>>>,
    secrets: Arc<Mutex<BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>>>,
    cleaned_up: Arc<Mutex<Vec<String>>>,
}

impl Default for MockKubernetesProvider {
    fn default() -> Self {
        Self {
            connected: Arc::new(Mutex::new(true)),
            health: Arc::new(Mutex::new(ClusterHealth::active())),
            nodes: Arc::default(),
            pending_csrs: Arc::default(),
            approved_csrs: Arc::default(),
            tokens: Arc::default(),
            drained: Arc::default(),
            deleted: Arc::default(),
            namespaces: Arc::default(),
            secrets: Arc::default(),
            cleaned_up: Arc::default(),
        }
    }
}

impl std::fmt::Debug for MockKubernetesProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockKubernetesProvider").finish_non_exhaustive()
    }
}

impl MockKubernetesProvider {
    /// Create a connected mock with no nodes
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock standing in for a deleted cluster
    pub fn disconnected() -> Self {
        let mock = Self::default();
        *mock.connected.lock().unwrap() = false;
        mock
    }

    /// Add or replace a downstream node (for test setup)
    pub fn add_node(&self, node: NodeStatus) {
        self.nodes.lock().unwrap().insert(node.name.clone(), node);
    }

    /// Remove a downstream node
    pub fn remove_node(&self, name: &str) {
        self.nodes.lock().unwrap().remove(name);
    }

    /// Set the health returned by `get_cluster`
    pub fn set_health(&self, health: ClusterHealth) {
        *self.health.lock().unwrap() = health;
    }

    /// Add a pending kubelet-serving CSR for a node
    pub fn add_pending_csr(&self, name: &str, node_name: &str) {
        self.pending_csrs
            .lock()
            .unwrap()
            .push((name.to_string(), format!("system:node:{node_name}")));
    }

    /// Add a secret (for test setup)
    pub fn add_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, Vec<u8>>) {
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), data);
    }

    /// Approved CSR names
    pub fn approved_csrs(&self) -> Vec<String> {
        self.approved_csrs.lock().unwrap().clone()
    }

    /// Bootstrap tokens created
    pub fn tokens(&self) -> Vec<BootstrapToken> {
        self.tokens.lock().unwrap().clone()
    }

    /// Drained node names
    pub fn drained(&self) -> Vec<String> {
        self.drained.lock().unwrap().clone()
    }

    /// Deleted node names
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Created namespaces
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.lock().unwrap().iter().cloned().collect()
    }

    /// Clusters cleaned up
    pub fn cleaned_up(&self) -> Vec<String> {
        self.cleaned_up.lock().unwrap().clone()
    }

    fn ensure_connected(&self) -> Result<(), KubernetesProviderError> {
        if *self.connected.lock().unwrap() {
            Ok(())
        } else {
            Err(KubernetesProviderError::NotConnected)
        }
    }
}

#[async_trait::async_trait]
impl KubernetesProviderTrait for MockKubernetesProvider {
    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    async fn init_cluster(
        &self,
        cluster: &Cluster,
        endpoints: &ClusterEndpoints,
    ) -> Result<BTreeMap<String, Vec<u8>>, KubernetesProviderError> {
        let name = cluster.metadata.name.clone().unwrap_or_default();
        let mut data: BTreeMap<String, Vec<u8>> = [
            CA_CERT_KEY,
            CA_KEY_KEY,
            ETCD_CA_CERT_KEY,
            ETCD_CA_KEY_KEY,
            FRONT_PROXY_CA_CERT_KEY,
            FRONT_PROXY_CA_KEY_KEY,
            SA_KEY_KEY,
            SA_PUB_KEY,
        ]
        .into_iter()
        .map(|k| (k.to_string(), format!("mock {k}").into_bytes()))
        .collect();
        data.insert(
            CONTROLPLANE_REGISTRATION_CMD_KEY.to_string(),
            format!(
                "bash /usr/local/bin/bootstrap.sh --etcd-lb {} --etcd-lb-port {} --cluster-name {}",
                endpoints.etcd_lb, endpoints.etcd_lb_port, name
            )
            .into_bytes(),
        );
        data.insert(
            WORKER_REGISTRATION_CMD_KEY.to_string(),
            format!(
                "bash /usr/local/bin/bootstrap.sh --apiserver-lb {} --apiserver-lb-port {}",
                endpoints.apiserver_lb, endpoints.apiserver_lb_port
            )
            .into_bytes(),
        );
        Ok(data)
    }

    async fn get_cluster(&self) -> Result<ClusterHealth, KubernetesProviderError> {
        self.ensure_connected()?;
        Ok(self.health.lock().unwrap().clone())
    }

    async fn clean_up_cluster(&self, cluster_name: &str) -> Result<(), KubernetesProviderError> {
        self.cleaned_up.lock().unwrap().push(cluster_name.to_string());
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<NodeStatus, KubernetesProviderError> {
        self.ensure_connected()?;
        self.nodes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| KubernetesProviderError::NotFound(format!("node {name}")))
    }

    async fn get_nodes(&self, nodegroup: &str) -> Result<Vec<NodeStatus>, KubernetesProviderError> {
        self.ensure_connected()?;
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.name.rsplit_once('-').is_some_and(|(prefix, _)| prefix == nodegroup))
            .cloned()
            .collect())
    }

    async fn delete_node(&self, name: &str) -> Result<(), KubernetesProviderError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.deleted.lock().unwrap().push(name.to_string());
        self.nodes.lock().unwrap().remove(name);
        Ok(())
    }

    async fn drain_node(&self, name: &str) -> Result<(), KubernetesProviderError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.drained.lock().unwrap().push(name.to_string());
        if let Some(node) = self.nodes.lock().unwrap().get_mut(name) {
            node.unschedulable = true;
        }
        Ok(())
    }

    async fn get_bootstrap_script(&self, nodegroup_type: NodegroupType) -> Result<String, KubernetesProviderError> {
        Ok(format!("#!/bin/bash\n# {} bootstrap\n", nodegroup_type.as_str()))
    }

    async fn create_bootstrap_token_secret(&self, token: &BootstrapToken) -> Result<(), KubernetesProviderError> {
        self.ensure_connected()?;
        self.tokens.lock().unwrap().push(token.clone());
        Ok(())
    }

    async fn approve_kubelet_serving_csrs(&self, node_name_prefix: &str) -> Result<Vec<String>, KubernetesProviderError> {
        self.ensure_connected()?;
        let mut pending = self.pending_csrs.lock().unwrap();
        let (matching, rest): (Vec<_>, Vec<_>) = pending
            .drain(..)
            .partition(|(_, username)| username.contains(node_name_prefix));
        *pending = rest;

        let names: Vec<String> = matching.into_iter().map(|(name, _)| name).collect();
        self.approved_csrs.lock().unwrap().extend(names.iter().cloned());
        Ok(names)
    }

    async fn create_namespace(&self, name: &str) -> Result<(), KubernetesProviderError> {
        self.ensure_connected()?;
        self.namespaces.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), KubernetesProviderError> {
        self.ensure_connected()?;
        let data = data.into_iter().map(|(k, v)| (k, v.into_bytes())).collect();
        self.add_secret(namespace, name, data);
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, KubernetesProviderError> {
        self.ensure_connected()?;
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| KubernetesProviderError::NotFound(format!("secret {namespace}/{name}")))
    }
}
