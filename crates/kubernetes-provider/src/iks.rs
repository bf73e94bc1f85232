//! IKS provider
//!
//! Kubeadm-style clusters bootstrapped by `/usr/local/bin/bootstrap.sh`.

use crate::error::KubernetesProviderError;
use crate::init::init_cluster_secret;
use crate::models::*;
use crate::provider_trait::KubernetesProviderTrait;
use chrono::{DateTime, Duration, Utc};
use crds::{Cluster, ClusterState, NodeState, NodeStatus, NodegroupType, AUTO_REPAIR_LABEL};
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use k8s_openapi::api::core::v1::{Namespace, Node, NodeCondition, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

const KUBELET_SERVING_SIGNER: &str = "kubernetes.io/kubelet-serving";

/// IKS kubernetes provider
pub struct IksProvider {
    controlplane_bootstrap_script: PathBuf,
    worker_bootstrap_script: PathBuf,
    cluster_deleted: bool,
    client: Option<Client>,
    ca_cert_ttl: Duration,
    controlplane_cert_ttl: Duration,
}

impl std::fmt::Debug for IksProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IksProvider")
            .field("cluster_deleted", &self.cluster_deleted)
            .field("connected", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

/// Converts a Kubernetes timestamp into a chrono one.
fn to_utc(time: &Time) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// State, last transition, reason and message derived from the Ready condition.
pub(crate) fn node_state(conditions: &[NodeCondition]) -> (NodeState, DateTime<Utc>, String, String) {
    let mut state = NodeState::Updating;
    let mut last_update = Utc::now();
    let mut reason = String::new();
    let mut message = String::new();

    for condition in conditions.iter().filter(|c| c.type_ == "Ready") {
        reason = condition.reason.clone().unwrap_or_default();
        if condition.status == "True" {
            state = NodeState::Active;
            message = "Node ready".to_string();
        } else {
            state = NodeState::Updating;
            message = "Configuring node".to_string();
        }
        if let Some(t) = condition.last_transition_time.as_ref().and_then(to_utc) {
            last_update = t;
        }
    }

    (state, last_update, reason, message)
}

/// Builds a node status from a downstream node.
pub(crate) fn node_status(node: &Node) -> NodeStatus {
    let name = node.metadata.name.clone().unwrap_or_default();
    let status = node.status.as_ref();

    let ip_address = status
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addresses| addresses.iter().find(|a| a.type_ == "InternalIP"))
        .map(|a| a.address.clone())
        .unwrap_or_default();
    let info = status.and_then(|s| s.node_info.as_ref());
    let conditions = status.and_then(|s| s.conditions.as_deref()).unwrap_or_default();
    let (state, last_update, reason, message) = node_state(conditions);

    let auto_repair_disabled = match node.metadata.labels.as_ref().and_then(|l| l.get(AUTO_REPAIR_LABEL)) {
        Some(value) => match value.parse::<bool>() {
            Ok(enabled) => !enabled,
            Err(e) => {
                warn!("Ignoring label {}={} on node {}: {}", AUTO_REPAIR_LABEL, value, name, e);
                false
            }
        },
        None => false,
    };

    NodeStatus {
        name,
        ip_address,
        kubelet_version: info.map(|i| i.kubelet_version.clone()).unwrap_or_default(),
        kube_proxy_version: info.map(|i| i.kube_proxy_version.clone()).unwrap_or_default(),
        state,
        last_update: Some(last_update),
        creation_time: node.metadata.creation_timestamp.as_ref().and_then(to_utc),
        reason,
        message,
        unschedulable: node.spec.as_ref().and_then(|s| s.unschedulable).unwrap_or(false),
        auto_repair_disabled,
        ..Default::default()
    }
}

/// Nodegroup a node belongs to: its name without the generated suffix.
pub(crate) fn nodegroup_of(node_name: &str) -> &str {
    node_name.rsplit_once('-').map_or(node_name, |(prefix, _)| prefix)
}

/// Whether a CSR is a pending kubelet-serving request of a matching node.
pub(crate) fn is_pending_serving_csr(csr: &CertificateSigningRequest, node_name_prefix: &str) -> bool {
    let username_matches = csr
        .spec
        .username
        .as_deref()
        .is_some_and(|u| u.contains(node_name_prefix));
    let pending = csr
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_none_or(Vec::is_empty);
    username_matches && csr.spec.signer_name == KUBELET_SERVING_SIGNER && pending
}

impl IksProvider {
    /// Create a new IKS provider
    ///
    /// `client` is `None` when the cluster secret is gone; `cluster_deleted`
    /// then turns drain and delete into no-ops.
    pub fn new(
        controlplane_bootstrap_script: PathBuf,
        worker_bootstrap_script: PathBuf,
        cluster_deleted: bool,
        client: Option<Client>,
        ca_cert_ttl: Duration,
        controlplane_cert_ttl: Duration,
    ) -> Self {
        Self {
            controlplane_bootstrap_script,
            worker_bootstrap_script,
            cluster_deleted,
            client,
            ca_cert_ttl,
            controlplane_cert_ttl,
        }
    }

    fn client(&self) -> Result<Client, KubernetesProviderError> {
        self.client.clone().ok_or(KubernetesProviderError::NotConnected)
    }

    async fn probe(&self, path: &str) -> Result<(), KubernetesProviderError> {
        let request = http::Request::get(path)
            .body(Vec::new())
            .map_err(|e| KubernetesProviderError::Kubeconfig(e.to_string()))?;
        let body = self.client()?.request_text(request).await?;
        debug!("{} returned {}", path, body.trim());
        Ok(())
    }
}

#[async_trait::async_trait]
impl KubernetesProviderTrait for IksProvider {
    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn init_cluster(
        &self,
        cluster: &Cluster,
        endpoints: &ClusterEndpoints,
    ) -> Result<BTreeMap<String, Vec<u8>>, KubernetesProviderError> {
        init_cluster_secret(cluster, endpoints, self.ca_cert_ttl, self.controlplane_cert_ttl)
    }

    async fn get_cluster(&self) -> Result<ClusterHealth, KubernetesProviderError> {
        if let Err(e) = self.probe("/readyz").await {
            return Ok(ClusterHealth {
                state: ClusterState::Error,
                reason: "KubernetesNotReady".to_string(),
                message: e.to_string(),
            });
        }
        if let Err(e) = self.probe("/livez").await {
            return Ok(ClusterHealth {
                state: ClusterState::Error,
                reason: "KubernetesNotLived".to_string(),
                message: e.to_string(),
            });
        }
        Ok(ClusterHealth::active())
    }

    async fn clean_up_cluster(&self, _cluster_name: &str) -> Result<(), KubernetesProviderError> {
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<NodeStatus, KubernetesProviderError> {
        let nodes: Api<Node> = Api::all(self.client()?);
        let node = nodes.get(name).await?;
        Ok(node_status(&node))
    }

    async fn get_nodes(&self, nodegroup: &str) -> Result<Vec<NodeStatus>, KubernetesProviderError> {
        let nodes: Api<Node> = Api::all(self.client()?);
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list
            .items
            .iter()
            .filter(|n| n.metadata.name.as_deref().is_some_and(|name| nodegroup_of(name) == nodegroup))
            .map(node_status)
            .collect())
    }

    async fn delete_node(&self, name: &str) -> Result<(), KubernetesProviderError> {
        if self.cluster_deleted {
            return Ok(());
        }
        let nodes: Api<Node> = Api::all(self.client()?);
        match nodes.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn drain_node(&self, name: &str) -> Result<(), KubernetesProviderError> {
        if self.cluster_deleted {
            return Ok(());
        }
        let nodes: Api<Node> = Api::all(self.client()?);
        let node = match nodes.get(name).await {
            Ok(node) => node,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        // Cordon only; pods are left to the kubelet shutdown
        if !node.spec.as_ref().and_then(|s| s.unschedulable).unwrap_or(false) {
            debug!("Cordoning node {}", name);
            let patch = json!({ "spec": { "unschedulable": true } });
            nodes.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        }
        Ok(())
    }

    async fn get_bootstrap_script(&self, nodegroup_type: NodegroupType) -> Result<String, KubernetesProviderError> {
        let path = match nodegroup_type {
            NodegroupType::Controlplane => &self.controlplane_bootstrap_script,
            NodegroupType::Worker => &self.worker_bootstrap_script,
        };
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| KubernetesProviderError::BootstrapScript {
                path: path.display().to_string(),
                source,
            })
    }

    async fn create_bootstrap_token_secret(&self, token: &BootstrapToken) -> Result<(), KubernetesProviderError> {
        let secrets: Api<Secret> = Api::namespaced(self.client()?, BOOTSTRAP_TOKEN_NAMESPACE);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(token.secret_name()),
                namespace: Some(BOOTSTRAP_TOKEN_NAMESPACE.to_string()),
                ..Default::default()
            },
            type_: Some("bootstrap.kubernetes.io/token".to_string()),
            string_data: Some(token.secret_data()),
            ..Default::default()
        };
        secrets.create(&PostParams::default(), &secret).await?;
        Ok(())
    }

    async fn approve_kubelet_serving_csrs(&self, node_name_prefix: &str) -> Result<Vec<String>, KubernetesProviderError> {
        let csrs: Api<CertificateSigningRequest> = Api::all(self.client()?);
        let list = csrs.list(&ListParams::default()).await?;

        let mut approved = Vec::new();
        for csr in list.items.iter().filter(|c| is_pending_serving_csr(c, node_name_prefix)) {
            let Some(name) = csr.metadata.name.as_deref() else {
                continue;
            };
            debug!("Approving csr {}", name);
            let patch = json!({
                "status": {
                    "conditions": [{
                        "type": "Approved",
                        "status": "True",
                        "reason": "operatorApproval",
                        "message": "This csr is approved by the operator",
                        "lastUpdateTime": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                    }]
                }
            });
            csrs.patch_approval(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            approved.push(name.to_string());
        }
        Ok(approved)
    }

    async fn create_namespace(&self, name: &str) -> Result<(), KubernetesProviderError> {
        let namespaces: Api<Namespace> = Api::all(self.client()?);
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        namespaces.create(&PostParams::default(), &namespace).await?;
        Ok(())
    }

    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), KubernetesProviderError> {
        let secrets: Api<Secret> = Api::namespaced(self.client()?, namespace);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            string_data: Some(data),
            ..Default::default()
        };
        secrets.create(&PostParams::default(), &secret).await?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, KubernetesProviderError> {
        let secrets: Api<Secret> = Api::namespaced(self.client()?, namespace);
        let secret = secrets.get(name).await?;
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(json: serde_json::Value) -> Node {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_node_status_ready_node() {
        let n = node(json!({
            "metadata": {
                "name": "ng-abc-12345",
                "creationTimestamp": "2024-05-01T10:00:00Z",
                "labels": { AUTO_REPAIR_LABEL: "false" }
            },
            "spec": { "unschedulable": true },
            "status": {
                "addresses": [
                    { "type": "Hostname", "address": "ng-abc-12345" },
                    { "type": "InternalIP", "address": "10.0.0.7" }
                ],
                "nodeInfo": {
                    "kubeletVersion": "v1.28.5", "kubeProxyVersion": "v1.28.5",
                    "architecture": "", "bootID": "", "containerRuntimeVersion": "", "kernelVersion": "",
                    "machineID": "", "operatingSystem": "", "osImage": "", "systemUUID": ""
                },
                "conditions": [
                    { "type": "MemoryPressure", "status": "False" },
                    { "type": "Ready", "status": "True", "reason": "KubeletReady",
                      "lastTransitionTime": "2024-05-01T10:05:00Z" }
                ]
            }
        }));

        let status = node_status(&n);
        assert_eq!(status.name, "ng-abc-12345");
        assert_eq!(status.ip_address, "10.0.0.7");
        assert_eq!(status.kubelet_version, "v1.28.5");
        assert_eq!(status.state, NodeState::Active);
        assert_eq!(status.message, "Node ready");
        assert_eq!(status.reason, "KubeletReady");
        assert!(status.unschedulable);
        assert!(status.auto_repair_disabled);
        assert_eq!(
            status.last_update.unwrap(),
            DateTime::parse_from_rfc3339("2024-05-01T10:05:00Z").unwrap()
        );
    }

    #[test]
    fn test_node_status_not_ready_node() {
        let n = node(json!({
            "metadata": { "name": "ng-abc-12345", "labels": { AUTO_REPAIR_LABEL: "maybe" } },
            "status": { "conditions": [ { "type": "Ready", "status": "False", "reason": "KubeletNotReady" } ] }
        }));
        let status = node_status(&n);
        assert_eq!(status.state, NodeState::Updating);
        assert_eq!(status.message, "Configuring node");
        assert!(!status.auto_repair_disabled);
        assert!(status.last_update.is_some());
    }

    #[test]
    fn test_nodegroup_of() {
        assert_eq!(nodegroup_of("ng-abc-12345"), "ng-abc");
        assert_eq!(nodegroup_of("ng-abc-ig-12345-0"), "ng-abc-ig-12345");
        assert_eq!(nodegroup_of("single"), "single");
    }

    #[test]
    fn test_pending_serving_csr_matching() {
        let csr: CertificateSigningRequest = serde_json::from_value(json!({
            "metadata": { "name": "csr-1" },
            "spec": {
                "request": "",
                "signerName": KUBELET_SERVING_SIGNER,
                "username": "system:node:ng-abc-12345"
            }
        }))
        .unwrap();
        assert!(is_pending_serving_csr(&csr, "ng-abc"));
        assert!(!is_pending_serving_csr(&csr, "ng-xyz"));

        let mut approved = csr.clone();
        approved.status = Some(serde_json::from_value(json!({
            "conditions": [{ "type": "Approved", "status": "True" }]
        })).unwrap());
        assert!(!is_pending_serving_csr(&approved, "ng-abc"));

        let mut client_csr = csr;
        client_csr.spec.signer_name = "kubernetes.io/kube-apiserver-client-kubelet".to_string();
        assert!(!is_pending_serving_csr(&client_csr, "ng-abc"));
    }

    #[tokio::test]
    async fn test_disconnected_provider() {
        let provider = IksProvider::new(
            PathBuf::from("/nonexistent/cp.sh"),
            PathBuf::from("/nonexistent/worker.sh"),
            true,
            None,
            Duration::days(365),
            Duration::days(365),
        );
        assert!(!provider.is_connected());
        assert!(provider.drain_node("ng-abc-12345").await.is_ok());
        assert!(provider.delete_node("ng-abc-12345").await.is_ok());
        assert!(matches!(
            provider.get_node("ng-abc-12345").await,
            Err(KubernetesProviderError::NotConnected)
        ));
        assert!(matches!(
            provider.get_bootstrap_script(NodegroupType::Worker).await,
            Err(KubernetesProviderError::BootstrapScript { .. })
        ));
    }
}
