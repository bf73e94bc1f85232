//! Cluster CRD
//!
//! Desired topology of a managed Kubernetes cluster: control-plane image,
//! worker nodegroup templates and storage. The status mirrors the owned
//! nodegroups and storage namespaces.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::common::Vnet;
use crate::nodegroup::{NodegroupStatus, NodeState};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "kaas.microscaler.io",
    version = "v1alpha1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Kubernetes version
    #[serde(default)]
    pub kubernetes_version: String,

    /// Control-plane instance type
    pub instance_type: String,

    /// Control-plane machine image; changing it triggers a rolling upgrade
    #[serde(rename = "instanceIMI")]
    pub instance_imi: String,

    /// Cluster flavour
    #[serde(default)]
    pub cluster_type: String,

    /// Node provider name
    pub node_provider: String,

    /// Kubernetes provider name
    pub kubernetes_provider: String,

    /// Cluster networking
    #[serde(default)]
    pub network: Network,

    /// Worker nodegroup templates
    #[serde(default)]
    pub nodegroups: Vec<NodegroupTemplateSpec>,

    /// Storage namespaces attached to the cluster
    #[serde(default)]
    pub storage: Vec<Storage>,

    /// Control-plane networks
    #[serde(default)]
    pub vnets: Vec<Vnet>,

    /// Cloud account that owns the cluster
    #[serde(default, rename = "cloudaccountid")]
    pub cloud_account_id: String,

    /// Customer cloud account, required for storage
    #[serde(default, rename = "customerCloudaccountid")]
    pub customer_cloud_account_id: String,

    /// SSH keys for the control-plane instances
    #[serde(default)]
    pub ssh_key: Vec<String>,

    /// Take periodic etcd snapshots
    #[serde(default)]
    pub etcd_backup_enabled: bool,

    /// Load balancers fronting the control plane, filled in by the network service
    #[serde(default)]
    pub load_balancers: LoadBalancers,
}

/// Control-plane load balancer endpoints
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancers {
    /// Etcd load balancer address
    #[serde(default)]
    pub etcd: String,

    /// Etcd load balancer port
    #[serde(default)]
    pub etcd_port: u16,

    /// Internal API server load balancer address
    #[serde(default)]
    pub apiserver: String,

    /// Internal API server load balancer port
    #[serde(default)]
    pub apiserver_port: u16,

    /// Public API server load balancer address
    #[serde(default)]
    pub public_apiserver: String,

    /// Public API server load balancer port
    #[serde(default)]
    pub public_apiserver_port: u16,

    /// Konnectivity load balancer address
    #[serde(default)]
    pub konnectivity: String,
}

impl LoadBalancers {
    /// Whether the etcd and API server endpoints have been provisioned.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.etcd.is_empty() && self.etcd_port != 0 && !self.apiserver.is_empty() && self.apiserver_port != 0
    }
}

/// Cluster networking
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Service CIDR
    #[serde(default, rename = "serviceCIDR")]
    pub service_cidr: String,

    /// Pod CIDR
    #[serde(default, rename = "podCIDR")]
    pub pod_cidr: String,

    /// Cluster DNS address
    #[serde(default, rename = "clusterDNS")]
    pub cluster_dns: String,

    /// Region
    #[serde(default)]
    pub region: String,
}

/// Worker nodegroup template
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodegroupTemplateSpec {
    /// Nodegroup name
    pub name: String,

    /// Kubernetes version
    #[serde(default)]
    pub kubernetes_version: String,

    /// Instance type
    pub instance_type: String,

    /// Machine image
    #[serde(rename = "instanceIMI")]
    pub instance_imi: String,

    /// Cluster flavour
    #[serde(default)]
    pub cluster_type: String,

    /// Desired node count
    #[serde(default)]
    pub count: i32,

    /// SSH keys
    #[serde(default)]
    pub ssh_key: Vec<String>,

    /// Networks
    #[serde(default)]
    pub vnets: Vec<Vnet>,

    /// Cloud account
    #[serde(default, rename = "cloudaccountid")]
    pub cloud_account_id: String,

    /// Labels for the downstream nodes
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Taints for the downstream nodes
    #[serde(default)]
    pub taints: BTreeMap<String, String>,

    /// User data URL
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "userDataURL")]
    pub user_data_url: Option<String>,
}

/// Storage backend kinds
pub const WEKA_STORAGE_PROVIDER: &str = "weka";
/// Vast storage backend
pub const VAST_STORAGE_PROVIDER: &str = "vast";

/// Storage namespace request
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    /// Backend name (`weka` or `vast`)
    pub provider: String,

    /// Size such as `"500GB"` or `"10TB"`
    pub size: String,

    /// Cores reserved for the weka client on worker nodes
    #[serde(default)]
    pub num_cores: String,

    /// Weka client mode passed to worker nodegroups
    #[serde(default)]
    pub mode: String,
}

/// Aggregate cluster state
pub type ClusterState = NodeState;

/// Storage namespace state
pub type StorageState = NodeState;

/// Observed storage namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageStatus {
    /// Backend name
    pub provider: String,

    /// Size currently provisioned
    #[serde(default)]
    pub size: String,

    /// Namespace has been requested
    #[serde(default)]
    pub namespace_created: bool,

    /// Backend namespace name
    #[serde(default)]
    pub namespace_name: String,

    /// Namespace state
    #[serde(default)]
    pub state: StorageState,

    /// Backend cluster id the namespace lives in
    #[serde(default)]
    pub cluster_id: String,

    /// Reason for the state
    #[serde(default)]
    pub reason: String,

    /// Message for the state
    #[serde(default)]
    pub message: String,

    /// Time the namespace was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Time the namespace first became active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_at: Option<DateTime<Utc>>,
}

/// Observed state of a cluster
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Aggregate state
    #[serde(default)]
    pub state: ClusterState,

    /// Time of the last status write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,

    /// Reason for the state
    #[serde(default)]
    pub reason: String,

    /// Message for the state
    #[serde(default)]
    pub message: String,

    /// Mirror of the owned nodegroup statuses
    #[serde(default)]
    pub nodegroups: Vec<NodegroupStatus>,

    /// Storage namespaces
    #[serde(default)]
    pub storage: Vec<StorageStatus>,
}

impl Cluster {
    /// Storage spec entry for a provider, if any.
    #[must_use]
    pub fn storage_spec(&self, provider: &str) -> Option<&Storage> {
        self.spec.storage.iter().find(|s| s.provider == provider)
    }

    /// Storage status entry for a provider, if any.
    #[must_use]
    pub fn storage_status(&self, provider: &str) -> Option<&StorageStatus> {
        self.status
            .as_ref()
            .and_then(|s| s.storage.iter().find(|st| st.provider == provider))
    }
}
