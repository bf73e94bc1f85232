//! Nodegroup CRD
//!
//! A set of homogeneous compute nodes belonging to one cluster, either
//! control-plane or worker. The spec carries the desired count and machine
//! image; the status carries one `NodeStatus` per observed node.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::common::Vnet;

/// Label carrying the owning cluster name on every nodegroup.
pub const CLUSTER_LABEL: &str = "cluster";

/// Label that turns storage-agent registration on or off for a nodegroup.
pub const STORAGE_REGISTER_LABEL: &str = "iks.cloud.intel.com/storage-register";

/// Downstream node label that disables auto repair when set to `false`.
pub const AUTO_REPAIR_LABEL: &str = "iks.cloud.intel.com/autorepair";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "kaas.microscaler.io",
    version = "v1alpha1",
    kind = "Nodegroup",
    namespaced,
    status = "NodegroupStatus",
    shortname = "ng",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"Count","type":"integer","jsonPath":".status.count"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodegroupSpec {
    /// Name of the owning cluster
    pub cluster_name: String,

    /// Control plane or worker
    pub nodegroup_type: NodegroupType,

    /// Desired number of nodes (or instance groups)
    #[serde(default)]
    pub count: i32,

    /// Compute instance type, e.g. `vm-spr-sml` or `bm-icp-gaudi2-cluster-4`
    pub instance_type: String,

    /// Machine image used to provision nodes
    #[serde(rename = "instanceIMI")]
    pub instance_imi: String,

    /// Kubernetes version installed on the nodes
    #[serde(default)]
    pub kubernetes_version: String,

    /// Cluster flavour passed to storage and registration
    #[serde(default)]
    pub cluster_type: String,

    /// Node provider name used by the provider factory
    pub node_provider: String,

    /// Kubernetes provider name used by the provider factory
    pub kubernetes_provider: String,

    /// Container runtime name
    #[serde(default, rename = "runtime")]
    pub container_runtime: String,

    /// Extra container runtime arguments
    #[serde(default, rename = "runtimeArgs")]
    pub container_runtime_args: BTreeMap<String, String>,

    /// SSH keys injected into the instances
    #[serde(default)]
    pub ssh_key: Vec<String>,

    /// Cloud account owning the instances
    #[serde(default, rename = "cloudaccountid")]
    pub cloud_account_id: String,

    /// Region the nodes run in
    #[serde(default)]
    pub region: String,

    /// Networks the instances attach to
    #[serde(default)]
    pub vnets: Vec<Vnet>,

    /// Downstream API server load balancer host
    #[serde(default, rename = "apiserverlb")]
    pub api_server_lb: String,

    /// Downstream API server load balancer port
    #[serde(default, rename = "apiserverlbport")]
    pub api_server_lb_port: String,

    /// Etcd load balancer host
    #[serde(default, rename = "etcdlb")]
    pub etcd_lb: String,

    /// Etcd load balancer port
    #[serde(default, rename = "etcdlbport")]
    pub etcd_lb_port: String,

    /// Optional user data URL for the instances
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "userDataURL")]
    pub user_data_url: Option<String>,

    /// Labels applied to the downstream nodes
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Taints applied to the downstream nodes
    #[serde(default)]
    pub taints: BTreeMap<String, String>,

    /// Weka storage integration
    #[serde(default)]
    pub weka_storage: WekaStorage,
}

/// Nodegroup role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum NodegroupType {
    /// Runs etcd and the Kubernetes control plane
    #[serde(alias = "controlplane")]
    Controlplane,

    /// Runs workloads
    #[default]
    #[serde(alias = "worker")]
    Worker,
}

impl NodegroupType {
    /// Lowercase form used by bootstrap scripts and registration commands.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NodegroupType::Controlplane => "controlplane",
            NodegroupType::Worker => "worker",
        }
    }
}

/// Weka storage configuration for a nodegroup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WekaStorage {
    /// Whether nodes mount the weka filesystem
    #[serde(default)]
    pub enable: bool,

    /// Backend cluster id agents register against
    #[serde(default)]
    pub cluster_id: String,

    /// Storage mode; `vast` when the cluster uses Vast instead
    #[serde(default)]
    pub mode: String,

    /// Cores reserved for the weka client
    #[serde(default)]
    pub num_cores: String,

    /// Free-form status reported by the storage backend
    #[serde(default)]
    pub custom_status: String,
}

/// Lifecycle state shared by nodes and nodegroups.
///
/// Serializes as PascalCase but accepts lowercase for compatibility with
/// objects written by older operators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "PascalCase")]
pub enum NodeState {
    /// Node is healthy and serving
    #[serde(alias = "active")]
    Active,

    /// Node is converging
    #[default]
    #[serde(alias = "updating")]
    Updating,

    /// Node failed
    #[serde(alias = "error")]
    Error,

    /// Node is marked for removal
    #[serde(alias = "deleting")]
    Deleting,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeState::Active => "Active",
            NodeState::Updating => "Updating",
            NodeState::Error => "Error",
            NodeState::Deleting => "Deleting",
        };
        f.write_str(s)
    }
}

/// Aggregate nodegroup state
pub type NodegroupState = NodeState;

/// Per-node storage agent registration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WekaStorageStatus {
    /// Client id assigned by the storage backend on registration
    #[serde(default)]
    pub client_id: String,

    /// Agent status reported by the backend
    #[serde(default)]
    pub status: String,

    /// Free-form backend status
    #[serde(default)]
    pub custom_status: String,

    /// Last registration message
    #[serde(default)]
    pub message: String,
}

/// Observed state of a single node
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// Node (and instance) name
    pub name: String,

    /// Primary IP address
    #[serde(default)]
    pub ip_address: String,

    /// Storage backend IP, when the instance has a dedicated storage NIC
    #[serde(default, rename = "storageBackendIP")]
    pub storage_backend_ip: String,

    /// DNS name assigned by the provider
    #[serde(default)]
    pub dns_name: String,

    /// Machine image the instance was created from
    #[serde(default, rename = "instanceIMI")]
    pub instance_imi: String,

    /// Kubelet version reported by the downstream node
    #[serde(default)]
    pub kubelet_version: String,

    /// Kube-proxy version reported by the downstream node
    #[serde(default)]
    pub kube_proxy_version: String,

    /// Lifecycle state
    #[serde(default)]
    pub state: NodeState,

    /// Time of the last state change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,

    /// Time the instance was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,

    /// Machine-readable reason for the current state
    #[serde(default)]
    pub reason: String,

    /// Human-readable message for the current state
    #[serde(default)]
    pub message: String,

    /// Downstream node is cordoned
    #[serde(default)]
    pub unschedulable: bool,

    /// Auto repair is disabled on the downstream node
    #[serde(default)]
    pub auto_repair_disabled: bool,

    /// Storage agent registration
    #[serde(default)]
    pub weka_storage: WekaStorageStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Observed state of a nodegroup
pub struct NodegroupStatus {
    /// Nodegroup name
    #[serde(default)]
    pub name: String,

    /// Nodegroup role
    #[serde(default, rename = "type")]
    pub nodegroup_type: NodegroupType,

    /// Number of observed nodes
    #[serde(default)]
    pub count: i32,

    /// Aggregate state
    #[serde(default)]
    pub state: NodegroupState,

    /// Reason for the aggregate state
    #[serde(default)]
    pub reason: String,

    /// Message for the aggregate state
    #[serde(default)]
    pub message: String,

    /// Observed nodes
    #[serde(default)]
    pub nodes: Vec<NodeStatus>,
}

impl Nodegroup {
    /// Whether this nodegroup runs the control plane.
    #[must_use]
    pub fn is_controlplane(&self) -> bool {
        self.spec.nodegroup_type == NodegroupType::Controlplane
    }

    /// Whether nodes are provisioned as provider-side instance groups.
    ///
    /// Only worker nodegroups whose instance type encodes a cluster size
    /// (e.g. `bm-icp-gaudi2-cluster-4`) are instance groups.
    #[must_use]
    pub fn is_instance_group(&self) -> bool {
        !self.is_controlplane() && self.spec.instance_type.contains("cluster")
    }
}
