//! Node provider request and metadata models

use chrono::{DateTime, Utc};
use crds::{NodeState, NodeStatus, Nodegroup};
use serde::{Deserialize, Serialize};

/// Everything a provider needs to create an instance for a nodegroup
#[derive(Debug, Clone)]
pub struct CreateNodeRequest {
    /// Nodegroup the instance belongs to
    pub nodegroup: Nodegroup,
    /// Flag string executed by the bootstrap script on first boot
    pub registration_cmd: String,
    /// Bootstrap script contents
    pub bootstrap_script: String,
    /// Static addressing, for providers without DHCP
    pub network: Option<StaticNetwork>,
}

/// Static addressing for a new instance
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StaticNetwork {
    /// Address to assign
    pub ip: String,
    /// Nameserver
    pub nameserver: String,
    /// Default gateway
    pub gateway: String,
}

/// CPU facts of an instance type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CpuInfo {
    /// Physical cores
    pub cores: u32,
    /// CPU id
    pub id: String,
    /// Marketing model name
    pub model_name: String,
    /// Sockets
    pub sockets: u32,
    /// Threads per core
    pub threads: u32,
}

/// GPU facts of an instance type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GpuInfo {
    /// Number of accelerators
    pub count: u32,
    /// Accelerator model name
    pub model_name: String,
}

/// Memory facts of an instance type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryInfo {
    /// Size such as `256Gi`
    pub size: String,
}

/// Instance type metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceType {
    /// Instance type name
    pub name: String,
    /// High-bandwidth memory mode
    pub hbm_mode: String,
    /// CPU facts
    pub cpu: Option<CpuInfo>,
    /// GPU facts
    pub gpu: Option<GpuInfo>,
    /// Memory facts
    pub memory: Option<MemoryInfo>,
}

/// A component baked into a machine image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MachineImageComponent {
    /// Component name
    pub name: String,
    /// Component type, e.g. `Firmware kit` or `Software kit`
    #[serde(rename = "type")]
    pub component_type: String,
    /// Component version
    pub version: String,
}

/// Machine image metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MachineImage {
    /// Image name
    pub name: String,
    /// Components
    pub components: Vec<MachineImageComponent>,
}

/// Instance lifecycle phase reported by the compute service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum InstancePhase {
    /// Being created
    #[default]
    Provisioning,
    /// Running
    Ready,
    /// Being stopped
    Stopping,
    /// Stopped
    Stopped,
    /// Being deleted
    Terminating,
    /// Failed
    Failed,
}

impl InstancePhase {
    /// Node state corresponding to this phase
    #[must_use]
    pub fn node_state(self) -> NodeState {
        match self {
            InstancePhase::Ready => NodeState::Active,
            InstancePhase::Terminating => NodeState::Deleting,
            InstancePhase::Failed => NodeState::Error,
            InstancePhase::Provisioning | InstancePhase::Stopping | InstancePhase::Stopped => NodeState::Updating,
        }
    }
}

/// Network interface of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceInterface {
    /// Interface name
    pub name: String,
    /// Addresses, first one primary
    pub addresses: Vec<String>,
    /// DNS name
    pub dns_name: String,
}

/// Instance record returned by the compute service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    /// Instance name
    pub name: String,
    /// Machine image
    pub machine_image: String,
    /// Instance type
    pub instance_type: String,
    /// Phase
    pub phase: InstancePhase,
    /// Status message
    pub message: String,
    /// Interfaces
    pub interfaces: Vec<InstanceInterface>,
    /// Creation time
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set once the compute service starts deleting the instance
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

/// Interface carrying storage traffic, when present
pub const STORAGE_BACKEND_INTERFACE: &str = "storage0";

impl Instance {
    fn phase_message(&self) -> String {
        match self.phase {
            InstancePhase::Provisioning => "Provisioning node".to_string(),
            InstancePhase::Ready => "Configuring node".to_string(),
            InstancePhase::Terminating => "Deleting node".to_string(),
            _ => self.message.clone(),
        }
    }

    /// Converts the compute record into a node status.
    #[must_use]
    pub fn to_node_status(&self) -> NodeStatus {
        let primary = self.interfaces.first();
        let storage_ip = self
            .interfaces
            .iter()
            .find(|i| i.name == STORAGE_BACKEND_INTERFACE)
            .and_then(|i| i.addresses.first().cloned())
            .unwrap_or_default();

        NodeStatus {
            name: self.name.clone(),
            ip_address: primary.and_then(|i| i.addresses.first().cloned()).unwrap_or_default(),
            storage_backend_ip: storage_ip,
            dns_name: primary.map(|i| i.dns_name.clone()).unwrap_or_default(),
            instance_imi: self.machine_image.clone(),
            state: self.phase.node_state(),
            message: self.phase_message(),
            creation_time: self.creation_timestamp,
            last_update: Some(Utc::now()),
            ..Default::default()
        }
    }
}

/// Five-character random suffix used in generated names.
fn short_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..5].to_string()
}

/// Generates a node name for a nodegroup: `<nodegroup>-<5 chars>`.
#[must_use]
pub fn generate_node_name(nodegroup: &str) -> String {
    format!("{}-{}", nodegroup, short_suffix())
}

/// Generates an instance group name for a nodegroup: `<nodegroup>-ig-<5 chars>`.
#[must_use]
pub fn generate_instance_group_name(nodegroup: &str) -> String {
    format!("{}-ig-{}", nodegroup, short_suffix())
}

/// Name of the `index`-th member of an instance group.
#[must_use]
pub fn instance_group_member_name(instance_group: &str, index: u32) -> String {
    format!("{instance_group}-{index}")
}
