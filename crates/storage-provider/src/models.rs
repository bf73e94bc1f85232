//! Storage models and naming helpers

use chrono::{DateTime, Utc};
use crds::{StorageState, StorageStatus};
use serde::{Deserialize, Serialize};

use crate::error::StorageProviderError;

/// Cluster type that gets the AI-optimized storage class
pub const SUPERCOMPUTE_CLUSTER_TYPE: &str = "supercompute";

/// Backend message returned when a resize would shrink a namespace
pub const SIZE_EXTENSION_ONLY_MESSAGE: &str = "only size extension is allowed for file storage";

/// Create or resize request for a storage namespace
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StorageRequest {
    /// Availability zone of the cluster's first network
    pub availability_zone: String,
    /// Cluster name
    pub name: String,
    /// Customer cloud account owning the namespace
    pub cloud_account_id: String,
    /// Size such as `"500GB"`
    pub size: String,
    /// Namespace prefix, see [`weka_prefix`]
    pub prefix: String,
    /// Cluster flavour
    pub cluster_type: String,
}

/// A node registered with the storage backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageAgent {
    /// Node name
    pub name: String,
    /// Backend client id
    pub client_id: String,
    /// Status reported by the backend
    #[serde(alias = "predefinedStatus")]
    pub status: String,
    /// Free-form status
    pub custom_status: String,
}

/// Converts `"<N>GB"` or `"<N>TB"` to terabytes.
///
/// An empty size is zero, which is what a namespace that was never created
/// reports.
pub fn size_in_tb(size: &str) -> Result<f64, StorageProviderError> {
    let size = size.trim();
    if size.is_empty() {
        return Ok(0.0);
    }
    let invalid = || StorageProviderError::InvalidSize(size.to_string());
    let (number, divisor) = if let Some(n) = size.strip_suffix("TB") {
        (n, 1.0)
    } else if let Some(n) = size.strip_suffix("GB") {
        (n, 1000.0)
    } else {
        return Err(invalid());
    };
    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    if value < 0.0 {
        return Err(invalid());
    }
    Ok(value / divisor)
}

/// Namespace prefix derived from a cluster name: characters 3 to 10.
///
/// For `cl-abcdefghij` this is `abcdefg`. Short names yield what is left.
#[must_use]
pub fn weka_prefix(cluster_name: &str) -> String {
    cluster_name.chars().skip(3).take(7).collect()
}

/// Filesystem name used by the Vast backend: the cluster name without `cl-`.
#[must_use]
pub fn vast_filesystem_name(cluster_name: &str) -> &str {
    cluster_name.strip_prefix("cl-").unwrap_or(cluster_name)
}

/// Filesystem phase reported by the storage service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FilesystemPhase {
    /// Being provisioned
    #[default]
    #[serde(rename = "FSProvisioning")]
    Provisioning,
    /// Ready to mount
    #[serde(rename = "FSReady")]
    Ready,
    /// Being deleted
    #[serde(rename = "FSDeleting")]
    Deleting,
    /// Failed
    #[serde(rename = "FSFailed")]
    Failed,
}

impl FilesystemPhase {
    /// Storage state corresponding to this phase
    #[must_use]
    pub fn storage_state(self) -> StorageState {
        match self {
            FilesystemPhase::Provisioning => StorageState::Updating,
            FilesystemPhase::Ready => StorageState::Active,
            FilesystemPhase::Deleting => StorageState::Deleting,
            FilesystemPhase::Failed => StorageState::Error,
        }
    }
}

/// Capacity request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Capacity {
    /// Size string
    pub storage: String,
}

/// Filesystem metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FilesystemMetadata {
    /// Filesystem (or org) name
    pub name: String,
    /// Owning cloud account
    pub cloud_account_id: String,
    /// Bypass quota enforcement
    pub skip_quota_check: bool,
    /// Creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

/// Scheduling result of a filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FilesystemScheduler {
    /// Backend namespace
    pub namespace: SchedulerNamespace,
    /// Backend cluster
    pub cluster: SchedulerCluster,
}

/// Backend namespace a filesystem was scheduled into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SchedulerNamespace {
    /// Namespace name
    pub name: String,
}

/// Backend cluster a filesystem was scheduled onto
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SchedulerCluster {
    /// Cluster UUID
    #[serde(rename = "clusterUUID")]
    pub cluster_uuid: String,
}

/// Filesystem spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FilesystemSpec {
    /// Availability zone
    pub availability_zone: String,
    /// Requested capacity
    pub request: Capacity,
    /// Always `ComputeKubernetes` for cluster storage
    pub filesystem_type: String,
    /// `Weka` or `NFS`
    pub mount_protocol: String,
    /// Encrypted at rest
    pub encrypted: bool,
    /// Export path (Vast only)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub volume_path: String,
    /// Namespace prefix
    pub prefix: String,
    /// Storage class
    pub storage_class: String,
    /// Scheduling result, set by the service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<FilesystemScheduler>,
}

/// Filesystem status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FilesystemStatusBody {
    /// Phase
    pub phase: FilesystemPhase,
    /// Message
    pub message: String,
}

/// Filesystem (or filesystem org) record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Filesystem {
    /// Metadata
    pub metadata: FilesystemMetadata,
    /// Spec
    pub spec: FilesystemSpec,
    /// Status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FilesystemStatusBody>,
}

impl Filesystem {
    /// Maps the record onto a storage status entry for `provider`.
    #[must_use]
    pub fn to_storage_status(&self, provider: &str, previous: &StorageStatus) -> StorageStatus {
        let status = self.status.clone().unwrap_or_default();
        let state = status.phase.storage_state();
        let mut out = StorageStatus {
            provider: provider.to_string(),
            size: self.spec.request.storage.clone(),
            namespace_created: true,
            state,
            message: status.message,
            created_at: self.metadata.creation_timestamp,
            ..Default::default()
        };
        if state == StorageState::Active {
            if let Some(scheduler) = &self.spec.scheduler {
                out.namespace_name = scheduler.namespace.name.clone();
                out.cluster_id = scheduler.cluster.cluster_uuid.clone();
            }
            out.active_at = previous.active_at.or_else(|| Some(Utc::now()));
        }
        out
    }
}

/// Status of a namespace that has not been created yet
#[must_use]
pub fn pending_storage_status(provider: &str) -> StorageStatus {
    StorageStatus {
        provider: provider.to_string(),
        state: StorageState::Updating,
        ..Default::default()
    }
}
