//! NodeProvider trait for mocking
//!
//! The compute client implements this trait; tests use the in-memory mock.

use crate::error::NodeProviderError;
use crate::models::{CreateNodeRequest, InstanceType, MachineImage};
use chrono::{DateTime, Utc};
use crds::NodeStatus;

/// Compute operations the reconciler relies on
///
/// Not-found conditions are reported as [`NodeProviderError::NotFound`] so
/// callers can recover locally.
#[async_trait::async_trait]
pub trait NodeProviderTrait: Send + Sync {
    /// Creates a single instance and returns its initial status
    async fn create_node(&self, request: &CreateNodeRequest) -> Result<NodeStatus, NodeProviderError>;

    /// Reads one instance
    async fn get_node(&self, name: &str, cloud_account_id: &str) -> Result<NodeStatus, NodeProviderError>;

    /// Lists the instances labelled with a nodegroup name
    async fn get_nodes(&self, nodegroup: &str, cloud_account_id: &str) -> Result<Vec<NodeStatus>, NodeProviderError>;

    /// Deletes one instance
    async fn delete_node(&self, name: &str, cloud_account_id: &str) -> Result<(), NodeProviderError>;

    /// Deletion timestamp of an instance, if the provider has started deleting it
    async fn instance_deletion_timestamp(
        &self,
        name: &str,
        cloud_account_id: &str,
    ) -> Result<Option<DateTime<Utc>>, NodeProviderError>;

    /// Creates a new instance group of `count` instances
    async fn create_private_instance_group(
        &self,
        request: &CreateNodeRequest,
        instance_type: &str,
        count: u32,
    ) -> Result<Vec<NodeStatus>, NodeProviderError>;

    /// Adds `count` members to an existing instance group
    async fn scale_up_instance_group(
        &self,
        request: &CreateNodeRequest,
        instance_group: &str,
        instance_type: &str,
        count: u32,
    ) -> Result<Vec<NodeStatus>, NodeProviderError>;

    /// Removes a single member from an instance group
    async fn delete_instance_group_member(
        &self,
        name: &str,
        instance_group: &str,
        cloud_account_id: &str,
    ) -> Result<(), NodeProviderError>;

    /// Whether the instance group still exists
    async fn search_instance_group(&self, instance_group: &str, cloud_account_id: &str) -> Result<bool, NodeProviderError>;

    /// Hardware facts of an instance type
    async fn get_instance_type(&self, name: &str) -> Result<InstanceType, NodeProviderError>;

    /// Components of a machine image
    async fn get_machine_image(&self, name: &str) -> Result<MachineImage, NodeProviderError>;
}
