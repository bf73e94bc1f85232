//! Storage traits for mocking

use crate::error::StorageProviderError;
use crate::models::{StorageAgent, StorageRequest};
use crds::{Storage, StorageStatus};

/// Storage namespace lifecycle for one backend
#[async_trait::async_trait]
pub trait StorageProviderTrait: Send + Sync {
    /// Backend name (`weka` or `vast`)
    fn provider(&self) -> &str;

    /// Requests a new namespace
    async fn create_storage(&self, request: &StorageRequest) -> Result<(), StorageProviderError>;

    /// Resizes an existing namespace
    async fn update_storage(&self, request: &StorageRequest) -> Result<(), StorageProviderError>;

    /// Deletes a namespace
    async fn delete_storage(&self, name: &str, cloud_account_id: &str, prefix: &str) -> Result<(), StorageProviderError>;

    /// Reads the namespace and maps it onto a status entry.
    ///
    /// A namespace that does not exist yet yields an `Updating` status with
    /// `namespace_created` unset. `previous` carries forward `active_at`.
    async fn get_storage(
        &self,
        name: &str,
        cloud_account_id: &str,
        storage: &Storage,
        previous: &StorageStatus,
    ) -> Result<StorageStatus, StorageProviderError>;
}

/// Storage agent registration for worker nodes
#[async_trait::async_trait]
pub trait StorageAgentTrait: Send + Sync {
    /// Agents registered against a backend cluster
    async fn list_registered_agents(&self, cluster_id: &str) -> Result<Vec<StorageAgent>, StorageProviderError>;

    /// Registers a node and returns its client id
    async fn register_agent(&self, cluster_id: &str, name: &str, ip_address: &str) -> Result<String, StorageProviderError>;

    /// Removes a registration
    async fn deregister_agent(&self, cluster_id: &str, client_id: &str) -> Result<(), StorageProviderError>;
}
