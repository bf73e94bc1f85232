//! Storage provider factory

use crate::agent::AgentClient;
use crate::client::{FilesystemClient, StorageBackend};
use crate::error::StorageProviderError;
use crate::provider_trait::{StorageAgentTrait, StorageProviderTrait};
use crds::{VAST_STORAGE_PROVIDER, WEKA_STORAGE_PROVIDER};
use std::sync::Arc;

/// Connection settings for the storage service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageProviderConfig {
    /// Storage API base URL
    pub storage_url: String,
}

impl Default for StorageProviderConfig {
    fn default() -> Self {
        Self {
            storage_url: "http://storage-api:8080".to_string(),
        }
    }
}

/// Builds the provider for a cluster storage entry (`weka` or `vast`).
pub fn new_storage_provider(
    name: &str,
    config: &StorageProviderConfig,
) -> Result<Arc<dyn StorageProviderTrait>, StorageProviderError> {
    let backend = match name.to_ascii_lowercase().as_str() {
        WEKA_STORAGE_PROVIDER => StorageBackend::Weka,
        VAST_STORAGE_PROVIDER => StorageBackend::Vast,
        other => return Err(StorageProviderError::Unsupported(other.to_string())),
    };
    Ok(Arc::new(FilesystemClient::new(config.storage_url.clone(), backend)?))
}

/// Builds the storage agent registration client.
pub fn new_storage_agent(config: &StorageProviderConfig) -> Result<Arc<dyn StorageAgentTrait>, StorageProviderError> {
    Ok(Arc::new(AgentClient::new(config.storage_url.clone())?))
}
