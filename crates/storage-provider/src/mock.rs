//! Mock storage provider and agent client for unit testing

use crate::error::StorageProviderError;
use crate::models::*;
use crate::provider_trait::{StorageAgentTrait, StorageProviderTrait};
use crds::{Storage, StorageStatus};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Mock storage provider for testing
///
/// Namespaces are keyed by cluster name. `create_storage` records the
/// request and leaves the namespace provisioning until a test moves it on
/// with [`MockStorageProvider::set_status`].
#[derive(Clone)]
pub struct MockStorageProvider {
    provider: String,
    namespaces: Arc<Mutex<BTreeMap<String, StorageStatus>>>,
    created: Arc<Mutex<Vec<StorageRequest>>>,
    updated: Arc<Mutex<Vec<StorageRequest>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

impl std::fmt::Debug for MockStorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStorageProvider")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl MockStorageProvider {
    /// Create a mock for a backend name
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            namespaces: Arc::default(),
            created: Arc::default(),
            updated: Arc::default(),
            deleted: Arc::default(),
        }
    }

    /// Set the status returned for a cluster's namespace
    pub fn set_status(&self, name: &str, status: StorageStatus) {
        self.namespaces.lock().unwrap().insert(name.to_string(), status);
    }

    /// Create requests received
    pub fn created(&self) -> Vec<StorageRequest> {
        self.created.lock().unwrap().clone()
    }

    /// Update requests received
    pub fn updated(&self) -> Vec<StorageRequest> {
        self.updated.lock().unwrap().clone()
    }

    /// Deleted namespace names
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl StorageProviderTrait for MockStorageProvider {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn create_storage(&self, request: &StorageRequest) -> Result<(), StorageProviderError> {
        size_in_tb(&request.size)?;
        self.created.lock().unwrap().push(request.clone());
        self.set_status(&request.name, StorageStatus {
            provider: self.provider.clone(),
            size: request.size.clone(),
            namespace_created: true,
            created_at: Some(chrono::Utc::now()),
            ..pending_storage_status(&self.provider)
        });
        Ok(())
    }

    async fn update_storage(&self, request: &StorageRequest) -> Result<(), StorageProviderError> {
        let mut namespaces = self.namespaces.lock().unwrap();
        let status = namespaces
            .get_mut(&request.name)
            .ok_or_else(|| StorageProviderError::NotFound(format!("storage {}", request.name)))?;
        status.size = request.size.clone();
        self.updated.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn delete_storage(&self, name: &str, _cloud_account_id: &str, _prefix: &str) -> Result<(), StorageProviderError> {
        self.deleted.lock().unwrap().push(name.to_string());
        self.namespaces
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageProviderError::NotFound(format!("storage {name}")))
    }

    async fn get_storage(
        &self,
        name: &str,
        _cloud_account_id: &str,
        storage: &Storage,
        previous: &StorageStatus,
    ) -> Result<StorageStatus, StorageProviderError> {
        let Some(mut status) = self.namespaces.lock().unwrap().get(name).cloned() else {
            return Ok(pending_storage_status(&storage.provider));
        };
        if status.active_at.is_none() {
            status.active_at = previous.active_at;
        }
        Ok(status)
    }
}

/// Mock storage agent client for testing
#[derive(Clone, Default)]
pub struct MockStorageAgent {
    agents: Arc<Mutex<BTreeMap<String, Vec<StorageAgent>>>>,
    deregistered: Arc<Mutex<Vec<String>>>,
    counter: Arc<Mutex<u32>>,
}

impl std::fmt::Debug for MockStorageAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStorageAgent").finish_non_exhaustive()
    }
}

impl MockStorageAgent {
    /// Create a mock with no registrations
    pub fn new() -> Self {
        Self::default()
    }

    /// Agents registered against a cluster
    pub fn agents(&self, cluster_id: &str) -> Vec<StorageAgent> {
        self.agents.lock().unwrap().get(cluster_id).cloned().unwrap_or_default()
    }

    /// Deregistered client ids
    pub fn deregistered(&self) -> Vec<String> {
        self.deregistered.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl StorageAgentTrait for MockStorageAgent {
    async fn list_registered_agents(&self, cluster_id: &str) -> Result<Vec<StorageAgent>, StorageProviderError> {
        Ok(self.agents(cluster_id))
    }

    async fn register_agent(&self, cluster_id: &str, name: &str, _ip_address: &str) -> Result<String, StorageProviderError> {
        let client_id = {
            let mut counter = self.counter.lock().unwrap();
            *counter += 1;
            format!("client-{}", *counter)
        };
        self.agents
            .lock()
            .unwrap()
            .entry(cluster_id.to_string())
            .or_default()
            .push(StorageAgent {
                name: name.to_string(),
                client_id: client_id.clone(),
                status: "Up".to_string(),
                custom_status: "Registered".to_string(),
            });
        Ok(client_id)
    }

    async fn deregister_agent(&self, cluster_id: &str, client_id: &str) -> Result<(), StorageProviderError> {
        let mut agents = self.agents.lock().unwrap();
        let list = agents.entry(cluster_id.to_string()).or_default();
        let before = list.len();
        list.retain(|a| a.client_id != client_id);
        if list.len() == before {
            return Err(StorageProviderError::NotFound(format!("storage agent {client_id}")));
        }
        self.deregistered.lock().unwrap().push(client_id.to_string());
        Ok(())
    }
}
