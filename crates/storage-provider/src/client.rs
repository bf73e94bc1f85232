//! Storage service client
//!
//! REST client for the file storage service. Weka namespaces are
//! filesystem orgs, Vast namespaces are plain filesystems:
//! - `/v1/cloudaccounts/{id}/filesystemorgs[/name/{name}]`
//! - `/v1/cloudaccounts/{id}/filesystems[/name/{name}]`

use crate::error::StorageProviderError;
use crate::models::*;
use crate::provider_trait::StorageProviderTrait;
use crds::{Storage, StorageStatus, VAST_STORAGE_PROVIDER, WEKA_STORAGE_PROVIDER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Storage backend flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Filesystem orgs mounted over the weka protocol
    Weka,
    /// Filesystems mounted over NFS
    Vast,
}

impl StorageBackend {
    fn collection(self) -> &'static str {
        match self {
            StorageBackend::Weka => "filesystemorgs",
            StorageBackend::Vast => "filesystems",
        }
    }

    fn provider(self) -> &'static str {
        match self {
            StorageBackend::Weka => WEKA_STORAGE_PROVIDER,
            StorageBackend::Vast => VAST_STORAGE_PROVIDER,
        }
    }

    fn resource_name(self, cluster_name: &str) -> &str {
        match self {
            StorageBackend::Weka => cluster_name,
            StorageBackend::Vast => vast_filesystem_name(cluster_name),
        }
    }
}

/// Storage service client for one backend
#[derive(Debug)]
pub struct FilesystemClient {
    client: Client,
    base_url: String,
    backend: StorageBackend,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl FilesystemClient {
    /// Create a new storage client
    ///
    /// # Arguments
    /// * `base_url` - Storage API base URL (e.g., "http://storage-api:8080")
    /// * `backend` - Which namespace flavour this client manages
    pub fn new(base_url: impl Into<String>, backend: StorageBackend) -> Result<Self, StorageProviderError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            backend,
        })
    }

    /// Backend this client manages
    pub fn backend(&self) -> StorageBackend {
        self.backend
    }

    fn collection_url(&self, cloud_account_id: &str) -> String {
        format!(
            "{}/v1/cloudaccounts/{}/{}",
            self.base_url,
            urlencoding::encode(cloud_account_id),
            self.backend.collection()
        )
    }

    fn item_url(&self, cloud_account_id: &str, name: &str) -> String {
        format!("{}/name/{}", self.collection_url(cloud_account_id), urlencoding::encode(name))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<String, StorageProviderError> {
        let response = request.header("Accept", "application/json").send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::NOT_FOUND {
            return Err(StorageProviderError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let parsed: Option<ApiErrorBody> = serde_json::from_str(&body).ok();
            let (code, message) = match parsed {
                Some(err) if !err.message.is_empty() => (err.code, err.message),
                _ => (status.as_u16().to_string(), body),
            };
            return Err(StorageProviderError::Api { code, message });
        }
        Ok(body)
    }

    fn filesystem(&self, request: &StorageRequest) -> Filesystem {
        let name = self.backend.resource_name(&request.name).to_string();
        let (mount_protocol, storage_class, volume_path) = match self.backend {
            StorageBackend::Weka => {
                let class = if request.cluster_type == SUPERCOMPUTE_CLUSTER_TYPE {
                    "AIOptimized"
                } else {
                    "GeneralPurpose"
                };
                ("Weka", class, String::new())
            }
            StorageBackend::Vast => ("NFS", "GeneralPurposeStd", format!("/{name}")),
        };

        Filesystem {
            metadata: FilesystemMetadata {
                name,
                cloud_account_id: request.cloud_account_id.clone(),
                skip_quota_check: true,
                creation_timestamp: None,
            },
            spec: FilesystemSpec {
                availability_zone: request.availability_zone.clone(),
                request: Capacity {
                    storage: request.size.clone(),
                },
                filesystem_type: "ComputeKubernetes".to_string(),
                mount_protocol: mount_protocol.to_string(),
                encrypted: true,
                volume_path,
                prefix: request.prefix.clone(),
                storage_class: storage_class.to_string(),
                scheduler: None,
            },
            status: None,
        }
    }
}

#[async_trait::async_trait]
impl StorageProviderTrait for FilesystemClient {
    fn provider(&self) -> &str {
        self.backend.provider()
    }

    async fn create_storage(&self, request: &StorageRequest) -> Result<(), StorageProviderError> {
        let body = self.filesystem(request);
        let url = self.collection_url(&request.cloud_account_id);
        debug!("Creating {} storage {} ({})", self.provider(), body.metadata.name, request.size);
        self.send(
            self.client.post(&url).json(&body),
            &format!("create storage {}", body.metadata.name),
        )
        .await?;
        Ok(())
    }

    async fn update_storage(&self, request: &StorageRequest) -> Result<(), StorageProviderError> {
        let body = self.filesystem(request);
        let url = self.item_url(&request.cloud_account_id, &body.metadata.name);
        debug!("Updating {} storage {} to {}", self.provider(), body.metadata.name, request.size);
        match self
            .send(self.client.put(&url).json(&body), &format!("storage {}", body.metadata.name))
            .await
        {
            Ok(_) => Ok(()),
            Err(StorageProviderError::Api { message, .. }) if message.contains(SIZE_EXTENSION_ONLY_MESSAGE) => {
                warn!("Storage {} can only grow, keeping current size", body.metadata.name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_storage(&self, name: &str, cloud_account_id: &str, prefix: &str) -> Result<(), StorageProviderError> {
        let resource = self.backend.resource_name(name);
        let mut url = self.item_url(cloud_account_id, resource);
        if self.backend == StorageBackend::Weka {
            url = format!("{}?prefix={}", url, urlencoding::encode(prefix));
        }
        debug!("Deleting {} storage {}", self.provider(), resource);
        self.send(self.client.delete(&url), &format!("storage {resource}")).await?;
        Ok(())
    }

    async fn get_storage(
        &self,
        name: &str,
        cloud_account_id: &str,
        storage: &Storage,
        previous: &StorageStatus,
    ) -> Result<StorageStatus, StorageProviderError> {
        let resource = self.backend.resource_name(name);
        let url = self.item_url(cloud_account_id, resource);
        let body = match self.send(self.client.get(&url), &format!("storage {resource}")).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => return Ok(pending_storage_status(&storage.provider)),
            Err(e) => return Err(e),
        };
        let filesystem: Filesystem = serde_json::from_str(&body)?;
        debug!(
            "Storage {} is {:?}, requested {} current {}",
            resource,
            filesystem.status.as_ref().map(|s| s.phase),
            storage.size,
            filesystem.spec.request.storage
        );
        Ok(filesystem.to_storage_status(&storage.provider, previous))
    }
}
