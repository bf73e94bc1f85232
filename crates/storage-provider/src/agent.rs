//! Storage agent registration client

use crate::error::StorageProviderError;
use crate::models::StorageAgent;
use crate::provider_trait::StorageAgentTrait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Client for `/v1/storage/clusters/{id}/agents`
#[derive(Debug)]
pub struct AgentClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    name: &'a str,
    ip_addr: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    #[serde(default)]
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct AgentList {
    #[serde(default)]
    items: Vec<StorageAgent>,
}

impl AgentClient {
    /// Create a new agent client
    pub fn new(base_url: impl Into<String>) -> Result<Self, StorageProviderError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn agents_url(&self, cluster_id: &str) -> String {
        format!(
            "{}/v1/storage/clusters/{}/agents",
            self.base_url,
            urlencoding::encode(cluster_id)
        )
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<String, StorageProviderError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(StorageProviderError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            return Err(StorageProviderError::Api {
                code: status.as_u16().to_string(),
                message: body,
            });
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl StorageAgentTrait for AgentClient {
    async fn list_registered_agents(&self, cluster_id: &str) -> Result<Vec<StorageAgent>, StorageProviderError> {
        let url = self.agents_url(cluster_id);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        let body = Self::check(response, &format!("storage cluster {cluster_id}")).await?;
        let list: AgentList = serde_json::from_str(&body)?;
        Ok(list.items)
    }

    async fn register_agent(&self, cluster_id: &str, name: &str, ip_address: &str) -> Result<String, StorageProviderError> {
        let url = self.agents_url(cluster_id);
        debug!("Registering storage agent {} ({}) with {}", name, ip_address, cluster_id);
        let response = self
            .client
            .post(&url)
            .json(&RegisterRequest { name, ip_addr: ip_address })
            .send()
            .await?;
        let body = Self::check(response, &format!("storage cluster {cluster_id}")).await?;
        let registered: RegisterResponse = serde_json::from_str(&body)?;
        Ok(registered.client_id)
    }

    async fn deregister_agent(&self, cluster_id: &str, client_id: &str) -> Result<(), StorageProviderError> {
        let url = format!("{}/{}", self.agents_url(cluster_id), urlencoding::encode(client_id));
        debug!("Deregistering storage agent {} from {}", client_id, cluster_id);
        let response = self.client.delete(&url).send().await?;
        Self::check(response, &format!("storage agent {client_id}")).await?;
        Ok(())
    }
}
