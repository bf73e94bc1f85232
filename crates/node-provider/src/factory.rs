//! Node provider factory
//!
//! Nodegroups select their provider by name (`spec.nodeProvider`). All
//! dispatch on that name happens here.

use crate::client::ComputeClient;
use crate::error::NodeProviderError;
use crate::provider_trait::NodeProviderTrait;
use std::sync::Arc;

/// Name of the compute-service backed provider
pub const COMPUTE_PROVIDER: &str = "compute";

/// Connection settings shared by node providers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeProviderConfig {
    /// Compute API base URL
    pub compute_url: String,
}

impl Default for NodeProviderConfig {
    fn default() -> Self {
        Self {
            compute_url: "http://compute-api:8080".to_string(),
        }
    }
}

/// Builds the provider registered under `name`.
///
/// Matching is case-insensitive.
pub fn new_node_provider(
    name: &str,
    config: &NodeProviderConfig,
) -> Result<Arc<dyn NodeProviderTrait>, NodeProviderError> {
    match name.to_ascii_lowercase().as_str() {
        COMPUTE_PROVIDER => Ok(Arc::new(ComputeClient::new(config.compute_url.clone())?)),
        other => Err(NodeProviderError::Unsupported(other.to_string())),
    }
}
