//! Storage Provider
//!
//! Provisions the file storage namespace a cluster mounts and registers
//! worker nodes as storage agents.
//!
//! Two backends are supported, selected by the cluster's storage entry:
//! - `weka`: filesystem orgs, named after the cluster
//! - `vast`: filesystems, named after the cluster without its `cl-` prefix

pub mod agent;
pub mod client;
pub mod error;
pub mod factory;
pub mod models;
#[path = "trait.rs"]
pub mod provider_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use agent::AgentClient;
pub use client::{FilesystemClient, StorageBackend};
pub use error::StorageProviderError;
pub use factory::{new_storage_agent, new_storage_provider, StorageProviderConfig};
pub use models::*;
pub use provider_trait::{StorageAgentTrait, StorageProviderTrait};
#[cfg(feature = "test-util")]
pub use mock::{MockStorageAgent, MockStorageProvider};
