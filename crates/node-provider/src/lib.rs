//! Node Provider
//!
//! Contract between the nodegroup reconciler and the compute service that
//! owns instances and instance groups, plus an HTTP implementation of it.
//!
//! Node names follow `<nodegroup>-<5 chars>`; instance groups follow
//! `<nodegroup>-ig-<5 chars>` with members `<instance group>-<index>`.

pub mod client;
pub mod error;
pub mod factory;
pub mod models;
#[path = "trait.rs"]
pub mod provider_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::ComputeClient;
pub use error::NodeProviderError;
pub use factory::{new_node_provider, NodeProviderConfig, COMPUTE_PROVIDER};
pub use models::*;
pub use provider_trait::NodeProviderTrait;
#[cfg(feature = "test-util")]
pub use mock::MockNodeProvider;
