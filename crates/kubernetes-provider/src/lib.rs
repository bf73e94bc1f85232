//! Kubernetes Provider
//!
//! Operations against a managed (downstream) Kubernetes cluster: initial
//! PKI and registration commands, node status, cordon and delete, bootstrap
//! tokens, kubelet-serving CSR approval, namespaces and secrets.
//!
//! A provider built without a client (the cluster secret is gone) can still
//! initialise clusters and read bootstrap scripts; downstream calls return
//! [`KubernetesProviderError::NotConnected`], except drain and delete which
//! become no-ops once the cluster is deleted.

pub mod downstream;
pub mod error;
pub mod factory;
pub mod iks;
pub mod init;
pub mod models;
#[path = "trait.rs"]
pub mod provider_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use downstream::connect_downstream;
pub use error::KubernetesProviderError;
pub use factory::{new_kubernetes_provider, KubernetesProviderConfig, IKS_PROVIDER};
pub use iks::IksProvider;
pub use init::init_cluster_secret;
pub use models::*;
pub use provider_trait::KubernetesProviderTrait;
#[cfg(feature = "test-util")]
pub use mock::MockKubernetesProvider;
