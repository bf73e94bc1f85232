//! Kubernetes Operator
//!
//! Reconciles two CRDs for managed Kubernetes clusters:
//! - Cluster: control plane bootstrap and image upgrades, storage
//!   namespaces, worker nodegroups derived from the cluster templates
//! - Nodegroup: keeps a group of compute nodes converged on its spec,
//!   replacing unhealthy nodes without losing etcd quorum
//!
//! A background task takes periodic etcd snapshots of active clusters.

mod backoff;
mod cluster_secret;
mod config;
mod controller;
mod error;
mod metrics;
mod reconcile_helpers;
mod reconciler;
mod registry;
mod snapshot;
mod status;
mod store;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting Kubernetes Operator");

    let config = OperatorConfig::load()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("default"));
    info!("  Node provider: {}", config.node_provider_url);
    info!("  Storage provider: {}", config.storage_provider_url);
    info!("  Monitor periodicity: {:?}", config.monitor_periodicity());
    info!("  Quorum policy: {:?}", config.quorum_policy);
    info!("  Metrics: {}", config.metrics_bind_address);

    let controller = Controller::new(config).await?;
    controller.run().await
}
