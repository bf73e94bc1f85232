//! Main controller implementation.
//!
//! Builds the Kubernetes client, object store and provider registry, then
//! runs the Cluster and Nodegroup watchers, the etcd snapshot task and the
//! health/metrics server side by side. The process stops when any of the
//! watchers or the server stops.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::registry::{DefaultProviderRegistry, ProviderRegistry};
use crate::snapshot::SnapshotTask;
use crate::store::{KubeStore, ObjectStore};
use crate::watcher::Watcher;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Operator process: watchers plus background tasks.
#[derive(Debug)]
pub struct Controller {
    cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    nodegroup_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
    snapshot_task: JoinHandle<()>,
}

impl Controller {
    /// Connects to the cluster and starts every task.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing Kubernetes Operator");

        let client = Client::try_default().await?;
        let namespace = config.watch_namespace.as_deref().unwrap_or("default");
        let kube_store = KubeStore::new(client, namespace);
        let cluster_api = kube_store.cluster_api();
        let nodegroup_api = kube_store.nodegroup_api();

        let store: Arc<dyn ObjectStore> = Arc::new(kube_store);
        let registry: Arc<dyn ProviderRegistry> = Arc::new(DefaultProviderRegistry::new(config.clone()));
        let metrics = Arc::new(Metrics::new()?);

        let snapshot_task = {
            let task = SnapshotTask::new(
                store.clone(),
                registry.clone(),
                config.etcd_snapshot_dir.clone(),
                config.etcd_snapshot_periodicity(),
            );
            tokio::spawn(task.run())
        };

        let metrics_server = {
            let metrics = metrics.clone();
            let bind_address = config.metrics_bind_address.clone();
            tokio::spawn(async move { metrics::serve(&bind_address, metrics).await })
        };

        let reconciler = Arc::new(Reconciler::new(store, registry, config, metrics.clone()));
        let watcher = Arc::new(Watcher::new(reconciler, cluster_api, nodegroup_api));

        let cluster_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_clusters().await })
        };
        let nodegroup_watcher = {
            let watcher = watcher;
            tokio::spawn(async move { watcher.watch_nodegroups().await })
        };

        metrics.set_ready(true);

        Ok(Self {
            cluster_watcher,
            nodegroup_watcher,
            metrics_server,
            snapshot_task,
        })
    }

    /// Runs until a watcher or the metrics server exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Kubernetes Operator running");

        let result = tokio::select! {
            result = &mut self.cluster_watcher => flatten("Cluster watcher", result),
            result = &mut self.nodegroup_watcher => flatten("Nodegroup watcher", result),
            result = &mut self.metrics_server => flatten("Metrics server", result),
        };

        self.snapshot_task.abort();
        self.cluster_watcher.abort();
        self.nodegroup_watcher.abort();
        self.metrics_server.abort();
        result
    }
}

fn flatten(
    task: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{} panicked: {}", task, e)))?
        .map_err(|e| ControllerError::Watch(format!("{} error: {}", task, e)))?;
    info!("{} stopped", task);
    Ok(())
}
