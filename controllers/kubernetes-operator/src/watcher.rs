//! Resource watchers.
//!
//! Each resource kind runs its own `kube_runtime::Controller`, which keeps
//! the watch alive across reconnects and requeues objects according to the
//! returned [`Action`]. Failed passes are requeued with the per-object
//! Fibonacci backoff held by the [`Reconciler`].

use crate::error::ControllerError;
use crate::reconcile_helpers::resource_key;
use crate::reconciler::Reconciler;
use crds::{Cluster, Nodegroup};
use futures::StreamExt;
use kube::{Api, Resource};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, watcher};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Quiet period after the last event before an object is reconciled
pub const DEBOUNCE: Duration = Duration::from_secs(5);

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Drives `controller` until its watch stream ends.
///
/// Every pass is counted per `kind`. A successful pass resets the object's
/// backoff; a failed one bumps its error count and requeues it after the
/// next backoff step.
async fn watch_resource<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    kind: &'static str,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", kind);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(obj.as_ref());
        let (delay, failures) = ctx.get_backoff_for_resource(&key);
        error!(
            "Reconciliation error for {} {} (failure {}), retrying in {:?}: {}",
            kind, key, failures, delay, error
        );
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(obj.as_ref());
            debug!("Reconciling {} {}", kind, key);
            ctx.metrics.reconciled(kind);
            match reconcile_fn(ctx.clone(), obj).await {
                Ok(action) => {
                    ctx.reset_error(&key);
                    Ok(action)
                }
                Err(e) => {
                    ctx.metrics.reconcile_failed(kind);
                    ctx.increment_error(&key);
                    Err(e)
                }
            }
        }
    };

    let config = ControllerConfig::default()
        .debounce(DEBOUNCE)
        .concurrency(reconciler.config.max_concurrent_reconciles);

    controller
        .with_config(config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", kind, obj.name),
                Err(e) => error!("Controller error for {}: {}", kind, e),
            }
        })
        .await;

    Ok(())
}

/// Watches Cluster and Nodegroup resources.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    cluster_api: Api<Cluster>,
    nodegroup_api: Api<Nodegroup>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, cluster_api: Api<Cluster>, nodegroup_api: Api<Nodegroup>) -> Self {
        Self {
            reconciler,
            cluster_api,
            nodegroup_api,
        }
    }

    /// Watches clusters, and the nodegroups they own so that nodegroup
    /// status changes reach the cluster promptly.
    pub async fn watch_clusters(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.cluster_api.clone(), watcher::Config::default())
            .owns(self.nodegroup_api.clone(), watcher::Config::default());
        watch_resource(
            controller,
            self.reconciler.clone(),
            |reconciler, cluster: Arc<Cluster>| Box::pin(async move { reconciler.reconcile_cluster(&cluster).await }),
            "cluster",
        )
        .await
    }

    pub async fn watch_nodegroups(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.nodegroup_api.clone(), watcher::Config::default());
        watch_resource(
            controller,
            self.reconciler.clone(),
            |reconciler, nodegroup: Arc<Nodegroup>| {
                Box::pin(async move { reconciler.reconcile_nodegroup(&nodegroup).await })
            },
            "nodegroup",
        )
        .await
    }
}
