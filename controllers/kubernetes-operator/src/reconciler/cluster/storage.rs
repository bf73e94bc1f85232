//! Storage namespaces of a cluster.

use super::super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::object_name;
use chrono::Utc;
use crds::{Cluster, Storage, StorageState};
use kube::runtime::controller::Action;
use std::time::Duration;
use storage_provider::{StorageRequest, size_in_tb, weka_prefix};
use tracing::{debug, info};

/// Requeue while a storage namespace is changing.
pub const STORAGE_REQUEUE: Duration = Duration::from_secs(1);

fn storage_request(cluster: &Cluster, storage: &Storage) -> Result<StorageRequest, ControllerError> {
    let name = object_name(cluster, "Cluster")?;
    let vnet = cluster
        .spec
        .vnets
        .first()
        .ok_or_else(|| ControllerError::InvalidConfig(format!("cluster {} has no VNETs", name)))?;
    if cluster.spec.customer_cloud_account_id.is_empty() {
        return Err(ControllerError::InvalidConfig(format!(
            "cluster {} has no customer cloud account",
            name
        )));
    }
    Ok(StorageRequest {
        availability_zone: vnet.availability_zone.clone(),
        name: name.to_string(),
        cloud_account_id: cluster.spec.customer_cloud_account_id.clone(),
        size: storage.size.clone(),
        prefix: weka_prefix(name),
        cluster_type: cluster.spec.cluster_type.clone(),
    })
}

impl Reconciler {
    /// Moves each storage namespace one step toward its spec.
    ///
    /// Expects `cluster.status` to hold freshly observed storage. Returns an
    /// action while any namespace is being created, resized, recreated or is
    /// not yet active.
    pub(crate) async fn reconcile_storage(&self, cluster: &Cluster) -> Result<Option<Action>, ControllerError> {
        let name = object_name(cluster, "Cluster")?;
        let requeue = Some(Action::requeue(STORAGE_REQUEUE));

        for spec in &cluster.spec.storage {
            let provider = self.registry.storage_provider(&spec.provider)?;
            let Some(status) = cluster.storage_status(&spec.provider) else {
                debug!("Storage {} of cluster {} not found in status", spec.provider, name);
                return Ok(requeue);
            };

            let current_tb = size_in_tb(&status.size)?;
            let desired_tb = size_in_tb(&spec.size)?;

            if !status.namespace_created {
                info!("Creating {} storage of {} for cluster {}", spec.provider, spec.size, name);
                provider.create_storage(&storage_request(cluster, spec)?).await?;
                return Ok(requeue);
            }

            if status.state == StorageState::Active && (current_tb - desired_tb).abs() > f64::EPSILON {
                info!(
                    "Resizing {} storage of cluster {} from {} to {}",
                    spec.provider, name, status.size, spec.size
                );
                provider.update_storage(&storage_request(cluster, spec)?).await?;
                return Ok(requeue);
            }

            let stuck = status.state != StorageState::Active
                && status.active_at.is_none()
                && status
                    .created_at
                    .is_some_and(|t| Utc::now() - t > self.config.storage_recreate_grace_period());
            if stuck {
                info!(
                    "Recreating {} storage of cluster {}: never became active since {:?}",
                    spec.provider, name, status.created_at
                );
                provider
                    .delete_storage(name, &cluster.spec.customer_cloud_account_id, &weka_prefix(name))
                    .await?;
                return Ok(requeue);
            }

            if status.state != StorageState::Active {
                debug!("Waiting for {} storage of cluster {} to be active", spec.provider, name);
                return Ok(requeue);
            }
        }
        Ok(None)
    }

    /// Deletes every storage namespace of a cluster; absent ones are skipped.
    pub(crate) async fn delete_cluster_storage(&self, cluster: &Cluster) -> Result<(), ControllerError> {
        let name = object_name(cluster, "Cluster")?;
        for spec in &cluster.spec.storage {
            let provider = self.registry.storage_provider(&spec.provider)?;
            info!("Deleting {} storage of cluster {}", spec.provider, name);
            match provider
                .delete_storage(name, &cluster.spec.customer_cloud_account_id, &weka_prefix(name))
                .await
            {
                Err(e) if e.is_not_found() => debug!("{} storage of cluster {} already gone", spec.provider, name),
                other => other?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod storage_test;
