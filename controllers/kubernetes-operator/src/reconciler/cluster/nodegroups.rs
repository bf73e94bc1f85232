//! Worker nodegroups derived from the cluster's templates.

use super::super::Reconciler;
use super::owned_nodegroup;
use crate::error::{ControllerError, MultiError};
use crds::{
    Cluster, Nodegroup, NodegroupSpec, NodegroupTemplateSpec, NodegroupType, StorageState, VAST_STORAGE_PROVIDER,
    WEKA_STORAGE_PROVIDER, WekaStorage,
};
use tracing::{info, warn};

/// Weka client mode recorded on nodegroups mounting Vast storage.
pub const VAST_STORAGE_MODE: &str = "vast";

/// Storage settings for a worker of `instance_type`, once a backend is active.
///
/// Weka is mounted on bare-metal workers only. An active Vast namespace
/// takes precedence and disables the weka client.
pub fn worker_storage(cluster: &Cluster, instance_type: &str) -> Option<WekaStorage> {
    let active = |provider: &str| {
        cluster
            .storage_spec(provider)
            .zip(cluster.storage_status(provider))
            .filter(|(_, status)| status.state == StorageState::Active)
    };

    let mut storage = None;
    if let Some((spec, status)) = active(WEKA_STORAGE_PROVIDER) {
        if !instance_type.contains("vm") {
            storage = Some(WekaStorage {
                enable: true,
                cluster_id: status.cluster_id.clone(),
                num_cores: spec.num_cores.clone(),
                mode: spec.mode.clone(),
                ..Default::default()
            });
        }
    }
    if let Some((_, status)) = active(VAST_STORAGE_PROVIDER) {
        storage = Some(WekaStorage {
            enable: false,
            cluster_id: status.cluster_id.clone(),
            mode: VAST_STORAGE_MODE.to_string(),
            ..Default::default()
        });
    }
    storage
}

fn worker_nodegroup(cluster: &Cluster, template: &NodegroupTemplateSpec) -> Nodegroup {
    owned_nodegroup(
        cluster,
        &template.name,
        NodegroupSpec {
            nodegroup_type: NodegroupType::Worker,
            count: template.count,
            instance_type: template.instance_type.clone(),
            instance_imi: template.instance_imi.clone(),
            kubernetes_version: template.kubernetes_version.clone(),
            cluster_type: template.cluster_type.clone(),
            ssh_key: template.ssh_key.clone(),
            cloud_account_id: template.cloud_account_id.clone(),
            vnets: template.vnets.clone(),
            user_data_url: template.user_data_url.clone(),
            labels: template.labels.clone(),
            taints: template.taints.clone(),
            weka_storage: worker_storage(cluster, &template.instance_type).unwrap_or_default(),
            ..Default::default()
        },
    )
}

/// Applies the mutable template fields to an existing nodegroup spec.
fn apply_template(cluster: &Cluster, template: &NodegroupTemplateSpec, spec: &mut NodegroupSpec) {
    spec.count = template.count;
    spec.instance_imi.clone_from(&template.instance_imi);
    spec.instance_type.clone_from(&template.instance_type);
    spec.cluster_type.clone_from(&template.cluster_type);
    spec.ssh_key.clone_from(&template.ssh_key);
    spec.labels.clone_from(&template.labels);
    spec.taints.clone_from(&template.taints);
    if let Some(storage) = worker_storage(cluster, &template.instance_type) {
        spec.weka_storage = storage;
    }
}

impl Reconciler {
    /// Creates missing worker nodegroups, updates drifted ones and deletes
    /// those without a template. Control-plane nodegroups are left alone.
    ///
    /// Every nodegroup is attempted; failures are returned together.
    pub(crate) async fn reconcile_worker_nodegroups(
        &self,
        cluster: &Cluster,
        current: &[Nodegroup],
    ) -> Result<(), ControllerError> {
        let mut errors = MultiError::new();
        let workers: Vec<&Nodegroup> = current.iter().filter(|ng| !ng.is_controlplane()).collect();
        let find = |name: &str| workers.iter().find(|ng| ng.metadata.name.as_deref() == Some(name));

        for template in &cluster.spec.nodegroups {
            match find(&template.name) {
                None => {
                    info!("Creating worker nodegroup {}", template.name);
                    if let Err(e) = self.store.create_nodegroup(&worker_nodegroup(cluster, template)).await {
                        warn!("Failed to create nodegroup {}: {}", template.name, e);
                        errors.add(e);
                    }
                }
                Some(existing) => {
                    let mut updated = (*existing).clone();
                    apply_template(cluster, template, &mut updated.spec);
                    if updated.spec == existing.spec {
                        continue;
                    }
                    info!("Updating worker nodegroup {}", template.name);
                    if let Err(e) = self.store.update_nodegroup(&updated).await {
                        warn!("Failed to update nodegroup {}: {}", template.name, e);
                        errors.add(e);
                    }
                }
            }
        }

        for nodegroup in &workers {
            let name = nodegroup.metadata.name.as_deref().unwrap_or_default();
            if cluster.spec.nodegroups.iter().any(|t| t.name == name) || nodegroup.metadata.deletion_timestamp.is_some() {
                continue;
            }
            info!("Deleting worker nodegroup {}", name);
            if let Err(e) = self.store.delete_nodegroup(name).await {
                warn!("Failed to delete nodegroup {}: {}", name, e);
                errors.add(e);
            }
        }

        errors.into_result()
    }
}
