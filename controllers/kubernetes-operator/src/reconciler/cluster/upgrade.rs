//! Control-plane machine image upgrade.
//!
//! The control plane is upgraded by surging to four nodes: the encryption
//! keys are rotated under the new image, the nodegroup is pointed at the new
//! image with a count of four, and once all four nodes run it the count
//! drops back to three. The nodegroup engine then removes the one node left
//! on the old image.

use super::super::Reconciler;
use super::CONTROLPLANE_DESIRED_COUNT;
use super::encryption::{EncryptionKey, rotate_encryption_config};
use crate::error::ControllerError;
use crate::reconcile_helpers::object_name;
use chrono::Utc;
use crds::{Cluster, NodeState, Nodegroup};
use tracing::info;

/// Whether a surged control plane has four active nodes on its target image.
pub fn upgrade_complete(controlplane: &Nodegroup) -> bool {
    let Some(status) = &controlplane.status else {
        return false;
    };
    status.count == CONTROLPLANE_DESIRED_COUNT + 1
        && status
            .nodes
            .iter()
            .all(|n| n.instance_imi == controlplane.spec.instance_imi && n.state == NodeState::Active)
}

impl Reconciler {
    /// Rotates the encryption keys and surges the control plane onto the
    /// cluster's machine image.
    pub(crate) async fn start_controlplane_upgrade(
        &self,
        cluster: &Cluster,
        controlplane: &Nodegroup,
    ) -> Result<(), ControllerError> {
        let name = object_name(cluster, "Cluster")?;
        let current_imi = &controlplane.spec.instance_imi;
        let target_imi = &cluster.spec.instance_imi;
        info!("Upgrading controlplane of cluster {} from {} to {}", name, current_imi, target_imi);

        let mut secret = self
            .store
            .get_secret(name)
            .await?
            .ok_or_else(|| ControllerError::InvalidSecret(format!("cluster secret {} not found", name)))?;
        let current = secret.encryption_config_for(current_imi)?;
        let rotated = rotate_encryption_config(&current, EncryptionKey::generate(Utc::now()))?;
        secret.add_encryption_config(target_imi, rotated)?;
        self.store.update_secret(name, &secret).await?;

        let mut updated = controlplane.clone();
        updated.spec.instance_imi = target_imi.clone();
        updated.spec.count = CONTROLPLANE_DESIRED_COUNT + 1;
        self.store.update_nodegroup(&updated).await?;
        Ok(())
    }

    /// Shrinks a fully upgraded control plane back to its steady size.
    pub(crate) async fn finish_controlplane_upgrade(&self, controlplane: &Nodegroup) -> Result<(), ControllerError> {
        info!(
            "Controlplane {} upgraded, scaling back to {} nodes",
            controlplane.metadata.name.as_deref().unwrap_or_default(),
            CONTROLPLANE_DESIRED_COUNT
        );
        let mut updated = controlplane.clone();
        updated.spec.count = CONTROLPLANE_DESIRED_COUNT;
        self.store.update_nodegroup(&updated).await?;
        Ok(())
    }
}
