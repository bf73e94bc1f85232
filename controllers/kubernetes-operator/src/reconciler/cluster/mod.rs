//! Cluster reconciliation.
//!
//! A cluster is its control-plane nodegroup. One pass mirrors the owned
//! nodegroups into the cluster status, then moves the cluster forward one
//! step at a time:
//! 1. Bootstrap the cluster secret and the control-plane nodegroup
//! 2. Grow the control plane to [`CONTROLPLANE_DESIRED_COUNT`] nodes
//! 3. Roll the control plane onto a new machine image ([`upgrade`])
//! 4. Provision storage namespaces ([`storage`])
//! 5. Create, update and delete worker nodegroups ([`nodegroups`])

pub mod encryption;
pub mod nodegroups;
pub mod storage;
pub mod upgrade;

use super::Reconciler;
use super::nodegroup::NODEGROUP_FINALIZER;
use crate::cluster_secret::ClusterSecret;
use crate::error::ControllerError;
use crate::reconcile_helpers::{add_finalizer, has_finalizer, is_being_deleted, object_name, remove_finalizer};
use crate::status::write_cluster_status;
use chrono::Utc;
use crds::{
    CLUSTER_LABEL, Cluster, ClusterState, ClusterStatus, Nodegroup, NodegroupSpec, NodegroupState, NodegroupType,
};
use encryption::EncryptionConfiguration;
use kube::Resource;
use kube::runtime::controller::Action;
use kubernetes_provider::ClusterEndpoints;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CLUSTER_FINALIZER: &str = "private.cloud.intel.com/clusterfinalizer";

/// Control-plane size outside of an upgrade.
pub const CONTROLPLANE_DESIRED_COUNT: i32 = 3;

/// Requeue after the finalizer was added.
pub const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue while the load balancers have no address yet.
pub const NETWORK_REQUEUE: Duration = Duration::from_secs(60);

/// Name of the control-plane nodegroup of a cluster: `cl-abc` becomes `cp-abc`.
pub fn controlplane_nodegroup_name(cluster_name: &str) -> String {
    cluster_name.replacen("cl-", "cp-", 1)
}

/// Endpoints handed to the kubernetes provider when generating the cluster PKI.
fn cluster_endpoints(cluster: &Cluster) -> ClusterEndpoints {
    let lbs = &cluster.spec.load_balancers;
    ClusterEndpoints {
        etcd_lb: lbs.etcd.clone(),
        etcd_lb_port: lbs.etcd_port,
        apiserver_lb: lbs.apiserver.clone(),
        apiserver_lb_port: lbs.apiserver_port,
        public_apiserver_lb: lbs.public_apiserver.clone(),
        public_apiserver_lb_port: lbs.public_apiserver_port,
        konnectivity_lb: lbs.konnectivity.clone(),
    }
}

/// Nodegroup owned by `cluster`, labelled with its name and carrying the
/// nodegroup finalizer. Load balancer endpoints come from the cluster.
pub(crate) fn owned_nodegroup(cluster: &Cluster, name: &str, spec: NodegroupSpec) -> Nodegroup {
    let cluster_name = cluster.metadata.name.clone().unwrap_or_default();
    let lbs = &cluster.spec.load_balancers;
    let mut nodegroup = Nodegroup::new(
        name,
        NodegroupSpec {
            cluster_name: cluster_name.clone(),
            kubernetes_provider: cluster.spec.kubernetes_provider.clone(),
            node_provider: cluster.spec.node_provider.clone(),
            region: cluster.spec.network.region.clone(),
            etcd_lb: lbs.etcd.clone(),
            etcd_lb_port: lbs.etcd_port.to_string(),
            api_server_lb: lbs.apiserver.clone(),
            api_server_lb_port: lbs.apiserver_port.to_string(),
            ..spec
        },
    );
    nodegroup.metadata.namespace = cluster.metadata.namespace.clone();
    nodegroup.metadata.labels = Some(BTreeMap::from([(CLUSTER_LABEL.to_string(), cluster_name)]));
    nodegroup.metadata.owner_references = cluster.controller_owner_ref(&()).map(|r| vec![r]);
    add_finalizer(&mut nodegroup.metadata, NODEGROUP_FINALIZER);
    nodegroup
}

fn controlplane_nodegroup(cluster: &Cluster, count: i32) -> Nodegroup {
    let name = controlplane_nodegroup_name(cluster.metadata.name.as_deref().unwrap_or_default());
    let spec = &cluster.spec;
    owned_nodegroup(
        cluster,
        &name,
        NodegroupSpec {
            nodegroup_type: NodegroupType::Controlplane,
            count,
            instance_type: spec.instance_type.clone(),
            instance_imi: spec.instance_imi.clone(),
            kubernetes_version: spec.kubernetes_version.clone(),
            cluster_type: spec.cluster_type.clone(),
            ssh_key: spec.ssh_key.clone(),
            cloud_account_id: spec.cloud_account_id.clone(),
            vnets: spec.vnets.clone(),
            ..Default::default()
        },
    )
}

/// Cluster state mirrors the control plane, but reads `Updating` whenever
/// the control plane is not at its steady size.
fn cluster_state(controlplane: &Nodegroup) -> ClusterState {
    let Some(status) = &controlplane.status else {
        return ClusterState::Updating;
    };
    if controlplane.spec.count != CONTROLPLANE_DESIRED_COUNT || status.count != CONTROLPLANE_DESIRED_COUNT {
        return ClusterState::Updating;
    }
    status.state
}

impl Reconciler {
    /// Reconciles a Cluster resource.
    pub async fn reconcile_cluster(&self, cluster: &Cluster) -> Result<Action, ControllerError> {
        let name = object_name(cluster, "Cluster")?;
        let namespace = cluster.metadata.namespace.as_deref().unwrap_or("default");
        info!("Reconciling Cluster {}/{}", namespace, name);

        let deleting = is_being_deleted(&cluster.metadata);
        if !deleting && !has_finalizer(&cluster.metadata, CLUSTER_FINALIZER) {
            let mut updated = cluster.clone();
            add_finalizer(&mut updated.metadata, CLUSTER_FINALIZER);
            self.store.update_cluster(&updated).await?;
            debug!("Added finalizer to Cluster {}/{}", namespace, name);
            return Ok(Action::requeue(FINALIZER_REQUEUE));
        }

        if deleting {
            return self.finalize_cluster(cluster).await;
        }

        let nodegroups = self.store.list_nodegroups(name).await?;
        let mut status = self.observe_cluster(cluster, &nodegroups).await?;
        let controlplane = nodegroups.iter().find(|ng| ng.is_controlplane());

        match controlplane {
            Some(cp) => status.state = cluster_state(cp),
            None => {
                status.state = ClusterState::Updating;
                status.message = "Creating controlplane".to_string();
            }
        }
        write_cluster_status(self.store.as_ref(), name, &status, self.status_retry_delay).await?;

        if !cluster.spec.load_balancers.is_ready() {
            info!("Load balancers of cluster {} are not ready", name);
            self.set_cluster_message(name, &mut status, "Provisioning network").await;
            return Ok(Action::requeue(NETWORK_REQUEUE));
        }

        let Some(controlplane) = controlplane else {
            info!("Creating controlplane of cluster {}", name);
            self.set_cluster_message(name, &mut status, "Provisioning compute").await;
            self.init_cluster(cluster).await?;
            self.create_controlplane_nodegroup(cluster).await?;
            return Ok(Action::requeue(self.config.monitor_periodicity()));
        };

        if let Some(action) = self.converge_controlplane(cluster, controlplane, &mut status).await? {
            return Ok(action);
        }

        // Later steps read storage state through the cluster itself.
        let mut observed = cluster.clone();
        observed.status = Some(status.clone());

        if let Some(action) = self.reconcile_storage(&observed).await? {
            return Ok(action);
        }

        self.set_cluster_message(name, &mut status, "Reconciling worker nodegroups").await;
        self.reconcile_worker_nodegroups(&observed, &nodegroups).await?;

        self.set_cluster_message(name, &mut status, "Cluster ready").await;
        Ok(Action::requeue(self.config.monitor_periodicity()))
    }

    /// Grows the control plane and drives its upgrade.
    ///
    /// Returns an action while the control plane is not settled at
    /// [`CONTROLPLANE_DESIRED_COUNT`] nodes on the cluster's machine image.
    async fn converge_controlplane(
        &self,
        cluster: &Cluster,
        controlplane: &Nodegroup,
        status: &mut ClusterStatus,
    ) -> Result<Option<Action>, ControllerError> {
        let name = object_name(cluster, "Cluster")?;
        let wait = Some(Action::requeue(self.config.monitor_periodicity()));
        let cp_status = controlplane.status.clone().unwrap_or_default();

        if controlplane.spec.count != cp_status.count {
            debug!(
                "Waiting for controlplane nodes of cluster {}: {} of {}",
                name, cp_status.count, controlplane.spec.count
            );
            return Ok(wait);
        }
        if cp_status.state != NodegroupState::Active {
            debug!("Waiting for controlplane of cluster {} to be active", name);
            return Ok(wait);
        }

        if controlplane.spec.count < CONTROLPLANE_DESIRED_COUNT {
            info!(
                "Adding controlplane node to cluster {}: {} -> {}",
                name,
                controlplane.spec.count,
                controlplane.spec.count + 1
            );
            self.set_cluster_message(name, status, "Provisioning compute").await;
            let mut updated = controlplane.clone();
            updated.spec.count += 1;
            self.store.update_nodegroup(&updated).await?;
            return Ok(wait);
        }

        if controlplane.spec.instance_imi != cluster.spec.instance_imi {
            self.set_cluster_message(name, status, "Upgrading cluster").await;
            self.start_controlplane_upgrade(cluster, controlplane).await?;
            return Ok(wait);
        }

        if controlplane.spec.count == CONTROLPLANE_DESIRED_COUNT + 1 {
            if upgrade::upgrade_complete(controlplane) {
                self.finish_controlplane_upgrade(controlplane).await?;
            }
            return Ok(wait);
        }

        if cp_status.count != CONTROLPLANE_DESIRED_COUNT
            || cp_status.nodes.iter().any(|n| n.instance_imi != controlplane.spec.instance_imi)
        {
            return Ok(wait);
        }
        Ok(None)
    }

    /// Mirrors owned nodegroups and storage namespaces into the status.
    pub(crate) async fn observe_cluster(
        &self,
        cluster: &Cluster,
        nodegroups: &[Nodegroup],
    ) -> Result<ClusterStatus, ControllerError> {
        let name = object_name(cluster, "Cluster")?;
        let mut status = cluster.status.clone().unwrap_or_default();
        status.nodegroups = nodegroups
            .iter()
            .map(|ng| ng.status.clone().unwrap_or_default())
            .collect();

        let mut storage = Vec::with_capacity(cluster.spec.storage.len());
        for spec in &cluster.spec.storage {
            let provider = self.registry.storage_provider(&spec.provider)?;
            let previous = cluster.storage_status(&spec.provider).cloned().unwrap_or_default();
            storage.push(
                provider
                    .get_storage(name, &cluster.spec.customer_cloud_account_id, spec, &previous)
                    .await?,
            );
        }
        status.storage = storage;
        Ok(status)
    }

    /// Writes a progress message. Failures are logged, the pass goes on.
    async fn set_cluster_message(&self, name: &str, status: &mut ClusterStatus, message: &str) {
        status.message = message.to_string();
        if let Err(e) = write_cluster_status(self.store.as_ref(), name, status, self.status_retry_delay).await {
            warn!("Failed to update status message of cluster {}: {}", name, e);
        }
    }

    /// Creates the cluster secret: PKI and registration commands from the
    /// kubernetes provider, plus an encryption config keyed by the cluster's
    /// machine image. An existing secret is kept.
    async fn init_cluster(&self, cluster: &Cluster) -> Result<(), ControllerError> {
        let name = object_name(cluster, "Cluster")?;
        if self.store.get_secret(name).await?.is_some() {
            debug!("Cluster secret {} already exists", name);
            return Ok(());
        }

        let kubernetes = self
            .registry
            .kubernetes_provider(&cluster.spec.kubernetes_provider, None)
            .await?;
        let data = kubernetes.init_cluster(cluster, &cluster_endpoints(cluster)).await?;

        let mut secret = ClusterSecret::new(data);
        let config = EncryptionConfiguration::initial(Utc::now()).to_yaml()?;
        secret.set_encryption_configs(&BTreeMap::from([(cluster.spec.instance_imi.clone(), config)]))?;
        self.store.create_secret(name, cluster, &secret).await?;
        info!("Created cluster secret {}", name);
        Ok(())
    }

    async fn create_controlplane_nodegroup(&self, cluster: &Cluster) -> Result<(), ControllerError> {
        let nodegroup = controlplane_nodegroup(cluster, 1);
        match self.store.create_nodegroup(&nodegroup).await {
            Ok(_) => {
                info!(
                    "Created controlplane nodegroup {}",
                    nodegroup.metadata.name.as_deref().unwrap_or_default()
                );
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                debug!("Controlplane nodegroup already exists: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Deletes storage, releases provider-side resources, then the finalizer.
    async fn finalize_cluster(&self, cluster: &Cluster) -> Result<Action, ControllerError> {
        if !has_finalizer(&cluster.metadata, CLUSTER_FINALIZER) {
            return Ok(Action::await_change());
        }
        let name = object_name(cluster, "Cluster")?;
        info!("Deleting cluster {}", name);

        self.delete_cluster_storage(cluster).await?;

        let kubernetes = self
            .registry
            .kubernetes_provider(&cluster.spec.kubernetes_provider, None)
            .await?;
        kubernetes.clean_up_cluster(name).await?;

        let mut updated = cluster.clone();
        remove_finalizer(&mut updated.metadata, CLUSTER_FINALIZER);
        self.store.update_cluster(&updated).await?;
        info!("Cluster {} deleted", name);
        Ok(Action::await_change())
    }
}
