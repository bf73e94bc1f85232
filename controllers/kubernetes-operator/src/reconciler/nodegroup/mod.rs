//! Nodegroup reconciliation.
//!
//! One pass observes every known node, repairs and scales the group, and
//! persists the resulting status:
//! 1. Collect provider, downstream and etcd state per node ([`collector`])
//! 2. Sweep stale etcd members ([`etcd`])
//! 3. Create missing nodes or instance groups ([`provisioner`], [`scaling`])
//! 4. Flip at most one node to `Deleting` and tear down the first one ([`deletion`])
//! 5. Approve kubelet CSRs and register storage agents for workers

pub mod collector;
pub mod deletion;
pub mod etcd;
pub mod labels;
pub mod provisioner;
pub mod scaling;

use super::Reconciler;
use crate::cluster_secret::ClusterSecret;
use crate::error::{ControllerError, MultiError};
use crate::reconcile_helpers::{
    add_finalizer, bool_label, has_finalizer, is_being_deleted, object_name, remove_finalizer,
};
use crate::status::write_nodegroup_status;
use chrono::Utc;
use collector::{apply_storage_agents, collect_controlplane_node, collect_worker_node, merge_observed};
use crds::{
    Cluster, NodeState, NodeStatus, Nodegroup, NodegroupState, NodegroupStatus, STORAGE_REGISTER_LABEL,
};
use etcd_gateway::{EtcdClientTrait, EtcdMember};
use kube::runtime::controller::Action;
use kubernetes_provider::KubernetesProviderTrait;
use node_provider::NodeProviderTrait;
use scaling::{current_count, instance_group_shortfalls, missing_count, parse_instance_group_type};
use std::sync::Arc;
use std::time::Duration;
use storage_provider::StorageAgentTrait;
use tracing::{debug, info, warn};

pub const NODEGROUP_FINALIZER: &str = "private.cloud.intel.com/nodegroupfinalizer";

/// Requeue after the finalizer was added.
pub const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue after a node was deleted, so the next removal starts promptly.
pub const NODE_DELETED_REQUEUE: Duration = Duration::from_secs(1);

const VAST_MODE: &str = "vast";
const VAST_ACTIVE: &str = "Active";

/// Providers and cluster material resolved for one nodegroup pass.
pub struct NodegroupProviders {
    pub node: Arc<dyn NodeProviderTrait>,
    /// Disconnected when the cluster secret holds no CA yet
    pub kubernetes: Arc<dyn KubernetesProviderTrait>,
    /// Only for control-plane groups whose etcd CA is known
    pub etcd: Option<Box<dyn EtcdClientTrait>>,
    pub storage_agent: Arc<dyn StorageAgentTrait>,
    pub secret: Option<ClusterSecret>,
    pub cluster: Option<Cluster>,
}

fn node_count(nodes: &[NodeStatus]) -> i32 {
    i32::try_from(nodes.len()).unwrap_or(i32::MAX)
}

impl Reconciler {
    /// Reconciles a Nodegroup resource.
    pub async fn reconcile_nodegroup(&self, nodegroup: &Nodegroup) -> Result<Action, ControllerError> {
        let name = object_name(nodegroup, "Nodegroup")?;
        let namespace = nodegroup.metadata.namespace.as_deref().unwrap_or("default");
        info!("Reconciling Nodegroup {}/{}", namespace, name);

        let deleting = is_being_deleted(&nodegroup.metadata);
        if !deleting && !has_finalizer(&nodegroup.metadata, NODEGROUP_FINALIZER) {
            let mut updated = nodegroup.clone();
            add_finalizer(&mut updated.metadata, NODEGROUP_FINALIZER);
            self.store.update_nodegroup(&updated).await?;
            debug!("Added finalizer to Nodegroup {}/{}", namespace, name);
            return Ok(Action::requeue(FINALIZER_REQUEUE));
        }

        let providers = self.nodegroup_providers(nodegroup).await?;

        if deleting {
            return self.finalize_nodegroup(nodegroup, &providers).await;
        }

        let mut status = self.observe_nodegroup(nodegroup, &providers).await?;
        let result = self.reconcile_node_states(nodegroup, &providers, &mut status).await;
        status.count = node_count(&status.nodes);

        write_nodegroup_status(self.store.as_ref(), name, &status, self.status_retry_delay).await?;

        if result? {
            Ok(Action::requeue(NODE_DELETED_REQUEUE))
        } else {
            Ok(Action::requeue(self.config.monitor_periodicity()))
        }
    }

    /// Resolves the providers a nodegroup pass talks to.
    ///
    /// The downstream cluster is only reachable once the cluster secret holds
    /// a CA. An unreachable etcd is logged and leaves `etcd` empty.
    pub(crate) async fn nodegroup_providers(&self, nodegroup: &Nodegroup) -> Result<NodegroupProviders, ControllerError> {
        let spec = &nodegroup.spec;
        let node = self.registry.node_provider(&spec.node_provider)?;
        let storage_agent = self.registry.storage_agent()?;
        let secret = self.store.get_secret(&spec.cluster_name).await?;
        let cluster = self.store.get_cluster(&spec.cluster_name).await?;

        let server = format!("https://{}:{}", spec.api_server_lb, spec.api_server_lb_port);
        let downstream = secret
            .as_ref()
            .filter(|s| s.has_cluster_ca())
            .map(|s| (server.as_str(), s));
        let kubernetes = self
            .registry
            .kubernetes_provider(&spec.kubernetes_provider, downstream)
            .await?;

        let etcd = match &secret {
            Some(secret) if nodegroup.is_controlplane() => {
                let endpoint = format!("https://{}:{}", spec.etcd_lb, spec.etcd_lb_port);
                match self.registry.etcd_client(&endpoint, secret).await {
                    Ok(client) => Some(client),
                    Err(e) => {
                        warn!("Failed to connect to etcd at {}: {}", endpoint, e);
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(NodegroupProviders {
            node,
            kubernetes,
            etcd,
            storage_agent,
            secret,
            cluster,
        })
    }

    /// Deletes every node of a nodegroup, then releases the finalizer.
    async fn finalize_nodegroup(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
    ) -> Result<Action, ControllerError> {
        if !has_finalizer(&nodegroup.metadata, NODEGROUP_FINALIZER) {
            return Ok(Action::await_change());
        }

        let nodes = nodegroup.status.as_ref().map(|s| s.nodes.as_slice()).unwrap_or_default();
        info!(
            "Deleting {} nodes of nodegroup {}",
            nodes.len(),
            nodegroup.metadata.name.as_deref().unwrap_or_default()
        );
        let mut errors = MultiError::new();
        for node in nodes {
            if let Err(e) = self.delete_node(nodegroup, providers, node).await {
                warn!("Failed to delete node {}: {}", node.name, e);
                errors.add(e);
            }
        }
        errors.into_result()?;

        let mut updated = nodegroup.clone();
        remove_finalizer(&mut updated.metadata, NODEGROUP_FINALIZER);
        self.store.update_nodegroup(&updated).await?;
        Ok(Action::await_change())
    }

    async fn etcd_members(&self, providers: &NodegroupProviders) -> Vec<EtcdMember> {
        let Some(etcd) = &providers.etcd else {
            return Vec::new();
        };
        match etcd.list_members().await {
            Ok(members) => members,
            Err(e) => {
                warn!("Failed to list etcd members: {}", e);
                Vec::new()
            }
        }
    }

    /// Builds the observed status from the previously known nodes.
    pub(crate) async fn observe_nodegroup(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
    ) -> Result<NodegroupStatus, ControllerError> {
        let prior = nodegroup.status.clone().unwrap_or_default();
        let cloud_account_id = &nodegroup.spec.cloud_account_id;

        let mut observed = Vec::with_capacity(prior.nodes.len());
        if nodegroup.is_controlplane() {
            let members = self.etcd_members(providers).await;
            for node in &prior.nodes {
                observed.push(
                    collect_controlplane_node(providers.node.as_ref(), &members, node, cloud_account_id).await?,
                );
            }
        } else {
            for node in &prior.nodes {
                observed.push(
                    collect_worker_node(
                        providers.node.as_ref(),
                        providers.kubernetes.as_ref(),
                        node,
                        cloud_account_id,
                    )
                    .await?,
                );
            }
        }
        let mut nodes = merge_observed(&prior.nodes, observed, Utc::now());

        let weka = &nodegroup.spec.weka_storage;
        if !nodegroup.is_controlplane() && weka.enable {
            let agents = providers.storage_agent.list_registered_agents(&weka.cluster_id).await?;
            apply_storage_agents(&mut nodes, &agents);
        }
        if !weka.enable && weka.mode == VAST_MODE {
            for node in &mut nodes {
                node.weka_storage.status = VAST_ACTIVE.to_string();
                node.weka_storage.custom_status = VAST_ACTIVE.to_string();
            }
        }

        let mut status = NodegroupStatus {
            name: nodegroup.metadata.name.clone().unwrap_or_default(),
            nodegroup_type: nodegroup.spec.nodegroup_type,
            count: node_count(&nodes),
            state: NodegroupState::Active,
            message: "Nodegroup ready".to_string(),
            nodes,
            ..Default::default()
        };
        let desired = usize::try_from(nodegroup.spec.count).unwrap_or(0);
        if status.nodes.iter().any(|n| n.state != NodeState::Active)
            || current_count(nodegroup, &status.nodes) != desired
        {
            status.state = NodegroupState::Updating;
            status.message.clear();
        }
        Ok(status)
    }

    /// Drives the observed nodes toward the nodegroup spec.
    ///
    /// Independent steps keep running after a failure; their errors are
    /// returned together. Returns whether a node was deleted.
    pub(crate) async fn reconcile_node_states(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
        status: &mut NodegroupStatus,
    ) -> Result<bool, ControllerError> {
        let mut errors = MultiError::new();

        if nodegroup.is_controlplane() {
            let active = status.nodes.iter().filter(|n| n.state == NodeState::Active).count();
            match &providers.etcd {
                Some(etcd) if active >= 1 => {
                    if let Err(e) = etcd::remove_missing_etcd_member(etcd.as_ref(), &status.nodes).await {
                        warn!("Failed to sweep etcd members: {}", e);
                        errors.add(e);
                    }
                }
                _ => {}
            }
        }

        let missing = missing_count(nodegroup, &status.nodes);
        if missing > 0 {
            status.message = "Provisioning nodegroup compute".to_string();
            // Control-plane nodes join etcd one at a time.
            let count = if nodegroup.is_controlplane() { 1 } else { missing };
            info!("Creating {} of {} missing units", count, missing);
            if let Err(e) = self.create_nodes(nodegroup, providers, status, count).await {
                errors.add(e);
            }
        }

        if nodegroup.is_instance_group() {
            match parse_instance_group_type(&nodegroup.spec.instance_type) {
                Ok((_, group_size)) => {
                    if !instance_group_shortfalls(&status.nodes, group_size).is_empty() {
                        if let Err(e) = self.scale_up_instance_groups(nodegroup, providers, status).await {
                            errors.add(e);
                        }
                    }
                }
                Err(e) => errors.add(e),
            }
        }

        let mut node_deleted = false;
        if self.detect_node_for_deletion(nodegroup, providers, status).await {
            match self.delete_node_in_deletion_state(nodegroup, providers, status).await {
                Ok(deleted) => node_deleted = deleted,
                Err(e) => {
                    status.message = "Failed deleting nodegroup compute".to_string();
                    errors.add(e);
                }
            }
        }

        if !nodegroup.is_controlplane() {
            if providers.kubernetes.is_connected() {
                let prefix = nodegroup.metadata.name.as_deref().unwrap_or_default();
                match providers.kubernetes.approve_kubelet_serving_csrs(prefix).await {
                    Ok(approved) if !approved.is_empty() => info!("Approved kubelet serving CSRs {:?}", approved),
                    Ok(_) => {}
                    Err(e) => errors.add(e),
                }
            }

            if nodegroup.spec.weka_storage.enable
                && bool_label(&nodegroup.metadata, STORAGE_REGISTER_LABEL, true)
            {
                if let Err(e) = self.register_storage_agents(nodegroup, providers, status).await {
                    errors.add(e);
                }
            }
        }

        errors.into_result()?;
        Ok(node_deleted)
    }

    /// Registers a storage agent for every active node that has none.
    async fn register_storage_agents(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
        status: &mut NodegroupStatus,
    ) -> Result<(), ControllerError> {
        let cluster_id = &nodegroup.spec.weka_storage.cluster_id;
        for node in status
            .nodes
            .iter_mut()
            .filter(|n| n.state == NodeState::Active && n.weka_storage.client_id.is_empty())
        {
            let ip = if node.storage_backend_ip.is_empty() {
                &node.ip_address
            } else {
                &node.storage_backend_ip
            };
            let client_id = providers.storage_agent.register_agent(cluster_id, &node.name, ip).await?;
            info!("Registered storage agent {} for node {}", client_id, node.name);
            node.weka_storage.client_id = client_id;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
