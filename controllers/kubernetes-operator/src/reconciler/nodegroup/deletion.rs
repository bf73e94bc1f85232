//! Node removal: picking the node to delete and tearing it down.

use super::super::Reconciler;
use super::NodegroupProviders;
use super::etcd::remove_etcd_member;
use super::scaling::{extra_count, InstanceGroupName};
use crate::error::ControllerError;
use chrono::Utc;
use crds::{NodeState, NodeStatus, Nodegroup, NodegroupStatus};
use tracing::{debug, info, warn};

fn mark_deleting(node: &mut NodeStatus, message: &str) {
    info!("Marking node {} for deletion: {}", node.name, message);
    node.state = NodeState::Deleting;
    node.message = message.to_string();
}

/// Index of the node to drop from an over-provisioned group.
fn pick_extra_node(nodes: &[NodeStatus]) -> Option<usize> {
    nodes
        .iter()
        .position(|n| n.state == NodeState::Error)
        .or_else(|| nodes.iter().position(|n| n.state == NodeState::Updating))
        .or_else(|| nodes.iter().position(|n| n.unschedulable))
        .or_else(|| {
            nodes
                .iter()
                .enumerate()
                .min_by_key(|(_, n)| n.creation_time)
                .map(|(i, _)| i)
        })
}

impl Reconciler {
    /// Flips at most one node (or one instance group) to `Deleting`.
    ///
    /// Categories are checked in order and the first match wins:
    /// repairable errors, nodes stuck in `Updating`, machine-image drift,
    /// instances the provider is already deleting, then surplus nodes.
    pub(crate) async fn detect_node_for_deletion(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
        status: &mut NodegroupStatus,
    ) -> bool {
        let nodes = &mut status.nodes;
        if nodes.iter().any(|n| n.state == NodeState::Deleting) {
            return true;
        }

        if nodegroup.is_controlplane() {
            let active = nodes.iter().filter(|n| n.state == NodeState::Active).count();
            let size = usize::try_from(nodegroup.spec.count).unwrap_or(0).max(nodes.len());
            let required = self.config.quorum_policy.required_active(size);
            if active.saturating_sub(1) < required {
                debug!(
                    "Not removing controlplane nodes: {} active, {} required after removal",
                    active, required
                );
                return false;
            }
        }

        if let Some(node) = nodes
            .iter_mut()
            .find(|n| n.state == NodeState::Error && !n.auto_repair_disabled)
        {
            mark_deleting(node, "Node in error state");
            return true;
        }

        let grace = self.config.monitor_grace_period(&nodegroup.spec.instance_type);
        let now = Utc::now();
        if let Some(node) = nodes.iter_mut().find(|n| {
            n.state == NodeState::Updating
                && !n.auto_repair_disabled
                && n.last_update.is_some_and(|t| now - t > grace)
        }) {
            mark_deleting(node, "Node did not become ready within the grace period");
            return true;
        }

        if !nodegroup.is_instance_group() {
            let desired_imi = &nodegroup.spec.instance_imi;
            if let Some(index) = nodes.iter().position(|n| &n.instance_imi != desired_imi) {
                if nodes.iter().all(|n| n.state == NodeState::Active) {
                    mark_deleting(&mut nodes[index], "Node runs an outdated instance IMI");
                    return true;
                }
                debug!("Deferring instance IMI replacement until every node is active");
                return false;
            }
        }

        let cloud_account_id = &nodegroup.spec.cloud_account_id;
        for index in 0..nodes.len() {
            let deletion = providers
                .node
                .instance_deletion_timestamp(&nodes[index].name, cloud_account_id)
                .await;
            match deletion {
                Ok(Some(_)) => {
                    mark_deleting(&mut nodes[index], "Instance is being deleted by the node provider");
                    return true;
                }
                Err(e) if e.is_not_found() => {
                    mark_deleting(&mut nodes[index], "Instance no longer exists in the node provider");
                    return true;
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to read deletion timestamp of {}: {}", nodes[index].name, e),
            }
        }

        if extra_count(nodegroup, nodes) > 0 {
            let Some(index) = pick_extra_node(nodes) else {
                return false;
            };
            if nodegroup.is_instance_group() {
                let group = InstanceGroupName::from_node_name(&nodes[index].name);
                for node in nodes.iter_mut().filter(|n| group.contains(&n.name)) {
                    mark_deleting(node, "Instance group exceeds the desired count");
                }
            } else {
                mark_deleting(&mut nodes[index], "Node exceeds the desired count");
            }
            return true;
        }

        false
    }

    /// Deletes the first `Deleting` node and drops it from the status.
    ///
    /// Returns whether a node was handled. The last member of an instance
    /// group that still exists is kept until the group is gone.
    pub(crate) async fn delete_node_in_deletion_state(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
        status: &mut NodegroupStatus,
    ) -> Result<bool, ControllerError> {
        let Some(index) = status.nodes.iter().position(|n| n.state == NodeState::Deleting) else {
            return Ok(false);
        };
        let node = status.nodes[index].clone();
        info!("Deleting node {}", node.name);

        let group = nodegroup
            .is_instance_group()
            .then(|| InstanceGroupName::from_node_name(&node.name));
        let group_exists = match &group {
            Some(group) => {
                providers
                    .node
                    .search_instance_group(group.as_str(), &nodegroup.spec.cloud_account_id)
                    .await?
            }
            None => false,
        };

        match group {
            Some(group) if group_exists => {
                if status.nodes.len() == 1 {
                    info!("Keeping node {}: an instance group needs at least one member", node.name);
                    return Ok(true);
                }
                self.delete_instance_group_member(nodegroup, providers, &node, &group).await?;
            }
            _ => self.delete_node(nodegroup, providers, &node).await?,
        }

        status.nodes.remove(index);
        status.count = i32::try_from(status.nodes.len()).unwrap_or(i32::MAX);
        Ok(true)
    }

    /// Deregisters storage, cordons and removes a worker from the downstream cluster.
    async fn release_worker(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
        node: &NodeStatus,
    ) -> Result<(), ControllerError> {
        let weka = &nodegroup.spec.weka_storage;
        if weka.enable && !node.weka_storage.client_id.is_empty() {
            info!("Deregistering storage agent of node {}", node.name);
            match providers
                .storage_agent
                .deregister_agent(&weka.cluster_id, &node.weka_storage.client_id)
                .await
            {
                Err(e) if e.is_not_found() => debug!("Storage agent of node {} already deregistered", node.name),
                other => other?,
            }
        }

        if let Err(e) = providers.kubernetes.drain_node(&node.name).await {
            warn!("Failed to drain node {}: {}", node.name, e);
        }
        providers.kubernetes.delete_node(&node.name).await?;
        Ok(())
    }

    /// Removes a node from etcd or the downstream cluster, then deletes its instance.
    pub(crate) async fn delete_node(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
        node: &NodeStatus,
    ) -> Result<(), ControllerError> {
        if nodegroup.is_controlplane() {
            match &providers.etcd {
                Some(etcd) => remove_etcd_member(etcd.as_ref(), &node.ip_address).await?,
                None => warn!("No etcd client, skipping etcd member removal for {}", node.name),
            }
        } else {
            self.release_worker(nodegroup, providers, node).await?;
        }

        match providers
            .node
            .delete_node(&node.name, &nodegroup.spec.cloud_account_id)
            .await
        {
            Err(e) if e.is_not_found() => {
                info!("Instance {} not found in node provider", node.name);
                Ok(())
            }
            other => other.map_err(Into::into),
        }
    }

    async fn delete_instance_group_member(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
        node: &NodeStatus,
        group: &InstanceGroupName,
    ) -> Result<(), ControllerError> {
        self.release_worker(nodegroup, providers, node).await?;
        info!("Deleting node {} from instance group {}", node.name, group);
        providers
            .node
            .delete_instance_group_member(&node.name, group.as_str(), &nodegroup.spec.cloud_account_id)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "deletion_test.rs"]
mod deletion_test;
