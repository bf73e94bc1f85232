//! Per-node observation.
//!
//! A node's state is assembled from the compute provider record and then
//! refined by the downstream Kubernetes node (workers) or by etcd
//! membership (control plane).

use crate::error::ControllerError;
use chrono::{DateTime, Utc};
use crds::{NodeState, NodeStatus};
use etcd_gateway::EtcdMember;
use kubernetes_provider::{KubernetesProviderError, KubernetesProviderTrait};
use node_provider::NodeProviderTrait;
use storage_provider::StorageAgent;
use tracing::debug;

pub const REASON_NOT_FOUND: &str = "NotFound";
pub const REASON_WORKER_NOT_READY: &str = "WorkerNotReady";
pub const REASON_ETCD_NOT_READY: &str = "EtcdNotReady";

/// Reads the provider record of a previously known node.
///
/// `Ok(Err(node))` carries the prior status flagged as missing.
async fn provider_record(
    provider: &dyn NodeProviderTrait,
    prior: &NodeStatus,
    cloud_account_id: &str,
    missing_message: &str,
) -> Result<Result<NodeStatus, NodeStatus>, ControllerError> {
    match provider.get_node(&prior.name, cloud_account_id).await {
        Ok(mut observed) => {
            observed.weka_storage = prior.weka_storage.clone();
            Ok(Ok(observed))
        }
        Err(e) if e.is_not_found() => {
            debug!("Node {} not found in compute provider", prior.name);
            let mut missing = prior.clone();
            missing.state = NodeState::Error;
            missing.message = missing_message.to_string();
            missing.reason = REASON_NOT_FOUND.to_string();
            Ok(Err(missing))
        }
        Err(e) => Err(e.into()),
    }
}

/// Observes a worker node.
///
/// Until the node has joined the downstream cluster it stays `Updating`.
/// Once joined, a provider state of `Active` or `Error` defers to the
/// downstream node's readiness.
pub async fn collect_worker_node(
    provider: &dyn NodeProviderTrait,
    kubernetes: &dyn KubernetesProviderTrait,
    prior: &NodeStatus,
    cloud_account_id: &str,
) -> Result<NodeStatus, ControllerError> {
    let mut observed = match provider_record(provider, prior, cloud_account_id, "node not found").await? {
        Ok(observed) => observed,
        Err(missing) => return Ok(missing),
    };

    let provider_settled = matches!(observed.state, NodeState::Active | NodeState::Error);
    match kubernetes.get_node(&prior.name).await {
        Ok(downstream) => {
            if provider_settled {
                observed.state = downstream.state;
            }
            observed.message = downstream.message;
            observed.reason = downstream.reason;
            observed.kubelet_version = downstream.kubelet_version;
            observed.kube_proxy_version = downstream.kube_proxy_version;
            observed.unschedulable = downstream.unschedulable;
            observed.auto_repair_disabled = downstream.auto_repair_disabled;
        }
        Err(e) if e.is_not_found() || matches!(e, KubernetesProviderError::NotConnected) => {
            if provider_settled {
                observed.state = NodeState::Updating;
            }
            observed.message = "Checking node".to_string();
            observed.reason = REASON_WORKER_NOT_READY.to_string();
        }
        Err(e) => return Err(e.into()),
    }
    Ok(observed)
}

/// Observes a control-plane node.
///
/// An `Active` instance only counts as ready once etcd lists a member named
/// after its IP.
pub async fn collect_controlplane_node(
    provider: &dyn NodeProviderTrait,
    members: &[EtcdMember],
    prior: &NodeStatus,
    cloud_account_id: &str,
) -> Result<NodeStatus, ControllerError> {
    let mut observed = match provider_record(provider, prior, cloud_account_id, "Node not found").await? {
        Ok(observed) => observed,
        Err(missing) => return Ok(missing),
    };
    if observed.state != NodeState::Active {
        return Ok(observed);
    }

    if members.iter().any(|m| m.name == observed.ip_address) {
        observed.message.clear();
        observed.reason.clear();
    } else {
        observed.state = NodeState::Updating;
        observed.message = "checking etcd membership".to_string();
        observed.reason = REASON_ETCD_NOT_READY.to_string();
    }
    Ok(observed)
}

/// Stamps `last_update` so it only moves when a node changes state.
pub fn merge_observed(prior: &[NodeStatus], observed: Vec<NodeStatus>, now: DateTime<Utc>) -> Vec<NodeStatus> {
    observed
        .into_iter()
        .map(|mut node| {
            node.last_update = match prior.iter().find(|p| p.name == node.name) {
                Some(p) if p.state == node.state => p.last_update.or(Some(now)),
                Some(_) => Some(now),
                None => node.last_update.or(Some(now)),
            };
            node
        })
        .collect()
}

/// Copies storage agent registration onto the nodes it belongs to.
pub fn apply_storage_agents(nodes: &mut [NodeStatus], agents: &[StorageAgent]) {
    for node in nodes {
        if let Some(agent) = agents.iter().find(|a| a.name == node.name) {
            node.weka_storage.client_id = agent.client_id.clone();
            node.weka_storage.status = agent.status.clone();
            node.weka_storage.custom_status = agent.custom_status.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_node;
    use chrono::Duration;
    use kubernetes_provider::MockKubernetesProvider;
    use node_provider::MockNodeProvider;

    #[tokio::test]
    async fn test_worker_missing_from_provider_is_error() {
        let provider = MockNodeProvider::new();
        let k8s = MockKubernetesProvider::new();
        let prior = create_test_node("ng-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Active);

        let node = collect_worker_node(&provider, &k8s, &prior, "acct").await.unwrap();
        assert_eq!(node.state, NodeState::Error);
        assert_eq!(node.reason, REASON_NOT_FOUND);
        assert_eq!(node.ip_address, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_worker_not_joined_is_updating() {
        let provider = MockNodeProvider::new();
        provider.add_node(create_test_node("ng-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Active));
        let prior = create_test_node("ng-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Updating);

        for k8s in [MockKubernetesProvider::new(), MockKubernetesProvider::disconnected()] {
            let node = collect_worker_node(&provider, &k8s, &prior, "acct").await.unwrap();
            assert_eq!(node.state, NodeState::Updating);
            assert_eq!(node.reason, REASON_WORKER_NOT_READY);
        }
    }

    #[tokio::test]
    async fn test_worker_takes_downstream_state() {
        let provider = MockNodeProvider::new();
        provider.add_node(create_test_node("ng-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Active));
        let k8s = MockKubernetesProvider::new();
        let mut downstream = create_test_node("ng-a-aaaaa", "", "", NodeState::Error);
        downstream.reason = "KubeletNotReady".to_string();
        downstream.kubelet_version = "v1.28.7".to_string();
        downstream.auto_repair_disabled = true;
        k8s.add_node(downstream);
        let prior = create_test_node("ng-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Active);

        let node = collect_worker_node(&provider, &k8s, &prior, "acct").await.unwrap();
        assert_eq!(node.state, NodeState::Error);
        assert_eq!(node.reason, "KubeletNotReady");
        assert_eq!(node.kubelet_version, "v1.28.7");
        assert!(node.auto_repair_disabled);
        assert_eq!(node.ip_address, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_worker_provisioning_state_is_kept() {
        let provider = MockNodeProvider::new();
        provider.add_node(create_test_node("ng-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Updating));
        let k8s = MockKubernetesProvider::new();
        k8s.add_node(create_test_node("ng-a-aaaaa", "", "", NodeState::Active));
        let prior = create_test_node("ng-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Updating);

        let node = collect_worker_node(&provider, &k8s, &prior, "acct").await.unwrap();
        assert_eq!(node.state, NodeState::Updating);
    }

    #[tokio::test]
    async fn test_controlplane_requires_etcd_member() {
        let provider = MockNodeProvider::new();
        provider.add_node(create_test_node("cp-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Active));
        let prior = create_test_node("cp-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Updating);

        let node = collect_controlplane_node(&provider, &[], &prior, "acct").await.unwrap();
        assert_eq!(node.state, NodeState::Updating);
        assert_eq!(node.reason, REASON_ETCD_NOT_READY);

        let members = vec![EtcdMember {
            id: 1,
            name: "10.0.0.1".to_string(),
            peer_urls: vec!["https://10.0.0.1:2380".to_string()],
            ..Default::default()
        }];
        let node = collect_controlplane_node(&provider, &members, &prior, "acct").await.unwrap();
        assert_eq!(node.state, NodeState::Active);
        assert!(node.reason.is_empty());
    }

    #[test]
    fn test_merge_observed_moves_last_update_on_state_change() {
        let now = Utc::now();
        let earlier = now - Duration::minutes(30);
        let mut same = create_test_node("a", "", "", NodeState::Updating);
        same.last_update = Some(earlier);
        let mut changed = create_test_node("b", "", "", NodeState::Updating);
        changed.last_update = Some(earlier);
        let prior = vec![same.clone(), changed.clone()];

        let mut observed_changed = changed;
        observed_changed.state = NodeState::Active;
        let mut fresh = create_test_node("c", "", "", NodeState::Updating);
        fresh.last_update = None;
        let merged = merge_observed(&prior, vec![same, observed_changed, fresh], now);

        assert_eq!(merged[0].last_update, Some(earlier));
        assert_eq!(merged[1].last_update, Some(now));
        assert_eq!(merged[2].last_update, Some(now));
    }

    #[test]
    fn test_apply_storage_agents() {
        let mut nodes = vec![create_test_node("a", "", "", NodeState::Active)];
        let agents = vec![StorageAgent {
            name: "a".to_string(),
            client_id: "client-1".to_string(),
            status: "Up".to_string(),
            custom_status: "Registered".to_string(),
        }];
        apply_storage_agents(&mut nodes, &agents);
        assert_eq!(nodes[0].weka_storage.client_id, "client-1");
        assert_eq!(nodes[0].weka_storage.status, "Up");
    }
}
