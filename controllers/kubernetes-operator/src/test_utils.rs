//! Test utilities for unit testing reconcilers
//!
//! This module provides an in-memory object store, a provider registry
//! backed by the provider crates' mocks, and helpers for creating test data.

use crate::cluster_secret::ClusterSecret;
use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::reconciler::cluster::CLUSTER_FINALIZER;
use crate::reconciler::cluster::encryption::EncryptionConfiguration;
use crate::reconciler::nodegroup::{NODEGROUP_FINALIZER, NodegroupProviders};
use crate::registry::{Downstream, ProviderRegistry};
use crate::store::ObjectStore;
use chrono::Utc;
use crds::*;
use etcd_gateway::{EtcdClientTrait, EtcdConnector, EtcdTls, MockEtcdClient, MockEtcdConnector};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kubernetes_provider::{
    KubernetesProviderError, KubernetesProviderTrait, MockKubernetesProvider, CA_CERT_KEY, CA_KEY_KEY,
    CONTROLPLANE_REGISTRATION_CMD_KEY, ETCD_CA_CERT_KEY, ETCD_CA_KEY_KEY, IKS_PROVIDER, WORKER_REGISTRATION_CMD_KEY,
};
use node_provider::{MockNodeProvider, NodeProviderError, NodeProviderTrait, COMPUTE_PROVIDER};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storage_provider::{
    MockStorageAgent, MockStorageProvider, StorageAgentTrait, StorageProviderError, StorageProviderTrait,
};

pub const TEST_NAMESPACE: &str = "default";
pub const TEST_CLOUD_ACCOUNT: &str = "123456789012";
pub const TEST_REGION: &str = "us-dev-1";

/// Timestamp usable as a `deletionTimestamp`.
pub fn deletion_time() -> Time {
    serde_json::from_value(serde_json::json!(Utc::now().to_rfc3339())).unwrap()
}

/// In-memory [`ObjectStore`] with resource-version checks
#[derive(Clone, Default)]
pub struct MemoryStore {
    nodegroups: Arc<Mutex<BTreeMap<String, Nodegroup>>>,
    clusters: Arc<Mutex<BTreeMap<String, Cluster>>>,
    secrets: Arc<Mutex<BTreeMap<String, ClusterSecret>>>,
    version: Arc<AtomicU64>,
    status_conflicts: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn check_version(stored: &ObjectMeta, incoming: &ObjectMeta) -> Result<(), ControllerError> {
        match &incoming.resource_version {
            Some(rv) if Some(rv) != stored.resource_version.as_ref() => Err(ControllerError::Conflict(format!(
                "resource version {} is stale",
                rv
            ))),
            _ => Ok(()),
        }
    }

    fn take_status_conflict(&self) -> bool {
        self.status_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Makes the next `count` status writes fail with a conflict.
    pub fn fail_status_writes(&self, count: u32) {
        self.status_conflicts.store(count, Ordering::SeqCst);
    }

    /// Stores a nodegroup as-is, assigning a resource version.
    pub fn insert_nodegroup(&self, mut nodegroup: Nodegroup) -> Nodegroup {
        nodegroup.metadata.resource_version = Some(self.next_version());
        let name = nodegroup.metadata.name.clone().unwrap_or_default();
        self.nodegroups.lock().unwrap().insert(name, nodegroup.clone());
        nodegroup
    }

    pub fn insert_cluster(&self, mut cluster: Cluster) -> Cluster {
        cluster.metadata.resource_version = Some(self.next_version());
        let name = cluster.metadata.name.clone().unwrap_or_default();
        self.clusters.lock().unwrap().insert(name, cluster.clone());
        cluster
    }

    pub fn insert_secret(&self, name: &str, secret: ClusterSecret) {
        self.secrets.lock().unwrap().insert(name.to_string(), secret);
    }

    pub fn nodegroup(&self, name: &str) -> Option<Nodegroup> {
        self.nodegroups.lock().unwrap().get(name).cloned()
    }

    pub fn nodegroups(&self) -> Vec<Nodegroup> {
        self.nodegroups.lock().unwrap().values().cloned().collect()
    }

    pub fn cluster(&self, name: &str) -> Option<Cluster> {
        self.clusters.lock().unwrap().get(name).cloned()
    }

    pub fn secret(&self, name: &str) -> Option<ClusterSecret> {
        self.secrets.lock().unwrap().get(name).cloned()
    }
}

fn missing(kind: &str, name: &str) -> ControllerError {
    ControllerError::InvalidConfig(format!("{} {} not found", kind, name))
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get_nodegroup(&self, name: &str) -> Result<Option<Nodegroup>, ControllerError> {
        Ok(self.nodegroup(name))
    }

    async fn list_nodegroups(&self, cluster: &str) -> Result<Vec<Nodegroup>, ControllerError> {
        Ok(self
            .nodegroups()
            .into_iter()
            .filter(|ng| {
                ng.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(CLUSTER_LABEL))
                    .is_some_and(|c| c == cluster)
            })
            .collect())
    }

    async fn create_nodegroup(&self, nodegroup: &Nodegroup) -> Result<Nodegroup, ControllerError> {
        let name = nodegroup.metadata.name.clone().unwrap_or_default();
        if self.nodegroups.lock().unwrap().contains_key(&name) {
            return Err(ControllerError::Conflict(format!("nodegroup {} already exists", name)));
        }
        let mut created = nodegroup.clone();
        created.metadata.namespace.get_or_insert_with(|| TEST_NAMESPACE.to_string());
        Ok(self.insert_nodegroup(created))
    }

    async fn update_nodegroup(&self, nodegroup: &Nodegroup) -> Result<Nodegroup, ControllerError> {
        let name = nodegroup.metadata.name.clone().unwrap_or_default();
        let mut nodegroups = self.nodegroups.lock().unwrap();
        let stored = nodegroups.get(&name).ok_or_else(|| missing("nodegroup", &name))?;
        Self::check_version(&stored.metadata, &nodegroup.metadata)?;

        let mut updated = nodegroup.clone();
        updated.status = stored.status.clone();
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        updated.metadata.resource_version = Some(self.next_version());

        let released = updated.metadata.deletion_timestamp.is_some()
            && updated.metadata.finalizers.as_ref().is_none_or(Vec::is_empty);
        if released {
            nodegroups.remove(&name);
        } else {
            nodegroups.insert(name, updated.clone());
        }
        Ok(updated)
    }

    async fn delete_nodegroup(&self, name: &str) -> Result<(), ControllerError> {
        let mut nodegroups = self.nodegroups.lock().unwrap();
        let Some(stored) = nodegroups.get_mut(name) else {
            return Ok(());
        };
        if stored.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
            nodegroups.remove(name);
        } else if stored.metadata.deletion_timestamp.is_none() {
            stored.metadata.deletion_timestamp = Some(deletion_time());
            stored.metadata.resource_version = Some(self.next_version());
        }
        Ok(())
    }

    async fn update_nodegroup_status(
        &self,
        nodegroup: &Nodegroup,
        status: &NodegroupStatus,
    ) -> Result<Nodegroup, ControllerError> {
        if self.take_status_conflict() {
            return Err(ControllerError::Conflict("injected status conflict".to_string()));
        }
        let name = nodegroup.metadata.name.clone().unwrap_or_default();
        let mut nodegroups = self.nodegroups.lock().unwrap();
        let stored = nodegroups.get_mut(&name).ok_or_else(|| missing("nodegroup", &name))?;
        Self::check_version(&stored.metadata, &nodegroup.metadata)?;
        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(self.next_version());
        Ok(stored.clone())
    }

    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>, ControllerError> {
        Ok(self.cluster(name))
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, ControllerError> {
        Ok(self.clusters.lock().unwrap().values().cloned().collect())
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, ControllerError> {
        let name = cluster.metadata.name.clone().unwrap_or_default();
        let mut clusters = self.clusters.lock().unwrap();
        let stored = clusters.get(&name).ok_or_else(|| missing("cluster", &name))?;
        Self::check_version(&stored.metadata, &cluster.metadata)?;

        let mut updated = cluster.clone();
        updated.status = stored.status.clone();
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        updated.metadata.resource_version = Some(self.next_version());

        let released = updated.metadata.deletion_timestamp.is_some()
            && updated.metadata.finalizers.as_ref().is_none_or(Vec::is_empty);
        if released {
            clusters.remove(&name);
        } else {
            clusters.insert(name, updated.clone());
        }
        Ok(updated)
    }

    async fn update_cluster_status(&self, cluster: &Cluster, status: &ClusterStatus) -> Result<Cluster, ControllerError> {
        if self.take_status_conflict() {
            return Err(ControllerError::Conflict("injected status conflict".to_string()));
        }
        let name = cluster.metadata.name.clone().unwrap_or_default();
        let mut clusters = self.clusters.lock().unwrap();
        let stored = clusters.get_mut(&name).ok_or_else(|| missing("cluster", &name))?;
        Self::check_version(&stored.metadata, &cluster.metadata)?;
        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(self.next_version());
        Ok(stored.clone())
    }

    async fn get_secret(&self, name: &str) -> Result<Option<ClusterSecret>, ControllerError> {
        Ok(self.secret(name))
    }

    async fn create_secret(&self, name: &str, _owner: &Cluster, secret: &ClusterSecret) -> Result<(), ControllerError> {
        self.secrets
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| secret.clone());
        Ok(())
    }

    async fn update_secret(&self, name: &str, secret: &ClusterSecret) -> Result<(), ControllerError> {
        let mut secrets = self.secrets.lock().unwrap();
        let stored = secrets
            .get_mut(name)
            .ok_or_else(|| ControllerError::InvalidSecret(format!("secret {} not found", name)))?;
        *stored = secret.clone();
        Ok(())
    }
}

/// [`ProviderRegistry`] handing out the provider crates' mocks.
///
/// Every mock shares state with its clones, so tests keep the fields and
/// assert on them after a reconcile pass.
#[derive(Clone)]
pub struct MockProviderRegistry {
    pub node: MockNodeProvider,
    /// Returned when the downstream cluster is reachable
    pub kubernetes: MockKubernetesProvider,
    /// Returned when the cluster secret holds no CA
    pub offline_kubernetes: MockKubernetesProvider,
    pub weka: MockStorageProvider,
    pub vast: MockStorageProvider,
    pub agent: MockStorageAgent,
    pub etcd: MockEtcdClient,
    pub etcd_connector: MockEtcdConnector,
}

impl MockProviderRegistry {
    pub fn new() -> Self {
        let etcd = MockEtcdClient::new();
        Self {
            node: MockNodeProvider::new(),
            kubernetes: MockKubernetesProvider::new(),
            offline_kubernetes: MockKubernetesProvider::disconnected(),
            weka: MockStorageProvider::new(WEKA_STORAGE_PROVIDER),
            vast: MockStorageProvider::new(VAST_STORAGE_PROVIDER),
            agent: MockStorageAgent::new(),
            etcd_connector: MockEtcdConnector::new(etcd.clone()),
            etcd,
        }
    }
}

#[async_trait::async_trait]
impl ProviderRegistry for MockProviderRegistry {
    fn node_provider(&self, name: &str) -> Result<Arc<dyn NodeProviderTrait>, ControllerError> {
        if name != COMPUTE_PROVIDER {
            return Err(NodeProviderError::Unsupported(name.to_string()).into());
        }
        Ok(Arc::new(self.node.clone()))
    }

    async fn kubernetes_provider(
        &self,
        name: &str,
        downstream: Option<Downstream<'_>>,
    ) -> Result<Arc<dyn KubernetesProviderTrait>, ControllerError> {
        if name != IKS_PROVIDER {
            return Err(KubernetesProviderError::Unsupported(name.to_string()).into());
        }
        Ok(match downstream {
            Some(_) => Arc::new(self.kubernetes.clone()),
            None => Arc::new(self.offline_kubernetes.clone()),
        })
    }

    fn storage_provider(&self, name: &str) -> Result<Arc<dyn StorageProviderTrait>, ControllerError> {
        match name {
            WEKA_STORAGE_PROVIDER => Ok(Arc::new(self.weka.clone())),
            VAST_STORAGE_PROVIDER => Ok(Arc::new(self.vast.clone())),
            other => Err(StorageProviderError::Unsupported(other.to_string()).into()),
        }
    }

    fn storage_agent(&self) -> Result<Arc<dyn StorageAgentTrait>, ControllerError> {
        Ok(Arc::new(self.agent.clone()))
    }

    async fn etcd_client(&self, endpoint: &str, secret: &ClusterSecret) -> Result<Box<dyn EtcdClientTrait>, ControllerError> {
        secret.etcd_ca_cert()?;
        Ok(self.etcd_connector.connect(endpoint, &EtcdTls::default())?)
    }
}

/// Helper to create a test Nodegroup CRD carrying the finalizer
pub fn create_test_nodegroup(
    name: &str,
    cluster: &str,
    nodegroup_type: NodegroupType,
    count: i32,
    instance_type: &str,
    instance_imi: &str,
) -> Nodegroup {
    let mut nodegroup = Nodegroup::new(
        name,
        NodegroupSpec {
            cluster_name: cluster.to_string(),
            nodegroup_type,
            count,
            instance_type: instance_type.to_string(),
            instance_imi: instance_imi.to_string(),
            kubernetes_version: "1.28.7".to_string(),
            node_provider: COMPUTE_PROVIDER.to_string(),
            kubernetes_provider: IKS_PROVIDER.to_string(),
            cloud_account_id: TEST_CLOUD_ACCOUNT.to_string(),
            region: TEST_REGION.to_string(),
            vnets: vec![test_vnet()],
            api_server_lb: "10.10.0.10".to_string(),
            api_server_lb_port: "443".to_string(),
            etcd_lb: "10.10.0.11".to_string(),
            etcd_lb_port: "2379".to_string(),
            ..Default::default()
        },
    );
    nodegroup.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    nodegroup.metadata.labels = Some(BTreeMap::from([(CLUSTER_LABEL.to_string(), cluster.to_string())]));
    nodegroup.metadata.finalizers = Some(vec![NODEGROUP_FINALIZER.to_string()]);
    nodegroup
}

/// Helper to attach observed nodes to a test nodegroup
pub fn with_nodes(mut nodegroup: Nodegroup, nodes: Vec<NodeStatus>) -> Nodegroup {
    let name = nodegroup.metadata.name.clone().unwrap_or_default();
    nodegroup.status = Some(NodegroupStatus {
        name,
        nodegroup_type: nodegroup.spec.nodegroup_type,
        count: i32::try_from(nodes.len()).unwrap(),
        nodes,
        ..Default::default()
    });
    nodegroup
}

/// Helper to create a test NodeStatus created just now
pub fn create_test_node(name: &str, ip: &str, instance_imi: &str, state: NodeState) -> NodeStatus {
    NodeStatus {
        name: name.to_string(),
        ip_address: ip.to_string(),
        instance_imi: instance_imi.to_string(),
        state,
        creation_time: Some(Utc::now()),
        last_update: Some(Utc::now()),
        ..Default::default()
    }
}

pub fn test_vnet() -> Vnet {
    Vnet {
        availability_zone: "us-dev-1a".to_string(),
        network_interface_vnet_name: "us-dev-1a-default".to_string(),
    }
}

/// Helper to create a test Cluster CRD with provisioned load balancers
pub fn create_test_cluster(name: &str, instance_imi: &str) -> Cluster {
    let mut cluster = Cluster::new(
        name,
        ClusterSpec {
            kubernetes_version: "1.28.7".to_string(),
            instance_type: "vm-spr-sml".to_string(),
            instance_imi: instance_imi.to_string(),
            node_provider: COMPUTE_PROVIDER.to_string(),
            kubernetes_provider: IKS_PROVIDER.to_string(),
            network: Network {
                service_cidr: "10.96.0.0/16".to_string(),
                pod_cidr: "10.244.0.0/16".to_string(),
                cluster_dns: "10.96.0.10".to_string(),
                region: TEST_REGION.to_string(),
            },
            vnets: vec![test_vnet()],
            cloud_account_id: TEST_CLOUD_ACCOUNT.to_string(),
            customer_cloud_account_id: "987654321098".to_string(),
            load_balancers: LoadBalancers {
                etcd: "10.10.0.11".to_string(),
                etcd_port: 2379,
                apiserver: "10.10.0.10".to_string(),
                apiserver_port: 443,
                public_apiserver: "203.0.113.10".to_string(),
                public_apiserver_port: 443,
                konnectivity: "10.10.0.12".to_string(),
            },
            ..Default::default()
        },
    );
    cluster.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    cluster.metadata.finalizers = Some(vec![CLUSTER_FINALIZER.to_string()]);
    cluster
}

/// Helper to create a complete cluster secret whose encryption config is keyed by `instance_imi`
pub fn create_test_cluster_secret(instance_imi: &str) -> ClusterSecret {
    let mut data: BTreeMap<String, Vec<u8>> = [CA_CERT_KEY, CA_KEY_KEY, ETCD_CA_CERT_KEY, ETCD_CA_KEY_KEY]
        .into_iter()
        .map(|k| (k.to_string(), format!("test {k}").into_bytes()))
        .collect();
    data.insert(
        CONTROLPLANE_REGISTRATION_CMD_KEY.to_string(),
        b"bash /usr/local/bin/bootstrap.sh --role controlplane".to_vec(),
    );
    data.insert(
        WORKER_REGISTRATION_CMD_KEY.to_string(),
        b"bash /usr/local/bin/bootstrap.sh --role worker".to_vec(),
    );

    let mut secret = ClusterSecret::new(data);
    let config = EncryptionConfiguration::initial(Utc::now()).to_yaml().unwrap();
    secret
        .set_encryption_configs(&BTreeMap::from([(instance_imi.to_string(), config)]))
        .unwrap();
    secret
}

/// Helper to create a reconciler over the given store and registry
pub fn create_test_reconciler(store: &MemoryStore, registry: &MockProviderRegistry) -> Reconciler {
    create_test_reconciler_with_config(store, registry, OperatorConfig::default())
}

pub fn create_test_reconciler_with_config(
    store: &MemoryStore,
    registry: &MockProviderRegistry,
    config: OperatorConfig,
) -> Reconciler {
    Reconciler::new(
        Arc::new(store.clone()),
        Arc::new(registry.clone()),
        config,
        Arc::new(Metrics::new().unwrap()),
    )
    .with_status_retry_delay(Duration::ZERO)
}

/// Helper to hand the registry mocks straight to nodegroup code
///
/// The etcd client is always present; worker code never touches it.
pub fn create_test_providers(registry: &MockProviderRegistry, cluster: &str, instance_imi: &str) -> NodegroupProviders {
    NodegroupProviders {
        node: Arc::new(registry.node.clone()),
        kubernetes: Arc::new(registry.kubernetes.clone()),
        etcd: Some(Box::new(registry.etcd.clone())),
        storage_agent: Arc::new(registry.agent.clone()),
        secret: Some(create_test_cluster_secret(instance_imi)),
        cluster: Some(create_test_cluster(cluster, instance_imi)),
    }
}
