//! Reconcile-pass tests for the nodegroup engine

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::test_utils::*;
    use crds::NodegroupType;

    fn seed_cluster(store: &MemoryStore, cluster: &str, instance_imi: &str) {
        store.insert_cluster(create_test_cluster(cluster, instance_imi));
        store.insert_secret(cluster, create_test_cluster_secret(instance_imi));
    }

    /// Makes every provider instance active and joined downstream.
    fn activate_all(registry: &MockProviderRegistry) {
        for node in registry.node.nodes() {
            registry.node.set_state(&node.name, NodeState::Active);
            registry
                .kubernetes
                .add_node(create_test_node(&node.name, "", "", NodeState::Active));
        }
    }

    #[tokio::test]
    async fn test_adds_finalizer_first() {
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        let reconciler = create_test_reconciler(&store, &registry);
        let mut ng = create_test_nodegroup("ng-a", "cl-a", NodegroupType::Worker, 1, "vm-spr-sml", "imi-a");
        ng.metadata.finalizers = None;
        let ng = store.insert_nodegroup(ng);

        let action = reconciler.reconcile_nodegroup(&ng).await.unwrap();
        assert_eq!(action, Action::requeue(FINALIZER_REQUEUE));
        let stored = store.nodegroup("ng-a").unwrap();
        assert!(has_finalizer(&stored.metadata, NODEGROUP_FINALIZER));
        assert!(registry.node.created().is_empty());
    }

    #[tokio::test]
    async fn test_worker_group_converges_to_active() {
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        let reconciler = create_test_reconciler(&store, &registry);
        seed_cluster(&store, "cl-a", "imi-a");
        let ng = store.insert_nodegroup(create_test_nodegroup(
            "ng-a",
            "cl-a",
            NodegroupType::Worker,
            3,
            "vm-spr-sml",
            "imi-a",
        ));

        let action = reconciler.reconcile_nodegroup(&ng).await.unwrap();
        assert_eq!(action, Action::requeue(reconciler.config.monitor_periodicity()));
        assert_eq!(registry.node.created().len(), 3);

        let status = store.nodegroup("ng-a").unwrap().status.unwrap();
        assert_eq!(status.count, 3);
        assert_eq!(status.nodes.len(), 3);
        assert_eq!(status.state, NodegroupState::Updating);
        assert_eq!(status.message, "Provisioning nodegroup compute");

        // Provisioned but not yet joined downstream.
        for node in registry.node.nodes() {
            registry.node.set_state(&node.name, NodeState::Active);
        }
        reconciler.reconcile_nodegroup(&store.nodegroup("ng-a").unwrap()).await.unwrap();
        let status = store.nodegroup("ng-a").unwrap().status.unwrap();
        assert_eq!(status.state, NodegroupState::Updating);
        assert!(status.nodes.iter().all(|n| n.state == NodeState::Updating));
        assert_eq!(registry.node.created().len(), 3);

        activate_all(&registry);
        reconciler.reconcile_nodegroup(&store.nodegroup("ng-a").unwrap()).await.unwrap();
        let status = store.nodegroup("ng-a").unwrap().status.unwrap();
        assert_eq!(status.state, NodegroupState::Active);
        assert_eq!(status.message, "Nodegroup ready");
        assert_eq!(status.count, 3);
        assert!(registry.node.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_instance_group_created_as_one_unit() {
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        let reconciler = create_test_reconciler(&store, &registry);
        seed_cluster(&store, "cl-a", "imi-a");
        let ng = store.insert_nodegroup(create_test_nodegroup(
            "ng-a",
            "cl-a",
            NodegroupType::Worker,
            1,
            "bm-icp-gaudi2-cluster-3",
            "imi-a",
        ));

        reconciler.reconcile_nodegroup(&ng).await.unwrap();

        assert_eq!(registry.node.created().len(), 1);
        let status = store.nodegroup("ng-a").unwrap().status.unwrap();
        assert_eq!(status.count, 3);
        assert_eq!(status.state, NodegroupState::Updating);
    }

    #[tokio::test]
    async fn test_controlplane_grows_one_node_per_pass() {
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        let reconciler = create_test_reconciler(&store, &registry);
        seed_cluster(&store, "cl-a", "imi-a");
        let ng = store.insert_nodegroup(create_test_nodegroup(
            "cp-a",
            "cl-a",
            NodegroupType::Controlplane,
            3,
            "vm-spr-sml",
            "imi-a",
        ));

        reconciler.reconcile_nodegroup(&ng).await.unwrap();
        let created = registry.node.created();
        assert_eq!(created.len(), 1);
        assert!(created[0].registration_cmd.contains("--etcd-cluster-state new"));

        reconciler.reconcile_nodegroup(&store.nodegroup("cp-a").unwrap()).await.unwrap();
        let created = registry.node.created();
        assert_eq!(created.len(), 2);
        assert!(created[1].registration_cmd.contains("--etcd-cluster-state existing"));
        assert_eq!(store.nodegroup("cp-a").unwrap().status.unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_controlplane_requires_etcd_membership() {
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        let reconciler = create_test_reconciler(&store, &registry);
        seed_cluster(&store, "cl-a", "imi-a");
        let node = create_test_node("cp-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Active);
        registry.node.add_node(node.clone());
        registry.etcd.add_member(1, "10.0.0.1", "https://10.0.0.1:2380");
        registry.etcd.add_member(9, "10.0.0.9", "https://10.0.0.9:2380");
        let ng = store.insert_nodegroup(with_nodes(
            create_test_nodegroup("cp-a", "cl-a", NodegroupType::Controlplane, 1, "vm-spr-sml", "imi-a"),
            vec![node],
        ));

        reconciler.reconcile_nodegroup(&ng).await.unwrap();

        let status = store.nodegroup("cp-a").unwrap().status.unwrap();
        assert_eq!(status.state, NodegroupState::Active);
        assert_eq!(registry.etcd.removed(), vec![9]);
        assert_eq!(registry.etcd_connector.endpoints(), vec!["https://10.10.0.11:2379".to_string()]);
    }

    #[tokio::test]
    async fn test_surplus_node_deleted_and_requeued_quickly() {
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        let reconciler = create_test_reconciler(&store, &registry);
        seed_cluster(&store, "cl-a", "imi-a");
        let mut older = create_test_node("ng-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Active);
        older.creation_time = Some(Utc::now() - chrono::Duration::days(1));
        let newer = create_test_node("ng-a-bbbbb", "10.0.0.2", "imi-a", NodeState::Active);
        for node in [&older, &newer] {
            registry.node.add_node(node.clone());
            registry.kubernetes.add_node(node.clone());
        }
        let ng = store.insert_nodegroup(with_nodes(
            create_test_nodegroup("ng-a", "cl-a", NodegroupType::Worker, 1, "vm-spr-sml", "imi-a"),
            vec![older, newer],
        ));

        let action = reconciler.reconcile_nodegroup(&ng).await.unwrap();

        assert_eq!(action, Action::requeue(NODE_DELETED_REQUEUE));
        assert_eq!(registry.node.deleted(), vec!["ng-a-aaaaa".to_string()]);
        assert_eq!(registry.kubernetes.drained(), vec!["ng-a-aaaaa".to_string()]);
        let status = store.nodegroup("ng-a").unwrap().status.unwrap();
        assert_eq!(status.count, 1);
        assert_eq!(status.nodes[0].name, "ng-a-bbbbb");
    }

    #[tokio::test]
    async fn test_provisioning_failure_is_persisted_and_returned() {
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        let reconciler = create_test_reconciler(&store, &registry);
        seed_cluster(&store, "cl-a", "imi-a");
        registry.node.fail_create("ResourceExhausted", "no capacity");
        let ng = store.insert_nodegroup(create_test_nodegroup(
            "ng-a",
            "cl-a",
            NodegroupType::Worker,
            2,
            "vm-spr-sml",
            "imi-a",
        ));

        assert!(reconciler.reconcile_nodegroup(&ng).await.is_err());

        let status = store.nodegroup("ng-a").unwrap().status.unwrap();
        assert_eq!(status.count, 0);
        assert_eq!(status.state, NodegroupState::Updating);
        assert!(status.message.contains("ResourceExhausted"));
    }

    #[tokio::test]
    async fn test_status_conflicts_are_retried() {
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        let reconciler = create_test_reconciler(&store, &registry);
        seed_cluster(&store, "cl-a", "imi-a");
        store.fail_status_writes(2);
        let ng = store.insert_nodegroup(create_test_nodegroup(
            "ng-a",
            "cl-a",
            NodegroupType::Worker,
            1,
            "vm-spr-sml",
            "imi-a",
        ));

        reconciler.reconcile_nodegroup(&ng).await.unwrap();
        assert_eq!(store.nodegroup("ng-a").unwrap().status.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_workers_get_csrs_approved_and_storage_registered() {
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        let reconciler = create_test_reconciler(&store, &registry);
        seed_cluster(&store, "cl-a", "imi-a");
        let mut node = create_test_node("ng-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Active);
        node.storage_backend_ip = "192.168.0.1".to_string();
        registry.node.add_node(node.clone());
        registry.kubernetes.add_node(node.clone());
        registry.kubernetes.add_pending_csr("csr-ng", "ng-a-aaaaa");
        registry.kubernetes.add_pending_csr("csr-other", "other-bbbbb");

        let mut ng = create_test_nodegroup("ng-a", "cl-a", NodegroupType::Worker, 1, "bm-spr", "imi-a");
        ng.spec.weka_storage.enable = true;
        ng.spec.weka_storage.cluster_id = "weka-1".to_string();
        let ng = store.insert_nodegroup(with_nodes(ng, vec![node]));

        reconciler.reconcile_nodegroup(&ng).await.unwrap();

        assert_eq!(registry.kubernetes.approved_csrs(), vec!["csr-ng".to_string()]);
        let agents = registry.agent.agents("weka-1");
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].name, "ng-a-aaaaa");
        let status = store.nodegroup("ng-a").unwrap().status.unwrap();
        assert_eq!(status.nodes[0].weka_storage.client_id, "client-1");

        // A registered node is not registered twice.
        reconciler.reconcile_nodegroup(&store.nodegroup("ng-a").unwrap()).await.unwrap();
        assert_eq!(registry.agent.agents("weka-1").len(), 1);
    }

    #[tokio::test]
    async fn test_storage_register_label_opts_out() {
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        let reconciler = create_test_reconciler(&store, &registry);
        seed_cluster(&store, "cl-a", "imi-a");
        let node = create_test_node("ng-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Active);
        registry.node.add_node(node.clone());
        registry.kubernetes.add_node(node.clone());

        let mut ng = create_test_nodegroup("ng-a", "cl-a", NodegroupType::Worker, 1, "bm-spr", "imi-a");
        ng.spec.weka_storage.enable = true;
        ng.spec.weka_storage.cluster_id = "weka-1".to_string();
        ng.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(STORAGE_REGISTER_LABEL.to_string(), "false".to_string());
        let ng = store.insert_nodegroup(with_nodes(ng, vec![node]));

        reconciler.reconcile_nodegroup(&ng).await.unwrap();
        assert!(registry.agent.agents("weka-1").is_empty());
    }

    #[tokio::test]
    async fn test_vast_nodes_report_active_storage() {
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        let reconciler = create_test_reconciler(&store, &registry);
        seed_cluster(&store, "cl-a", "imi-a");
        let node = create_test_node("ng-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Active);
        registry.node.add_node(node.clone());
        registry.kubernetes.add_node(node.clone());
        let mut ng = create_test_nodegroup("ng-a", "cl-a", NodegroupType::Worker, 1, "bm-spr", "imi-a");
        ng.spec.weka_storage.mode = "vast".to_string();
        let ng = store.insert_nodegroup(with_nodes(ng, vec![node]));

        reconciler.reconcile_nodegroup(&ng).await.unwrap();

        let status = store.nodegroup("ng-a").unwrap().status.unwrap();
        assert_eq!(status.nodes[0].weka_storage.status, "Active");
        assert_eq!(status.nodes[0].weka_storage.custom_status, "Active");
    }

    #[tokio::test]
    async fn test_deletion_removes_every_node_then_finalizer() {
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        let reconciler = create_test_reconciler(&store, &registry);
        seed_cluster(&store, "cl-a", "imi-a");
        let nodes = vec![
            create_test_node("ng-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Active),
            create_test_node("ng-a-bbbbb", "10.0.0.2", "imi-a", NodeState::Error),
        ];
        for node in &nodes {
            registry.node.add_node(node.clone());
        }
        let mut ng = with_nodes(
            create_test_nodegroup("ng-a", "cl-a", NodegroupType::Worker, 2, "vm-spr-sml", "imi-a"),
            nodes,
        );
        ng.metadata.deletion_timestamp = Some(deletion_time());
        let ng = store.insert_nodegroup(ng);

        let action = reconciler.reconcile_nodegroup(&ng).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(registry.node.deleted().len(), 2);
        assert_eq!(registry.kubernetes.deleted().len(), 2);
        assert!(registry.node.nodes().is_empty());
        assert!(store.nodegroup("ng-a").is_none());
    }

    #[tokio::test]
    async fn test_deletion_without_cluster_secret() {
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        let reconciler = create_test_reconciler(&store, &registry);
        let node = create_test_node("cp-a-aaaaa", "10.0.0.1", "imi-a", NodeState::Active);
        registry.node.add_node(node.clone());
        let mut ng = with_nodes(
            create_test_nodegroup("cp-a", "cl-a", NodegroupType::Controlplane, 1, "vm-spr-sml", "imi-a"),
            vec![node],
        );
        ng.metadata.deletion_timestamp = Some(deletion_time());
        let ng = store.insert_nodegroup(ng);

        reconciler.reconcile_nodegroup(&ng).await.unwrap();

        assert_eq!(registry.node.deleted(), vec!["cp-a-aaaaa".to_string()]);
        assert!(registry.etcd.removed().is_empty());
        assert!(store.nodegroup("cp-a").is_none());
    }
}
