//! Mock node provider for unit testing
//!
//! Keeps instances in memory keyed by name. Instance groups are tracked by
//! name so member deletion and group search behave like the compute service.

use crate::error::NodeProviderError;
use crate::models::*;
use crate::provider_trait::NodeProviderTrait;
use chrono::{DateTime, Utc};
use crds::{NodeState, NodeStatus};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

/// Mock node provider for testing
#[derive(Clone, Default)]
pub struct MockNodeProvider {
    nodes: Arc<Mutex<BTreeMap<String, NodeStatus>>>,
    deletion_timestamps: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
    instance_groups: Arc<Mutex<BTreeSet<String>>>,
    instance_types: Arc<Mutex<HashMap<String, InstanceType>>>,
    machine_images: Arc<Mutex<HashMap<String, MachineImage>>>,
    created: Arc<Mutex<Vec<CreateNodeRequest>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    create_error: Arc<Mutex<Option<(String, String)>>>,
    counter: Arc<Mutex<u32>>,
}

impl std::fmt::Debug for MockNodeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNodeProvider").finish_non_exhaustive()
    }
}

impl MockNodeProvider {
    /// Create an empty mock provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an instance (for test setup)
    pub fn add_node(&self, node: NodeStatus) {
        self.nodes.lock().unwrap().insert(node.name.clone(), node);
    }

    /// Set the state of an existing instance
    pub fn set_state(&self, name: &str, state: NodeState) {
        if let Some(node) = self.nodes.lock().unwrap().get_mut(name) {
            node.state = state;
        }
    }

    /// Mark an instance as being deleted upstream
    pub fn set_deletion_timestamp(&self, name: &str, at: DateTime<Utc>) {
        self.deletion_timestamps.lock().unwrap().insert(name.to_string(), at);
    }

    /// Register an existing instance group (for test setup)
    pub fn add_instance_group(&self, name: &str) {
        self.instance_groups.lock().unwrap().insert(name.to_string());
    }

    /// Remove an instance group
    pub fn remove_instance_group(&self, name: &str) {
        self.instance_groups.lock().unwrap().remove(name);
    }

    /// Register instance type metadata
    pub fn add_instance_type(&self, instance_type: InstanceType) {
        self.instance_types
            .lock()
            .unwrap()
            .insert(instance_type.name.clone(), instance_type);
    }

    /// Register machine image metadata
    pub fn add_machine_image(&self, image: MachineImage) {
        self.machine_images.lock().unwrap().insert(image.name.clone(), image);
    }

    /// Make every create call fail with the given code and message
    pub fn fail_create(&self, code: &str, message: &str) {
        *self.create_error.lock().unwrap() = Some((code.to_string(), message.to_string()));
    }

    /// Create requests received, in order
    pub fn created(&self) -> Vec<CreateNodeRequest> {
        self.created.lock().unwrap().clone()
    }

    /// Names of deleted instances, in order
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Current instances
    pub fn nodes(&self) -> Vec<NodeStatus> {
        self.nodes.lock().unwrap().values().cloned().collect()
    }

    fn check_create(&self, request: &CreateNodeRequest) -> Result<(), NodeProviderError> {
        if let Some((code, message)) = self.create_error.lock().unwrap().clone() {
            return Err(NodeProviderError::Api { code, message });
        }
        if request.nodegroup.spec.vnets.is_empty() {
            return Err(NodeProviderError::InvalidRequest("no vnets found in nodegroup spec".to_string()));
        }
        self.created.lock().unwrap().push(request.clone());
        Ok(())
    }

    fn next_ip(&self) -> String {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        format!("10.0.{}.{}", *counter / 250, *counter % 250 + 1)
    }

    fn provisioning(&self, name: String, imi: &str) -> NodeStatus {
        NodeStatus {
            name,
            ip_address: self.next_ip(),
            instance_imi: imi.to_string(),
            state: NodeState::Updating,
            message: "Provisioning node".to_string(),
            creation_time: Some(Utc::now()),
            last_update: Some(Utc::now()),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl NodeProviderTrait for MockNodeProvider {
    async fn create_node(&self, request: &CreateNodeRequest) -> Result<NodeStatus, NodeProviderError> {
        self.check_create(request)?;
        let ng = request.nodegroup.metadata.name.clone().unwrap_or_default();
        let node = self.provisioning(generate_node_name(&ng), &request.nodegroup.spec.instance_imi);
        self.add_node(node.clone());
        Ok(node)
    }

    async fn get_node(&self, name: &str, _cloud_account_id: &str) -> Result<NodeStatus, NodeProviderError> {
        self.nodes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| NodeProviderError::NotFound(format!("instance {name}")))
    }

    async fn get_nodes(&self, nodegroup: &str, _cloud_account_id: &str) -> Result<Vec<NodeStatus>, NodeProviderError> {
        let prefix = format!("{nodegroup}-");
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.name.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn delete_node(&self, name: &str, _cloud_account_id: &str) -> Result<(), NodeProviderError> {
        self.deleted.lock().unwrap().push(name.to_string());
        self.nodes
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| NodeProviderError::NotFound(format!("instance {name}")))
    }

    async fn instance_deletion_timestamp(
        &self,
        name: &str,
        _cloud_account_id: &str,
    ) -> Result<Option<DateTime<Utc>>, NodeProviderError> {
        if !self.nodes.lock().unwrap().contains_key(name) {
            return Err(NodeProviderError::NotFound(format!("instance {name}")));
        }
        Ok(self.deletion_timestamps.lock().unwrap().get(name).copied())
    }

    async fn create_private_instance_group(
        &self,
        request: &CreateNodeRequest,
        _instance_type: &str,
        count: u32,
    ) -> Result<Vec<NodeStatus>, NodeProviderError> {
        self.check_create(request)?;
        let ng = request.nodegroup.metadata.name.clone().unwrap_or_default();
        let group = generate_instance_group_name(&ng);
        self.add_instance_group(&group);

        let members: Vec<NodeStatus> = (0..count)
            .map(|i| self.provisioning(instance_group_member_name(&group, i), &request.nodegroup.spec.instance_imi))
            .collect();
        for member in &members {
            self.add_node(member.clone());
        }
        Ok(members)
    }

    async fn scale_up_instance_group(
        &self,
        request: &CreateNodeRequest,
        instance_group: &str,
        _instance_type: &str,
        count: u32,
    ) -> Result<Vec<NodeStatus>, NodeProviderError> {
        if !self.instance_groups.lock().unwrap().contains(instance_group) {
            return Err(NodeProviderError::NotFound(format!("instance group {instance_group}")));
        }
        self.check_create(request)?;

        let prefix = format!("{instance_group}-");
        let mut next = self
            .nodes
            .lock()
            .unwrap()
            .keys()
            .filter_map(|n| n.strip_prefix(&prefix).and_then(|i| i.parse::<u32>().ok()))
            .max()
            .map_or(0, |i| i + 1);

        let mut members = Vec::new();
        for _ in 0..count {
            let member = self.provisioning(
                instance_group_member_name(instance_group, next),
                &request.nodegroup.spec.instance_imi,
            );
            next += 1;
            self.add_node(member.clone());
            members.push(member);
        }
        Ok(members)
    }

    async fn delete_instance_group_member(
        &self,
        name: &str,
        instance_group: &str,
        _cloud_account_id: &str,
    ) -> Result<(), NodeProviderError> {
        if !self.instance_groups.lock().unwrap().contains(instance_group) {
            return Err(NodeProviderError::NotFound(format!("instance group {instance_group}")));
        }
        self.deleted.lock().unwrap().push(name.to_string());
        self.nodes.lock().unwrap().remove(name);
        Ok(())
    }

    async fn search_instance_group(&self, instance_group: &str, _cloud_account_id: &str) -> Result<bool, NodeProviderError> {
        Ok(self.instance_groups.lock().unwrap().contains(instance_group))
    }

    async fn get_instance_type(&self, name: &str) -> Result<InstanceType, NodeProviderError> {
        self.instance_types
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| NodeProviderError::NotFound(format!("instance type {name}")))
    }

    async fn get_machine_image(&self, name: &str) -> Result<MachineImage, NodeProviderError> {
        self.machine_images
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| NodeProviderError::NotFound(format!("machine image {name}")))
    }
}
