//! Count arithmetic for plain and instance-group nodegroups.
//!
//! Instance-group members are named `<group>-<index>`, so the group a node
//! belongs to is its name minus the last dash segment.

use crate::error::ControllerError;
use crds::{NodeStatus, Nodegroup};
use std::collections::BTreeMap;

/// Name of a provider-side instance group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceGroupName(String);

impl InstanceGroupName {
    /// Group of an instance-group member, e.g. `ng-abc-ig-12345-0` -> `ng-abc-ig-12345`.
    pub fn from_node_name(node_name: &str) -> Self {
        let group = node_name.rsplit_once('-').map_or(node_name, |(group, _)| group);
        Self(group.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `node_name` is a member of this group.
    pub fn contains(&self, node_name: &str) -> bool {
        node_name
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }
}

impl std::fmt::Display for InstanceGroupName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Splits `bm-icp-gaudi2-cluster-4` into the member instance type and group size.
pub fn parse_instance_group_type(instance_type: &str) -> Result<(String, u32), ControllerError> {
    let invalid = || ControllerError::InvalidConfig(format!("invalid instance group type {}", instance_type));
    let (rest, count) = instance_type.rsplit_once('-').ok_or_else(invalid)?;
    let count: u32 = count.parse().map_err(|_| invalid())?;
    let (member_type, _) = rest.rsplit_once('-').ok_or_else(invalid)?;
    if member_type.is_empty() {
        return Err(invalid());
    }
    Ok((member_type.to_string(), count))
}

/// Members per instance group, keyed by group name.
pub fn instance_group_members(nodes: &[NodeStatus]) -> BTreeMap<InstanceGroupName, usize> {
    let mut groups = BTreeMap::new();
    for node in nodes {
        *groups.entry(InstanceGroupName::from_node_name(&node.name)).or_insert(0) += 1;
    }
    groups
}

pub fn count_instance_groups(nodes: &[NodeStatus]) -> usize {
    instance_group_members(nodes).len()
}

/// Observed units: instance groups for instance-group nodegroups, nodes otherwise.
pub fn current_count(nodegroup: &Nodegroup, nodes: &[NodeStatus]) -> usize {
    if nodegroup.is_instance_group() {
        count_instance_groups(nodes)
    } else {
        nodes.len()
    }
}

fn desired_count(nodegroup: &Nodegroup) -> usize {
    usize::try_from(nodegroup.spec.count).unwrap_or(0)
}

/// Units to create.
pub fn missing_count(nodegroup: &Nodegroup, nodes: &[NodeStatus]) -> usize {
    desired_count(nodegroup).saturating_sub(current_count(nodegroup, nodes))
}

/// Units to remove.
pub fn extra_count(nodegroup: &Nodegroup, nodes: &[NodeStatus]) -> usize {
    current_count(nodegroup, nodes).saturating_sub(desired_count(nodegroup))
}

/// Groups with fewer members than the group size encoded in the instance type.
pub fn instance_group_shortfalls(
    nodes: &[NodeStatus],
    group_size: u32,
) -> Vec<(InstanceGroupName, u32)> {
    instance_group_members(nodes)
        .into_iter()
        .filter_map(|(group, members)| {
            let members = u32::try_from(members).unwrap_or(u32::MAX);
            (members < group_size).then(|| (group, group_size - members))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_node, create_test_nodegroup};
    use crds::{NodeState, NodegroupType};

    fn nodes(names: &[&str]) -> Vec<NodeStatus> {
        names
            .iter()
            .map(|n| create_test_node(n, "", "imi-a", NodeState::Active))
            .collect()
    }

    #[test]
    fn test_parse_instance_group_type() {
        assert_eq!(
            parse_instance_group_type("bm-icp-gaudi2-cluster-4").unwrap(),
            ("bm-icp-gaudi2".to_string(), 4)
        );
        assert!(parse_instance_group_type("bm-icp-gaudi2-cluster-x").is_err());
        assert!(parse_instance_group_type("4").is_err());
    }

    #[test]
    fn test_instance_group_membership_is_prefix_with_dash() {
        let group = InstanceGroupName::from_node_name("ng-abc-ig-12345-0");
        assert_eq!(group.as_str(), "ng-abc-ig-12345");
        assert!(group.contains("ng-abc-ig-12345-7"));
        assert!(!group.contains("ng-abc-ig-123456-0"));
        assert!(!group.contains("ng-abc-ig-12345"));
    }

    #[test]
    fn test_counts_for_instance_groups() {
        let ng = create_test_nodegroup("ng-abc", "cl-abc", NodegroupType::Worker, 3, "bm-icp-gaudi2-cluster-2", "imi-a");
        let current = nodes(&["ng-abc-ig-aaaaa-0", "ng-abc-ig-aaaaa-1", "ng-abc-ig-bbbbb-0"]);
        assert_eq!(current_count(&ng, &current), 2);
        assert_eq!(missing_count(&ng, &current), 1);
        assert_eq!(extra_count(&ng, &current), 0);

        let shortfalls = instance_group_shortfalls(&current, 2);
        assert_eq!(shortfalls, vec![(InstanceGroupName::from_node_name("ng-abc-ig-bbbbb-0"), 1)]);
    }

    #[test]
    fn test_counts_for_plain_nodes() {
        let ng = create_test_nodegroup("ng-abc", "cl-abc", NodegroupType::Worker, 1, "vm-spr-sml", "imi-a");
        let current = nodes(&["ng-abc-aaaaa", "ng-abc-bbbbb", "ng-abc-ccccc"]);
        assert_eq!(current_count(&ng, &current), 3);
        assert_eq!(missing_count(&ng, &current), 0);
        assert_eq!(extra_count(&ng, &current), 2);
    }
}
