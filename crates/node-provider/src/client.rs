//! Compute API client
//!
//! REST client for the compute service that owns instances and instance
//! groups. Paths are scoped by cloud account:
//! `/v1/cloudaccounts/{id}/instances` and `/v1/cloudaccounts/{id}/instancegroups`.

use crate::error::NodeProviderError;
use crate::models::*;
use crate::provider_trait::NodeProviderTrait;
use chrono::{DateTime, Utc};
use crds::{NodeState, NodeStatus, Nodegroup, NodegroupType};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Instance label carrying the owning cluster name
pub const CLUSTER_NAME_LABEL: &str = "iks-cluster-name";
/// Instance label carrying the nodegroup type
pub const NODEGROUP_TYPE_LABEL: &str = "nodegroupType";
/// Instance label carrying the nodegroup name
pub const NODEGROUP_NAME_LABEL: &str = "nodegroup-name";

const NETWORK_INTERFACE_NAME: &str = "eth0";
const SUPERCOMPUTE_CLUSTER_TYPE: &str = "supercompute";

/// Compute API client
#[derive(Debug)]
pub struct ComputeClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceCreateRequest<'a> {
    name: &'a str,
    labels: BTreeMap<&'static str, String>,
    availability_zone: &'a str,
    instance_type: &'a str,
    machine_image: &'a str,
    ssh_public_key_names: &'a [String],
    interfaces: Vec<InterfaceRequest<'a>>,
    user_data: &'a str,
    service_type: &'static str,
    skip_quota_check: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    topology_spread_labels: Option<BTreeMap<&'static str, String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InterfaceRequest<'a> {
    name: &'static str,
    vnet: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceGroupCreateRequest<'a> {
    name: &'a str,
    instance_count: u32,
    instance_spec: InstanceCreateRequest<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceGroupScaleRequest<'a> {
    instance_count: u32,
    instance_spec: InstanceCreateRequest<'a>,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Renders the cloud-init user data executed on first boot.
pub fn render_user_data(registration_cmd: &str, bootstrap_script: &str, user_data_url: Option<&str>) -> String {
    let mut out = String::from("#cloud-config\nwrite_files:\n  - path: /usr/local/bin/bootstrap.sh\n    permissions: '0755'\n    content: |\n");
    for line in bootstrap_script.lines() {
        out.push_str("      ");
        out.push_str(line);
        out.push('\n');
    }
    out.push_str("runcmd:\n");
    if let Some(url) = user_data_url.filter(|u| !u.is_empty()) {
        out.push_str(&format!(
            "  - curl --retry 5 --retry-connrefused --connect-timeout 10 {url} -o /usr/local/bin/user-script.sh\n"
        ));
        out.push_str("  - bash /usr/local/bin/user-script.sh\n");
    }
    out.push_str(&format!("  - {registration_cmd}\n"));
    out
}

fn instance_labels(nodegroup: &Nodegroup) -> BTreeMap<&'static str, String> {
    BTreeMap::from([
        (CLUSTER_NAME_LABEL, nodegroup.spec.cluster_name.clone()),
        (NODEGROUP_TYPE_LABEL, nodegroup.spec.nodegroup_type.as_str().to_string()),
        (NODEGROUP_NAME_LABEL, nodegroup.metadata.name.clone().unwrap_or_default()),
    ])
}

fn instance_spec<'a>(
    request: &'a CreateNodeRequest,
    name: &'a str,
    instance_type: &'a str,
    user_data: &'a str,
) -> Result<InstanceCreateRequest<'a>, NodeProviderError> {
    let nodegroup = &request.nodegroup;
    let vnet = nodegroup
        .spec
        .vnets
        .first()
        .ok_or_else(|| NodeProviderError::InvalidRequest("no vnets found in nodegroup spec".to_string()))?;

    let controlplane = nodegroup.spec.nodegroup_type == NodegroupType::Controlplane;
    let service_type = if nodegroup.spec.cluster_type == SUPERCOMPUTE_CLUSTER_TYPE {
        "SuperComputingAsAService"
    } else {
        "KubernetesAsAService"
    };

    Ok(InstanceCreateRequest {
        name,
        labels: instance_labels(nodegroup),
        availability_zone: &vnet.availability_zone,
        instance_type,
        machine_image: &nodegroup.spec.instance_imi,
        ssh_public_key_names: &nodegroup.spec.ssh_key,
        interfaces: vec![InterfaceRequest {
            name: NETWORK_INTERFACE_NAME,
            vnet: &vnet.network_interface_vnet_name,
        }],
        user_data,
        service_type,
        // Control-plane nodes skip quota and spread across zones
        skip_quota_check: controlplane,
        topology_spread_labels: controlplane.then(|| instance_labels(nodegroup)),
    })
}

fn provisioning_members(instance_group: &str, from: u32, count: u32, imi: &str) -> Vec<NodeStatus> {
    (from..from + count)
        .map(|i| NodeStatus {
            name: instance_group_member_name(instance_group, i),
            instance_imi: imi.to_string(),
            state: NodeState::Updating,
            message: "Provisioning node".to_string(),
            creation_time: Some(Utc::now()),
            last_update: Some(Utc::now()),
            ..Default::default()
        })
        .collect()
}

impl ComputeClient {
    /// Create a new compute client
    ///
    /// # Arguments
    /// * `base_url` - Compute API base URL (e.g., "http://compute-api:8080")
    pub fn new(base_url: impl Into<String>) -> Result<Self, NodeProviderError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn account_url(&self, cloud_account_id: &str, rest: &str) -> String {
        format!(
            "{}/v1/cloudaccounts/{}/{}",
            self.base_url,
            urlencoding::encode(cloud_account_id),
            rest
        )
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<String, NodeProviderError> {
        let response = request.header("Accept", "application/json").send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::NOT_FOUND {
            return Err(NodeProviderError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let parsed: Option<ApiErrorBody> = serde_json::from_str(&body).ok();
            let (code, message) = match parsed {
                Some(err) if !err.message.is_empty() => (err.code, err.message),
                _ => (status.as_u16().to_string(), body),
            };
            return Err(NodeProviderError::Api { code, message });
        }
        Ok(body)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: String, what: &str) -> Result<T, NodeProviderError> {
        debug!("GET {}", url);
        let body = self.send(self.client.get(&url), what).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn get_instance(&self, name: &str, cloud_account_id: &str) -> Result<Instance, NodeProviderError> {
        let url = self.account_url(cloud_account_id, &format!("instances/name/{}", urlencoding::encode(name)));
        self.get_json(url, &format!("instance {name}")).await
    }
}

#[async_trait::async_trait]
impl NodeProviderTrait for ComputeClient {
    async fn create_node(&self, request: &CreateNodeRequest) -> Result<NodeStatus, NodeProviderError> {
        let nodegroup = &request.nodegroup;
        let ng_name = nodegroup.metadata.name.clone().unwrap_or_default();
        let name = generate_node_name(&ng_name);
        let user_data = render_user_data(
            &request.registration_cmd,
            &request.bootstrap_script,
            nodegroup.spec.user_data_url.as_deref(),
        );
        let body = instance_spec(request, &name, &nodegroup.spec.instance_type, &user_data)?;

        let url = self.account_url(&nodegroup.spec.cloud_account_id, "instances");
        debug!("Creating node {} for nodegroup {}", name, ng_name);
        let response = self
            .send(self.client.post(&url).json(&body), &format!("create instance {name}"))
            .await?;
        let instance: Instance = serde_json::from_str(&response)?;
        Ok(instance.to_node_status())
    }

    async fn get_node(&self, name: &str, cloud_account_id: &str) -> Result<NodeStatus, NodeProviderError> {
        Ok(self.get_instance(name, cloud_account_id).await?.to_node_status())
    }

    async fn get_nodes(&self, nodegroup: &str, cloud_account_id: &str) -> Result<Vec<NodeStatus>, NodeProviderError> {
        let selector = format!("{NODEGROUP_NAME_LABEL}={nodegroup}");
        let url = format!(
            "{}?labelSelector={}",
            self.account_url(cloud_account_id, "instances"),
            urlencoding::encode(&selector)
        );
        let list: ItemsResponse<Instance> = self.get_json(url, &format!("instances of {nodegroup}")).await?;
        Ok(list.items.iter().map(Instance::to_node_status).collect())
    }

    async fn delete_node(&self, name: &str, cloud_account_id: &str) -> Result<(), NodeProviderError> {
        let url = self.account_url(cloud_account_id, &format!("instances/name/{}", urlencoding::encode(name)));
        debug!("DELETE {}", url);
        self.send(self.client.delete(&url), &format!("instance {name}")).await?;
        Ok(())
    }

    async fn instance_deletion_timestamp(
        &self,
        name: &str,
        cloud_account_id: &str,
    ) -> Result<Option<DateTime<Utc>>, NodeProviderError> {
        Ok(self.get_instance(name, cloud_account_id).await?.deletion_timestamp)
    }

    async fn create_private_instance_group(
        &self,
        request: &CreateNodeRequest,
        instance_type: &str,
        count: u32,
    ) -> Result<Vec<NodeStatus>, NodeProviderError> {
        let nodegroup = &request.nodegroup;
        let ng_name = nodegroup.metadata.name.clone().unwrap_or_default();
        let group = generate_instance_group_name(&ng_name);
        let user_data = render_user_data(
            &request.registration_cmd,
            &request.bootstrap_script,
            nodegroup.spec.user_data_url.as_deref(),
        );
        let body = InstanceGroupCreateRequest {
            name: &group,
            instance_count: count,
            instance_spec: instance_spec(request, &group, instance_type, &user_data)?,
        };

        let url = self.account_url(&nodegroup.spec.cloud_account_id, "instancegroups");
        debug!("Creating instance group {} with {} instances", group, count);
        self.send(self.client.post(&url).json(&body), &format!("create instance group {group}"))
            .await?;

        Ok(provisioning_members(&group, 0, count, &nodegroup.spec.instance_imi))
    }

    async fn scale_up_instance_group(
        &self,
        request: &CreateNodeRequest,
        instance_group: &str,
        instance_type: &str,
        count: u32,
    ) -> Result<Vec<NodeStatus>, NodeProviderError> {
        let nodegroup = &request.nodegroup;
        let user_data = render_user_data(
            &request.registration_cmd,
            &request.bootstrap_script,
            nodegroup.spec.user_data_url.as_deref(),
        );
        let body = InstanceGroupScaleRequest {
            instance_count: count,
            instance_spec: instance_spec(request, instance_group, instance_type, &user_data)?,
        };

        let url = self.account_url(
            &nodegroup.spec.cloud_account_id,
            &format!("instancegroups/name/{}/scale-up", urlencoding::encode(instance_group)),
        );
        debug!("Scaling up instance group {} by {}", instance_group, count);
        let response = self
            .send(self.client.post(&url).json(&body), &format!("instance group {instance_group}"))
            .await?;
        let created: ItemsResponse<Instance> = serde_json::from_str(&response)?;

        Ok(created
            .items
            .iter()
            .map(|i| NodeStatus {
                state: NodeState::Updating,
                message: "Provisioning node".to_string(),
                ..i.to_node_status()
            })
            .collect())
    }

    async fn delete_instance_group_member(
        &self,
        name: &str,
        instance_group: &str,
        cloud_account_id: &str,
    ) -> Result<(), NodeProviderError> {
        let url = self.account_url(
            cloud_account_id,
            &format!(
                "instancegroups/name/{}/instances/name/{}",
                urlencoding::encode(instance_group),
                urlencoding::encode(name)
            ),
        );
        debug!("DELETE {}", url);
        self.send(self.client.delete(&url), &format!("instance group member {name}"))
            .await?;
        Ok(())
    }

    async fn search_instance_group(&self, instance_group: &str, cloud_account_id: &str) -> Result<bool, NodeProviderError> {
        let url = self.account_url(cloud_account_id, &format!("instancegroups/name/{}", urlencoding::encode(instance_group)));
        match self.get_json::<serde_json::Value>(url, instance_group).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_instance_type(&self, name: &str) -> Result<InstanceType, NodeProviderError> {
        let url = format!("{}/v1/instancetypes/{}", self.base_url, urlencoding::encode(name));
        self.get_json(url, &format!("instance type {name}")).await
    }

    async fn get_machine_image(&self, name: &str) -> Result<MachineImage, NodeProviderError> {
        let url = format!("{}/v1/machineimages/{}", self.base_url, urlencoding::encode(name));
        self.get_json(url, &format!("machine image {name}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{NodegroupSpec, Vnet};

    fn nodegroup(vnets: Vec<Vnet>) -> Nodegroup {
        Nodegroup::new("ng-abc", NodegroupSpec {
            cluster_name: "cl-abc".to_string(),
            nodegroup_type: NodegroupType::Controlplane,
            instance_type: "vm-spr-sml".to_string(),
            instance_imi: "img-1".to_string(),
            vnets,
            ..Default::default()
        })
    }

    fn request(vnets: Vec<Vnet>) -> CreateNodeRequest {
        CreateNodeRequest {
            nodegroup: nodegroup(vnets),
            registration_cmd: "bash /usr/local/bin/bootstrap.sh --ca-cert abc".to_string(),
            bootstrap_script: "#!/bin/bash\necho hi".to_string(),
            network: None,
        }
    }

    #[test]
    fn test_user_data_contains_script_and_command() {
        let rendered = render_user_data("bash /usr/local/bin/bootstrap.sh --x", "#!/bin/bash\necho hi", Some("http://u/s.sh"));
        assert!(rendered.starts_with("#cloud-config"));
        assert!(rendered.contains("      echo hi\n"));
        assert!(rendered.contains("http://u/s.sh -o /usr/local/bin/user-script.sh"));
        assert!(rendered.ends_with("  - bash /usr/local/bin/bootstrap.sh --x\n"));

        let plain = render_user_data("cmd", "", None);
        assert!(!plain.contains("user-script"));
    }

    #[test]
    fn test_instance_spec_requires_vnets() {
        let req = request(vec![]);
        let err = instance_spec(&req, "n", "t", "").unwrap_err();
        assert!(matches!(err, NodeProviderError::InvalidRequest(_)));
    }

    #[test]
    fn test_controlplane_instance_spec_spreads_and_skips_quota() {
        let req = request(vec![Vnet {
            availability_zone: "us-dev-1a".to_string(),
            network_interface_vnet_name: "us-dev-1a-default".to_string(),
        }]);
        let spec = instance_spec(&req, "ng-abc-12345", "vm-spr-sml", "").unwrap();
        assert!(spec.skip_quota_check);
        assert!(spec.topology_spread_labels.is_some());
        assert_eq!(spec.availability_zone, "us-dev-1a");
        assert_eq!(spec.labels[NODEGROUP_NAME_LABEL], "ng-abc");
        assert_eq!(spec.labels[NODEGROUP_TYPE_LABEL], "controlplane");
    }

    #[test]
    fn test_provisioning_members_are_numbered() {
        let members = provisioning_members("ng-abc-ig-12345", 2, 2, "img");
        let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["ng-abc-ig-12345-2", "ng-abc-ig-12345-3"]);
        assert!(members.iter().all(|m| m.state == NodeState::Updating));
    }
}
