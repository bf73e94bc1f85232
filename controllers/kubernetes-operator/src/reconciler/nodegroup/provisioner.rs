//! Node creation and registration commands.
//!
//! Every new instance receives a registration command: the cluster's base
//! command for its role followed by role specific flags. Control-plane nodes
//! get etcd bootstrap, encryption, iptables, logging and metrics flags.
//! Workers get a fresh bootstrap token, storage client flags and kubelet
//! labels.

use super::super::Reconciler;
use super::NodegroupProviders;
use super::labels::worker_node_labels;
use super::scaling::{instance_group_shortfalls, parse_instance_group_type};
use crate::cluster_secret::ClusterSecret;
use crate::error::ControllerError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use crds::{Cluster, NodeStatus, Nodegroup, NodegroupStatus};
use kubernetes_provider::BootstrapToken;
use node_provider::CreateNodeRequest;
use tracing::{debug, info, warn};

/// Port etcd peers listen on.
pub const ETCD_PEER_PORT: u16 = 2380;

/// `ip=https://ip:2380` for every known node, comma separated.
pub fn initial_cluster(nodes: &[NodeStatus]) -> String {
    nodes
        .iter()
        .map(|n| format!("{ip}=https://{ip}:{ETCD_PEER_PORT}", ip = n.ip_address))
        .collect::<Vec<_>>()
        .join(",")
}

/// Renders a creation failure the way it is surfaced in `status.message`.
pub fn provisioning_error_message(error: &ControllerError) -> String {
    let (code, message) = match error {
        ControllerError::NodeProvider(e) => (e.code().to_string(), e.message()),
        other => ("Unknown".to_string(), other.to_string()),
    };
    serde_json::json!({ "errorCode": code, "message": message }).to_string()
}

impl Reconciler {
    /// Creates `count` nodes, or instance groups for instance-group nodegroups.
    ///
    /// Created nodes are appended to `status` as they succeed. On failure the
    /// provider error is written to `status.message` and returned.
    pub(crate) async fn create_nodes(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
        status: &mut NodegroupStatus,
        count: usize,
    ) -> Result<(), ControllerError> {
        let result = self.provision_nodes(nodegroup, providers, status, count).await;
        if let Err(e) = &result {
            warn!("Failed to create nodes for nodegroup {}: {}", status.name, e);
            status.message = provisioning_error_message(e);
        }
        status.count = i32::try_from(status.nodes.len()).unwrap_or(i32::MAX);
        result
    }

    /// Adds the missing members of every incomplete instance group.
    pub(crate) async fn scale_up_instance_groups(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
        status: &mut NodegroupStatus,
    ) -> Result<(), ControllerError> {
        let result = self.scale_up(nodegroup, providers, status).await;
        if let Err(e) = &result {
            warn!("Failed to scale up instance groups of {}: {}", status.name, e);
            status.message = provisioning_error_message(e);
        }
        status.count = i32::try_from(status.nodes.len()).unwrap_or(i32::MAX);
        result
    }

    async fn provision_nodes(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
        status: &mut NodegroupStatus,
        count: usize,
    ) -> Result<(), ControllerError> {
        let secret = cluster_secret(nodegroup, providers)?;
        let base_cmd = secret.registration_cmd(nodegroup.spec.nodegroup_type)?;
        let bootstrap_script = providers
            .kubernetes
            .get_bootstrap_script(nodegroup.spec.nodegroup_type)
            .await?;

        if nodegroup.is_controlplane() {
            info!("Provisioning controlplane node");
            let registration_cmd = self.controlplane_registration_cmd(nodegroup, providers, secret, base_cmd, &status.nodes)?;
            let request = create_request(nodegroup, registration_cmd, &bootstrap_script);
            let node = providers.node.create_node(&request).await?;
            info!("Created controlplane node {}", node.name);
            status.nodes.push(node);
            return Ok(());
        }

        let group = nodegroup
            .is_instance_group()
            .then(|| parse_instance_group_type(&nodegroup.spec.instance_type))
            .transpose()?;
        for _ in 0..count {
            let registration_cmd = self.worker_registration_cmd(nodegroup, providers, base_cmd).await?;
            let request = create_request(nodegroup, registration_cmd, &bootstrap_script);
            match &group {
                Some((member_type, size)) => {
                    info!("Provisioning worker instance group of {} {}", size, member_type);
                    let members = providers
                        .node
                        .create_private_instance_group(&request, member_type, *size)
                        .await?;
                    status.nodes.extend(members);
                }
                None => {
                    info!("Provisioning worker node");
                    let node = providers.node.create_node(&request).await?;
                    status.nodes.push(node);
                }
            }
        }
        Ok(())
    }

    async fn scale_up(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
        status: &mut NodegroupStatus,
    ) -> Result<(), ControllerError> {
        let (member_type, size) = parse_instance_group_type(&nodegroup.spec.instance_type)?;
        let shortfalls = instance_group_shortfalls(&status.nodes, size);
        if shortfalls.is_empty() {
            return Ok(());
        }

        let secret = cluster_secret(nodegroup, providers)?;
        let base_cmd = secret.registration_cmd(nodegroup.spec.nodegroup_type)?;
        let bootstrap_script = providers
            .kubernetes
            .get_bootstrap_script(nodegroup.spec.nodegroup_type)
            .await?;

        for (group, missing) in shortfalls {
            info!("Scaling up instance group {} by {}", group, missing);
            let registration_cmd = self.worker_registration_cmd(nodegroup, providers, base_cmd).await?;
            let request = create_request(nodegroup, registration_cmd, &bootstrap_script);
            let members = providers
                .node
                .scale_up_instance_group(&request, group.as_str(), &member_type, missing)
                .await?;
            status.nodes.extend(members);
        }
        Ok(())
    }

    /// Registration command for a control-plane node joining `nodes`.
    pub(crate) fn controlplane_registration_cmd(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
        secret: &ClusterSecret,
        base_cmd: &str,
        nodes: &[NodeStatus],
    ) -> Result<String, ControllerError> {
        let encryption_config = secret.encryption_config_for(&nodegroup.spec.instance_imi)?;

        let mut cmd = base_cmd.to_string();
        let cluster_state = if nodes.is_empty() {
            "new"
        } else {
            cmd.push_str(&format!(" --etcd-initial-cluster {}", initial_cluster(nodes)));
            "existing"
        };
        cmd.push_str(&format!(" --etcd-cluster-state {cluster_state}"));
        cmd.push_str(&format!(" --etcd-encryption-config {}", STANDARD.encode(encryption_config)));
        cmd.push_str(&format!(" --iptables-enabled {}", self.config.iptables.enabled));
        cmd.push_str(&format!(" --iptables-cidr {}", self.config.iptables.cidr));
        cmd.push_str(&self.logging_flags(nodegroup, providers.cluster.as_ref()));
        cmd.push_str(&self.metrics_flags(nodegroup, providers.cluster.as_ref()));
        Ok(cmd)
    }

    /// Registration command for one worker, minting its bootstrap token.
    pub(crate) async fn worker_registration_cmd(
        &self,
        nodegroup: &Nodegroup,
        providers: &NodegroupProviders,
        base_cmd: &str,
    ) -> Result<String, ControllerError> {
        let token = BootstrapToken::generate();
        providers.kubernetes.create_bootstrap_token_secret(&token).await?;

        let spec = &nodegroup.spec;
        let num_cores = self.config.weka.num_cores(&spec.instance_type);
        let mode = if !spec.instance_type.contains("vm") && spec.weka_storage.enable {
            "enable"
        } else {
            "disable"
        };
        debug!(
            "Weka configuration for {}: {} cores, mode {}",
            spec.instance_type, num_cores, mode
        );

        let mut cmd = format!(
            "{base_cmd} --bootstrap-token {} --storage-weka-num-cores {num_cores} --storage-weka-mode {mode} \
             --storage-weka-sw-version {} --storage-agent-url {}",
            token.token(),
            self.config.weka.software_version,
            self.config.weka.cluster_url,
        );
        let labels = self.node_labels(nodegroup, providers).await;
        if !labels.is_empty() {
            cmd.push_str(&format!(" --kubelet-node-labels {labels}"));
        }
        Ok(cmd)
    }

    /// Kubelet labels from instance type and machine image metadata.
    ///
    /// Lookup failures only cost the labels they would have produced.
    async fn node_labels(&self, nodegroup: &Nodegroup, providers: &NodegroupProviders) -> String {
        let instance_type = match providers.node.get_instance_type(&nodegroup.spec.instance_type).await {
            Ok(it) => Some(it),
            Err(e) => {
                warn!("Failed to get instance type {}: {}", nodegroup.spec.instance_type, e);
                None
            }
        };
        let image = match providers.node.get_machine_image(&nodegroup.spec.instance_imi).await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("Failed to get machine image {}: {}", nodegroup.spec.instance_imi, e);
                None
            }
        };
        worker_node_labels(instance_type.as_ref(), image.as_ref())
    }

    /// Log shipping flags. Without the cluster there is nothing to enrich with.
    pub(crate) fn logging_flags(&self, nodegroup: &Nodegroup, cluster: Option<&Cluster>) -> String {
        let logging = &self.config.logging;
        if !logging.enabled {
            return " --logging-enabled false".to_string();
        }
        let Some(cluster) = cluster else {
            warn!("Cluster {} not found, logging will be disabled", nodegroup.spec.cluster_name);
            return " --logging-enabled false".to_string();
        };

        let enrichment = logging.enrich_string(&[
            ("CLOUD_ACCOUNT_ID", nodegroup.spec.cloud_account_id.as_str()),
            ("CUSTOMER_CLOUD_ACCOUNT_ID", cluster.spec.customer_cloud_account_id.as_str()),
            ("CLUSTER_ID", nodegroup.spec.cluster_name.as_str()),
            ("CLUSTER_REGION", nodegroup.spec.region.as_str()),
        ]);
        format!(
            " --logging-enabled true --logging-host {} --logging-user {} --logging-password {} --logging-enrichment {}",
            logging.host, logging.user, logging.password, enrichment
        )
    }

    /// Metrics shipping flags.
    pub(crate) fn metrics_flags(&self, nodegroup: &Nodegroup, cluster: Option<&Cluster>) -> String {
        let metrics = &self.config.metrics;
        if !metrics.enabled {
            return String::new();
        }
        let Some(cluster) = cluster else {
            warn!("Cluster {} not found, metrics will be disabled", nodegroup.spec.cluster_name);
            return String::new();
        };

        let mut flags = format!(
            " --region {} --cloudaccount {}",
            nodegroup.spec.region, cluster.spec.customer_cloud_account_id
        );
        if let Some(system) = &metrics.system_metrics {
            flags.push_str(" --system-metrics-enabled true");
            flags.push_str(&format!(" --system-metrics-prometheus-url {}", system.url));
            if !system.username.is_empty() {
                flags.push_str(&format!(
                    " --system-metrics-prometheus-username {} --system-metrics-prometheus-password {}",
                    system.username, system.password
                ));
            }
        }
        if let Some(end_user) = &metrics.end_user_metrics {
            flags.push_str(" --end-user-metrics-enabled true");
            flags.push_str(&format!(" --end-user-metrics-prometheus-url {}", end_user.url));
            if !end_user.bearer_token.is_empty() {
                flags.push_str(&format!(
                    " --end-user-metrics-prometheus-bearer-token {}",
                    end_user.bearer_token
                ));
            }
        }
        flags
    }
}

fn cluster_secret<'a>(nodegroup: &Nodegroup, providers: &'a NodegroupProviders) -> Result<&'a ClusterSecret, ControllerError> {
    providers.secret.as_ref().ok_or_else(|| {
        ControllerError::InvalidSecret(format!("cluster secret {} not found", nodegroup.spec.cluster_name))
    })
}

fn create_request(nodegroup: &Nodegroup, registration_cmd: String, bootstrap_script: &str) -> CreateNodeRequest {
    CreateNodeRequest {
        nodegroup: nodegroup.clone(),
        registration_cmd,
        bootstrap_script: bootstrap_script.to_string(),
        network: None,
    }
}

#[cfg(test)]
#[path = "provisioner_test.rs"]
mod provisioner_test;
