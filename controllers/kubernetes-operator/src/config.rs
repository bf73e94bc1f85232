//! Operator configuration.
//!
//! Structured options come from an optional YAML file named by
//! `OPERATOR_CONFIG_FILE`; endpoints and the watch namespace can be
//! overridden from the environment.

use crate::error::ControllerError;
use kubernetes_provider::KubernetesProviderConfig;
use node_provider::NodeProviderConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use storage_provider::StorageProviderConfig;

/// Cores given to the weka client when the instance type has no entry.
pub const DEFAULT_WEKA_NUM_CORES: &str = "4";

/// How many control-plane nodes must stay `Active` after a removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuorumPolicy {
    /// At least one active node must remain
    #[default]
    Floor,
    /// A strict majority of the group must remain
    Majority,
}

impl QuorumPolicy {
    /// Active nodes required for a control plane of `size` members.
    #[must_use]
    pub fn required_active(self, size: usize) -> usize {
        match self {
            QuorumPolicy::Floor => 1,
            QuorumPolicy::Majority => (size + 2) / 2,
        }
    }
}

/// Weka client settings for worker nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WekaConfig {
    /// Client cores per instance type
    pub instance_types: BTreeMap<String, String>,
    /// Client software version
    pub software_version: String,
    /// Agent download URL
    pub cluster_url: String,
}

impl WekaConfig {
    /// Cores for an instance type, falling back to [`DEFAULT_WEKA_NUM_CORES`].
    #[must_use]
    pub fn num_cores(&self, instance_type: &str) -> &str {
        self.instance_types
            .get(instance_type)
            .map_or(DEFAULT_WEKA_NUM_CORES, String::as_str)
    }
}

/// Node log shipping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub host: String,
    pub user: String,
    pub password: String,
    /// Static `key=value` pairs prepended to the per-cluster enrichment
    pub enrichment: BTreeMap<String, String>,
}

impl LoggingConfig {
    /// Renders the enrichment list passed with `--logging-enrichment`.
    ///
    /// Static pairs come first, then `values` in the given order.
    #[must_use]
    pub fn enrich_string(&self, values: &[(&str, &str)]) -> String {
        self.enrichment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .chain(values.iter().map(|(k, v)| format!("{k}={v}")))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Prometheus remote-write target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrometheusRemoteWrite {
    pub url: String,
    pub username: String,
    pub password: String,
    pub bearer_token: String,
}

/// Node metrics shipping. Nothing is passed to nodes unless `enabled`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub system_metrics: Option<PrometheusRemoteWrite>,
    pub end_user_metrics: Option<PrometheusRemoteWrite>,
}

/// Control-plane iptables settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IptablesConfig {
    pub enabled: bool,
    pub cidr: String,
}

/// Operator configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Namespace to watch; `None` means `default`
    #[serde(skip)]
    pub watch_namespace: Option<String>,
    pub monitor_periodicity_seconds: u64,
    pub monitor_grace_period_seconds: u64,
    /// Reconciles running at once per resource kind
    pub max_concurrent_reconciles: u16,
    /// Grace period overrides keyed by an instance-type substring
    pub monitor_grace_period_by_instance_type: BTreeMap<String, u64>,
    pub node_provider_url: String,
    pub storage_provider_url: String,
    pub weka: WekaConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub iptables: IptablesConfig,
    pub quorum_policy: QuorumPolicy,
    pub etcd_snapshot_periodicity_seconds: u64,
    pub etcd_snapshot_dir: PathBuf,
    pub storage_recreate_grace_period_seconds: u64,
    pub metrics_bind_address: String,
    pub controlplane_bootstrap_script: PathBuf,
    pub worker_bootstrap_script: PathBuf,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        let kubernetes = KubernetesProviderConfig::default();
        Self {
            watch_namespace: None,
            monitor_periodicity_seconds: 30,
            monitor_grace_period_seconds: 600,
            max_concurrent_reconciles: 3,
            monitor_grace_period_by_instance_type: BTreeMap::new(),
            node_provider_url: NodeProviderConfig::default().compute_url,
            storage_provider_url: StorageProviderConfig::default().storage_url,
            weka: WekaConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            iptables: IptablesConfig::default(),
            quorum_policy: QuorumPolicy::Floor,
            etcd_snapshot_periodicity_seconds: 3600,
            etcd_snapshot_dir: PathBuf::from("/var/lib/kaas/snapshots"),
            storage_recreate_grace_period_seconds: 1800,
            metrics_bind_address: "0.0.0.0:8080".to_string(),
            controlplane_bootstrap_script: kubernetes.controlplane_bootstrap_script,
            worker_bootstrap_script: kubernetes.worker_bootstrap_script,
        }
    }
}

impl OperatorConfig {
    /// Loads the YAML file named by `OPERATOR_CONFIG_FILE`, if any, then
    /// applies environment overrides.
    pub fn load() -> Result<Self, ControllerError> {
        let mut config = match env::var("OPERATOR_CONFIG_FILE") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    /// Parses a YAML configuration file.
    pub fn from_file(path: &str) -> Result<Self, ControllerError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ControllerError::InvalidConfig(format!("Failed to read {}: {}", path, e)))?;
        Self::from_yaml(&contents)
    }

    /// Parses YAML configuration; missing keys keep their defaults.
    pub fn from_yaml(contents: &str) -> Result<Self, ControllerError> {
        serde_yaml::from_str(contents)
            .map_err(|e| ControllerError::InvalidConfig(format!("Invalid operator config: {}", e)))
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ns) = lookup("WATCH_NAMESPACE") {
            self.watch_namespace = Some(ns);
        }
        if let Some(url) = lookup("NODE_PROVIDER_URL") {
            self.node_provider_url = url;
        }
        if let Some(url) = lookup("STORAGE_PROVIDER_URL") {
            self.storage_provider_url = url;
        }
        if let Some(addr) = lookup("METRICS_BIND_ADDRESS") {
            self.metrics_bind_address = addr;
        }
    }

    pub fn monitor_periodicity(&self) -> Duration {
        Duration::from_secs(self.monitor_periodicity_seconds)
    }

    pub fn etcd_snapshot_periodicity(&self) -> Duration {
        Duration::from_secs(self.etcd_snapshot_periodicity_seconds)
    }

    pub fn storage_recreate_grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.storage_recreate_grace_period_seconds).unwrap_or(i64::MAX))
    }

    /// Grace period a node may spend `Updating` before it is replaced.
    ///
    /// The longest instance-type key contained in `instance_type`
    /// (case-insensitive) wins over the default.
    #[must_use]
    pub fn monitor_grace_period(&self, instance_type: &str) -> chrono::Duration {
        let instance_type = instance_type.to_lowercase();
        let seconds = self
            .monitor_grace_period_by_instance_type
            .iter()
            .filter(|(key, _)| instance_type.contains(&key.to_lowercase()))
            .max_by_key(|(key, _)| key.len())
            .map_or(self.monitor_grace_period_seconds, |(_, secs)| *secs);
        chrono::Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
    }

    pub fn node_provider_config(&self) -> NodeProviderConfig {
        NodeProviderConfig {
            compute_url: self.node_provider_url.clone(),
        }
    }

    pub fn storage_provider_config(&self) -> StorageProviderConfig {
        StorageProviderConfig {
            storage_url: self.storage_provider_url.clone(),
        }
    }

    pub fn kubernetes_provider_config(&self) -> KubernetesProviderConfig {
        KubernetesProviderConfig {
            controlplane_bootstrap_script: self.controlplane_bootstrap_script.clone(),
            worker_bootstrap_script: self.worker_bootstrap_script.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_overrides_defaults() {
        let config = OperatorConfig::from_yaml(
            r#"
monitorPeriodicitySeconds: 10
monitorGracePeriodByInstanceType:
  bm-icp-gaudi2: 3600
weka:
  instanceTypes:
    bm-spr: "8"
  softwareVersion: "4.2.1"
quorumPolicy: majority
logging:
  enabled: true
  host: logs.example
"#,
        )
        .unwrap();

        assert_eq!(config.monitor_periodicity(), Duration::from_secs(10));
        assert_eq!(config.monitor_grace_period_seconds, 600);
        assert_eq!(config.quorum_policy, QuorumPolicy::Majority);
        assert_eq!(config.weka.num_cores("bm-spr"), "8");
        assert_eq!(config.weka.num_cores("vm-spr-sml"), DEFAULT_WEKA_NUM_CORES);
        assert!(config.logging.enabled);
        assert_eq!(config.storage_recreate_grace_period_seconds, 1800);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = OperatorConfig::default();
        config.apply_env(|key| match key {
            "WATCH_NAMESPACE" => Some("kaas".to_string()),
            "NODE_PROVIDER_URL" => Some("http://compute:9000".to_string()),
            _ => None,
        });
        assert_eq!(config.watch_namespace.as_deref(), Some("kaas"));
        assert_eq!(config.node_provider_config().compute_url, "http://compute:9000");
        assert_eq!(config.storage_provider_url, "http://storage-api:8080");
    }

    #[test]
    fn test_grace_period_longest_match_wins() {
        let mut config = OperatorConfig::default();
        config.monitor_grace_period_by_instance_type.insert("bm".to_string(), 1200);
        config.monitor_grace_period_by_instance_type.insert("BM-ICP-Gaudi2".to_string(), 3600);

        assert_eq!(config.monitor_grace_period("bm-icp-gaudi2-cluster-4").num_seconds(), 3600);
        assert_eq!(config.monitor_grace_period("bm-spr").num_seconds(), 1200);
        assert_eq!(config.monitor_grace_period("vm-spr-sml").num_seconds(), 600);
    }

    #[test]
    fn test_quorum_policy_thresholds() {
        assert_eq!(QuorumPolicy::Floor.required_active(3), 1);
        assert_eq!(QuorumPolicy::Majority.required_active(3), 2);
        assert_eq!(QuorumPolicy::Majority.required_active(4), 3);
        assert_eq!(QuorumPolicy::Majority.required_active(5), 3);
    }

    #[test]
    fn test_enrich_string_order() {
        let logging = LoggingConfig {
            enrichment: BTreeMap::from([("ENV".to_string(), "prod".to_string())]),
            ..Default::default()
        };
        assert_eq!(
            logging.enrich_string(&[("CLUSTER_ID", "cl-1"), ("CLUSTER_REGION", "us-1")]),
            "ENV=prod,CLUSTER_ID=cl-1,CLUSTER_REGION=us-1"
        );
    }
}
