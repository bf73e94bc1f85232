//! Typed access to the per-cluster secret.
//!
//! The secret is named after the cluster and holds the cluster and etcd
//! CAs, the registration commands and a JSON map of machine image to
//! encryption config YAML.

use crate::error::ControllerError;
use crds::NodegroupType;
use kubernetes_provider::{
    CA_CERT_KEY, CA_KEY_KEY, CONTROLPLANE_REGISTRATION_CMD_KEY, ENCRYPTION_CONFIGS_KEY, ETCD_CA_CERT_KEY,
    ETCD_CA_KEY_KEY, WORKER_REGISTRATION_CMD_KEY,
};
use std::collections::BTreeMap;

/// Most encryption configs kept in the secret.
pub const MAX_ENCRYPTION_CONFIGS: usize = 3;

/// Cluster secret data
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClusterSecret {
    data: BTreeMap<String, Vec<u8>>,
}

impl std::fmt::Debug for ClusterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSecret")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ClusterSecret {
    pub fn new(data: BTreeMap<String, Vec<u8>>) -> Self {
        Self { data }
    }

    pub fn into_data(self) -> BTreeMap<String, Vec<u8>> {
        self.data
    }

    pub fn get(&self, key: &str) -> Result<&[u8], ControllerError> {
        self.data
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| ControllerError::InvalidSecret(format!("missing key {}", key)))
    }

    pub fn get_str(&self, key: &str) -> Result<&str, ControllerError> {
        std::str::from_utf8(self.get(key)?)
            .map_err(|e| ControllerError::InvalidSecret(format!("key {} is not UTF-8: {}", key, e)))
    }

    /// Whether the cluster CA is present, i.e. the downstream cluster can be reached.
    #[must_use]
    pub fn has_cluster_ca(&self) -> bool {
        self.data.contains_key(CA_CERT_KEY) && self.data.contains_key(CA_KEY_KEY)
    }

    pub fn ca_cert(&self) -> Result<&[u8], ControllerError> {
        self.get(CA_CERT_KEY)
    }

    pub fn ca_key(&self) -> Result<&[u8], ControllerError> {
        self.get(CA_KEY_KEY)
    }

    pub fn etcd_ca_cert(&self) -> Result<&[u8], ControllerError> {
        self.get(ETCD_CA_CERT_KEY)
    }

    pub fn etcd_ca_key(&self) -> Result<&[u8], ControllerError> {
        self.get(ETCD_CA_KEY_KEY)
    }

    /// Base registration command for a node type.
    pub fn registration_cmd(&self, nodegroup_type: NodegroupType) -> Result<&str, ControllerError> {
        match nodegroup_type {
            NodegroupType::Controlplane => self.get_str(CONTROLPLANE_REGISTRATION_CMD_KEY),
            NodegroupType::Worker => self.get_str(WORKER_REGISTRATION_CMD_KEY),
        }
    }

    /// Encryption config YAML keyed by machine image.
    pub fn encryption_configs(&self) -> Result<BTreeMap<String, String>, ControllerError> {
        serde_json::from_slice(self.get(ENCRYPTION_CONFIGS_KEY)?)
            .map_err(|e| ControllerError::Encryption(format!("unmarshal encryption configs: {}", e)))
    }

    pub fn set_encryption_configs(&mut self, configs: &BTreeMap<String, String>) -> Result<(), ControllerError> {
        let bytes = serde_json::to_vec(configs)
            .map_err(|e| ControllerError::Encryption(format!("marshal encryption configs: {}", e)))?;
        self.data.insert(ENCRYPTION_CONFIGS_KEY.to_string(), bytes);
        Ok(())
    }

    /// Encryption config YAML for one machine image.
    pub fn encryption_config_for(&self, instance_imi: &str) -> Result<String, ControllerError> {
        self.encryption_configs()?.remove(instance_imi).ok_or_else(|| {
            ControllerError::Encryption(format!("no encryption config for instance IMI {}", instance_imi))
        })
    }

    /// Stores `config` under `instance_imi`, evicting the lexicographically
    /// smallest image once more than [`MAX_ENCRYPTION_CONFIGS`] are held.
    pub fn add_encryption_config(&mut self, instance_imi: &str, config: String) -> Result<(), ControllerError> {
        let mut configs = self.encryption_configs()?;
        configs.insert(instance_imi.to_string(), config);
        while configs.len() > MAX_ENCRYPTION_CONFIGS {
            configs.pop_first();
        }
        self.set_encryption_configs(&configs)
    }
}
