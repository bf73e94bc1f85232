//! Etcd envelope-encryption configuration.
//!
//! Control-plane nodes receive an API server `EncryptionConfiguration`
//! with an `aescbc` provider followed by `identity`. A new cluster starts
//! with two keys so that nodes created during a later rolling upgrade can
//! switch to the second key while older nodes can still decrypt with it.

use crate::error::ControllerError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

pub const ENCRYPTION_CONFIG_API_VERSION: &str = "apiserver.config.k8s.io/v1";
pub const ENCRYPTION_CONFIG_KIND: &str = "EncryptionConfiguration";

/// Random bytes per key.
pub const KEY_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfiguration {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub resources: Vec<ResourceConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfiguration {
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub providers: Vec<ProviderConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aescbc: Option<AesConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AesConfiguration {
    #[serde(default)]
    pub keys: Vec<EncryptionKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IdentityConfiguration {}

/// Named AES key; `secret` is base64.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub name: String,
    pub secret: String,
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey").field("name", &self.name).finish_non_exhaustive()
    }
}

impl EncryptionKey {
    /// Fresh key with [`KEY_SECRET_BYTES`] random bytes, named after `at`.
    pub fn generate(at: DateTime<Utc>) -> Self {
        let mut secret = [0u8; KEY_SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut secret);
        Self {
            name: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            secret: STANDARD.encode(secret),
        }
    }
}

impl EncryptionConfiguration {
    /// Secrets encrypted with `keys` (first key encrypts), identity as fallback.
    pub fn with_keys(keys: Vec<EncryptionKey>) -> Self {
        Self {
            api_version: ENCRYPTION_CONFIG_API_VERSION.to_string(),
            kind: ENCRYPTION_CONFIG_KIND.to_string(),
            resources: vec![ResourceConfiguration {
                resources: vec!["secrets".to_string()],
                providers: vec![
                    ProviderConfiguration {
                        aescbc: Some(AesConfiguration { keys }),
                        identity: None,
                    },
                    ProviderConfiguration {
                        aescbc: None,
                        identity: Some(IdentityConfiguration {}),
                    },
                ],
            }],
        }
    }

    /// Configuration for a new cluster. The second key is named five
    /// minutes after the first so the two names never collide.
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self::with_keys(vec![
            EncryptionKey::generate(now),
            EncryptionKey::generate(now + Duration::minutes(5)),
        ])
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ControllerError> {
        serde_yaml::from_str(contents)
            .map_err(|e| ControllerError::Encryption(format!("unmarshal encryption configuration: {}", e)))
    }

    pub fn to_yaml(&self) -> Result<String, ControllerError> {
        serde_yaml::to_string(self)
            .map_err(|e| ControllerError::Encryption(format!("marshal encryption configuration: {}", e)))
    }

    /// Keys of the first provider of the first resource.
    pub fn aescbc_keys(&self) -> Result<&[EncryptionKey], ControllerError> {
        let resource = self
            .resources
            .first()
            .ok_or_else(|| ControllerError::Encryption("there are no resources in encryption config".to_string()))?;
        let provider = resource
            .providers
            .first()
            .ok_or_else(|| ControllerError::Encryption("there are no providers in encryption config".to_string()))?;
        provider
            .aescbc
            .as_ref()
            .map(|aes| aes.keys.as_slice())
            .ok_or_else(|| ControllerError::Encryption("first provider is not aescbc".to_string()))
    }
}

/// Rotates a key ring to `[keys[1], new_key, keys[0]]`.
///
/// Keys past the second are dropped, so the key pushed to the third slot
/// is the next one to go.
pub fn rotate_keys(keys: &[EncryptionKey], new_key: EncryptionKey) -> Result<Vec<EncryptionKey>, ControllerError> {
    match keys {
        [first, second, ..] => Ok(vec![second.clone(), new_key, first.clone()]),
        _ => Err(ControllerError::Encryption(format!(
            "at least 2 keys are required to rotate, found {}",
            keys.len()
        ))),
    }
}

/// Rotates the keys of a YAML encryption config and returns the new YAML.
pub fn rotate_encryption_config(current: &str, new_key: EncryptionKey) -> Result<String, ControllerError> {
    let config = EncryptionConfiguration::from_yaml(current)?;
    let rotated = rotate_keys(config.aescbc_keys()?, new_key)?;
    EncryptionConfiguration::with_keys(rotated).to_yaml()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(name: &str) -> EncryptionKey {
        EncryptionKey {
            name: name.to_string(),
            secret: format!("secret-{name}"),
        }
    }

    #[test]
    fn test_rotate_two_keys() {
        let rotated = rotate_keys(&[key("k0"), key("k1")], key("new")).unwrap();
        assert_eq!(rotated, vec![key("k1"), key("new"), key("k0")]);
    }

    #[test]
    fn test_rotate_three_keys_drops_last() {
        let rotated = rotate_keys(&[key("k0"), key("k1"), key("k2")], key("new")).unwrap();
        assert_eq!(rotated.len(), 3);
        assert_eq!(rotated[0], key("k1"));
        assert_eq!(rotated[1], key("new"));
        assert_eq!(rotated[2], key("k0"));
    }

    #[test]
    fn test_rotate_requires_two_keys() {
        assert!(rotate_keys(&[key("k0")], key("new")).is_err());
        assert!(rotate_keys(&[], key("new")).is_err());
    }

    #[test]
    fn test_initial_config_round_trips_through_yaml() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let config = EncryptionConfiguration::initial(now);
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("apiVersion: apiserver.config.k8s.io/v1"));
        assert!(yaml.contains("kind: EncryptionConfiguration"));
        assert!(yaml.contains("identity: {}"));

        let parsed = EncryptionConfiguration::from_yaml(&yaml).unwrap();
        let keys = parsed.aescbc_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].name, "2024-03-01T12:00:00Z");
        assert_eq!(keys[1].name, "2024-03-01T12:05:00Z");
        assert_eq!(STANDARD.decode(&keys[0].secret).unwrap().len(), KEY_SECRET_BYTES);
        assert_ne!(keys[0].secret, keys[1].secret);
    }

    #[test]
    fn test_rotate_encryption_config() {
        let yaml = EncryptionConfiguration::with_keys(vec![key("k0"), key("k1")]).to_yaml().unwrap();
        let rotated = rotate_encryption_config(&yaml, key("new")).unwrap();
        let parsed = EncryptionConfiguration::from_yaml(&rotated).unwrap();
        let names: Vec<&str> = parsed.aescbc_keys().unwrap().iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["k1", "new", "k0"]);
    }

    #[test]
    fn test_config_without_providers_is_rejected() {
        let yaml = "apiVersion: apiserver.config.k8s.io/v1\nkind: EncryptionConfiguration\nresources:\n- resources: [secrets]\n  providers: []\n";
        let err = rotate_encryption_config(yaml, key("new")).unwrap_err();
        assert!(err.to_string().contains("no providers"));
    }
}
