//! Kubernetes provider models

use chrono::{DateTime, Duration, Utc};
use crds::ClusterState;
use rand::Rng;
use std::collections::BTreeMap;

/// Cluster CA certificate
pub const CA_CERT_KEY: &str = "ca.crt";
/// Cluster CA key
pub const CA_KEY_KEY: &str = "ca.key";
/// Etcd CA certificate
pub const ETCD_CA_CERT_KEY: &str = "etcd-ca.crt";
/// Etcd CA key
pub const ETCD_CA_KEY_KEY: &str = "etcd-ca.key";
/// Front proxy CA certificate
pub const FRONT_PROXY_CA_CERT_KEY: &str = "front-proxy-ca.crt";
/// Front proxy CA key
pub const FRONT_PROXY_CA_KEY_KEY: &str = "front-proxy-ca.key";
/// Service account signing key
pub const SA_KEY_KEY: &str = "sa.key";
/// Service account public key
pub const SA_PUB_KEY: &str = "sa.pub";
/// JSON map of machine image to encryption config YAML
pub const ENCRYPTION_CONFIGS_KEY: &str = "etcd-encryption-configs";
/// Control-plane registration command
pub const CONTROLPLANE_REGISTRATION_CMD_KEY: &str = "controlplane-registration-cmd";
/// Worker registration command
pub const WORKER_REGISTRATION_CMD_KEY: &str = "worker-registration-cmd";

/// Namespace bootstrap token secrets live in
pub const BOOTSTRAP_TOKEN_NAMESPACE: &str = "kube-system";

/// Lifetime of a bootstrap token
pub const BOOTSTRAP_TOKEN_TTL_MINUTES: i64 = 120;

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Load balancer endpoints of a cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterEndpoints {
    /// Etcd load balancer
    pub etcd_lb: String,
    /// Etcd load balancer port
    pub etcd_lb_port: u16,
    /// Internal API server load balancer
    pub apiserver_lb: String,
    /// Internal API server load balancer port
    pub apiserver_lb_port: u16,
    /// Public API server load balancer
    pub public_apiserver_lb: String,
    /// Public API server load balancer port
    pub public_apiserver_lb_port: u16,
    /// Konnectivity load balancer
    pub konnectivity_lb: String,
}

/// Health of a downstream cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHealth {
    /// Active or Error
    pub state: ClusterState,
    /// `KubernetesNotReady` or `KubernetesNotLived` on failure
    pub reason: String,
    /// Probe error
    pub message: String,
}

impl ClusterHealth {
    /// Healthy cluster
    #[must_use]
    pub fn active() -> Self {
        Self {
            state: ClusterState::Active,
            reason: String::new(),
            message: String::new(),
        }
    }
}

/// A kubeadm-style bootstrap token
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapToken {
    /// Six character id
    pub id: String,
    /// Sixteen character secret
    pub secret: String,
    /// Expiry
    pub expiration: DateTime<Utc>,
}

impl std::fmt::Debug for BootstrapToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapToken")
            .field("id", &self.id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl BootstrapToken {
    /// Generates a random token that expires in [`BOOTSTRAP_TOKEN_TTL_MINUTES`].
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let chars: String = (0..22)
            .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
            .collect();
        Self {
            id: chars[..6].to_string(),
            secret: chars[6..].to_string(),
            expiration: Utc::now() + Duration::minutes(BOOTSTRAP_TOKEN_TTL_MINUTES),
        }
    }

    /// `<id>.<secret>`, as passed to `--bootstrap-token`
    #[must_use]
    pub fn token(&self) -> String {
        format!("{}.{}", self.id, self.secret)
    }

    /// Name of the secret backing the token
    #[must_use]
    pub fn secret_name(&self) -> String {
        format!("bootstrap-token-{}", self.id)
    }

    /// String data of the `bootstrap.kubernetes.io/token` secret
    #[must_use]
    pub fn secret_data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("description".to_string(), "Bootstrap token for worker node registration".to_string()),
            ("token-id".to_string(), self.id.clone()),
            ("token-secret".to_string(), self.secret.clone()),
            ("expiration".to_string(), self.expiration.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            ("usage-bootstrap-authentication".to_string(), "true".to_string()),
            ("usage-bootstrap-signing".to_string(), "true".to_string()),
            ("auth-extra-groups".to_string(), "system:bootstrappers:worker".to_string()),
        ])
    }
}
