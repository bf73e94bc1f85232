//! Cluster initialisation
//!
//! Generates the cluster PKI and the registration commands control-plane
//! and worker nodes run on first boot.

use crate::error::KubernetesProviderError;
use crate::models::*;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{Duration, Utc};
use crds::Cluster;
use pki::{create_and_sign_cert, create_ca, public_key_pem, CertConfig};
use std::collections::BTreeMap;
use tracing::debug;

fn b64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Builds the initial cluster secret data.
///
/// Creates the cluster, etcd and front-proxy CAs plus the service account
/// key pair, and renders both registration commands. The encryption config
/// is added by the caller.
pub fn init_cluster_secret(
    cluster: &Cluster,
    endpoints: &ClusterEndpoints,
    ca_ttl: Duration,
    controlplane_cert_ttl: Duration,
) -> Result<BTreeMap<String, Vec<u8>>, KubernetesProviderError> {
    let name = cluster
        .metadata
        .name
        .clone()
        .ok_or_else(|| KubernetesProviderError::InvalidCluster("cluster has no name".to_string()))?;

    let ca = create_ca("kubernetes-ca", Some(ca_ttl))?;
    let etcd_ca = create_ca("etcd-ca", Some(ca_ttl))?;
    let front_proxy_ca = create_ca("kubernetes-front-proxy-ca", Some(ca_ttl))?;

    let sa = create_and_sign_cert(
        &ca,
        &CertConfig {
            common_name: "service-accounts".to_string(),
            organizations: vec!["kubernetes".to_string()],
            ..Default::default()
        },
        Some(Utc::now() + ca_ttl),
    )?;
    let sa_pub = public_key_pem(&sa.key_pem)?;

    let ca_pem = ca.cert_pem()?;
    let ca_key = ca.key_pem()?;
    let etcd_ca_pem = etcd_ca.cert_pem()?;
    let etcd_ca_key = etcd_ca.key_pem()?;
    let front_proxy_pem = front_proxy_ca.cert_pem()?;
    let front_proxy_key = front_proxy_ca.key_pem()?;

    let network = &cluster.spec.network;
    let controlplane_cmd = format!(
        "bash /usr/local/bin/bootstrap.sh --ca-cert {} --ca-key {} --etcd-ca-cert {} --etcd-ca-key {} \
         --front-proxy-ca-cert {} --front-proxy-ca-key {} --sa-private-key {} --sa-public-key {} \
         --etcd-lb {} --etcd-lb-port {} --apiserver-lb {} --apiserver-lb-port {} \
         --public-apiserver-lb {} --public-apiserver-lb-port {} --konnectivity-lb {} \
         --cluster-name {} --cluster-cidr {} --service-cidr {} --cp-cert-expiration-period {}",
        b64(&ca_pem),
        b64(&ca_key),
        b64(&etcd_ca_pem),
        b64(&etcd_ca_key),
        b64(&front_proxy_pem),
        b64(&front_proxy_key),
        b64(&sa.key_pem),
        b64(&sa_pub),
        endpoints.etcd_lb,
        endpoints.etcd_lb_port,
        endpoints.apiserver_lb,
        endpoints.apiserver_lb_port,
        endpoints.public_apiserver_lb,
        endpoints.public_apiserver_lb_port,
        endpoints.konnectivity_lb,
        name,
        network.pod_cidr,
        network.service_cidr,
        controlplane_cert_ttl.num_days(),
    );

    // TODO: pass containerd env vars once nodegroup runtime args reach the worker command
    let worker_cmd = format!(
        "bash /usr/local/bin/bootstrap.sh --ca-cert {} --apiserver-lb {} --apiserver-lb-port {} --cluster-dns {} --containerd-envvars ''",
        b64(&ca_pem),
        endpoints.apiserver_lb,
        endpoints.apiserver_lb_port,
        network.cluster_dns,
    );

    debug!("Generated PKI and registration commands for cluster {}", name);

    Ok(BTreeMap::from([
        (CA_CERT_KEY.to_string(), ca_pem),
        (CA_KEY_KEY.to_string(), ca_key),
        (ETCD_CA_CERT_KEY.to_string(), etcd_ca_pem),
        (ETCD_CA_KEY_KEY.to_string(), etcd_ca_key),
        (FRONT_PROXY_CA_CERT_KEY.to_string(), front_proxy_pem),
        (FRONT_PROXY_CA_KEY_KEY.to_string(), front_proxy_key),
        (SA_KEY_KEY.to_string(), sa.key_pem),
        (SA_PUB_KEY.to_string(), sa_pub),
        (CONTROLPLANE_REGISTRATION_CMD_KEY.to_string(), controlplane_cmd.into_bytes()),
        (WORKER_REGISTRATION_CMD_KEY.to_string(), worker_cmd.into_bytes()),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{ClusterSpec, Network};

    #[test]
    fn test_init_cluster_secret_keys_and_commands() {
        let cluster = Cluster::new("cl-abc", ClusterSpec {
            network: Network {
                pod_cidr: "10.244.0.0/16".to_string(),
                service_cidr: "10.96.0.0/12".to_string(),
                cluster_dns: "10.96.0.10".to_string(),
                ..Default::default()
            },
            ..Default::default()
        });
        let endpoints = ClusterEndpoints {
            etcd_lb: "10.0.0.2".to_string(),
            etcd_lb_port: 2379,
            apiserver_lb: "10.0.0.3".to_string(),
            apiserver_lb_port: 6443,
            ..Default::default()
        };

        let data = init_cluster_secret(&cluster, &endpoints, Duration::days(365), Duration::days(30)).unwrap();

        for key in [CA_CERT_KEY, CA_KEY_KEY, ETCD_CA_CERT_KEY, ETCD_CA_KEY_KEY, SA_KEY_KEY, SA_PUB_KEY] {
            assert!(data.contains_key(key), "missing {key}");
        }
        assert!(String::from_utf8_lossy(&data[SA_PUB_KEY]).starts_with("-----BEGIN PUBLIC KEY-----"));

        let cp = String::from_utf8(data[CONTROLPLANE_REGISTRATION_CMD_KEY].clone()).unwrap();
        assert!(cp.contains("--etcd-lb 10.0.0.2 --etcd-lb-port 2379"));
        assert!(cp.contains("--cluster-name cl-abc --cluster-cidr 10.244.0.0/16 --service-cidr 10.96.0.0/12"));
        assert!(cp.ends_with("--cp-cert-expiration-period 30"));

        let worker = String::from_utf8(data[WORKER_REGISTRATION_CMD_KEY].clone()).unwrap();
        assert!(worker.contains(&format!("--ca-cert {}", b64(&data[CA_CERT_KEY]))));
        assert!(worker.contains("--apiserver-lb 10.0.0.3 --apiserver-lb-port 6443 --cluster-dns 10.96.0.10"));
    }
}
