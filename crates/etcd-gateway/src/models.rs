//! Etcd gateway request and response models

use serde::{Deserialize, Deserializer, Serialize};

/// Etcd's gateway encodes 64-bit integers as JSON strings.
fn u64_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Str(String),
        Num(u64),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
        Repr::Num(n) => Ok(n),
    }
}

fn default_u64() -> u64 {
    0
}

/// A member of the etcd cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EtcdMember {
    /// Member id
    #[serde(rename = "ID", deserialize_with = "u64_from_string_or_number", default = "default_u64")]
    pub id: u64,

    /// Member name; empty until the member has started
    #[serde(default)]
    pub name: String,

    /// Peer URLs
    #[serde(default, rename = "peerURLs")]
    pub peer_urls: Vec<String>,

    /// Client URLs
    #[serde(default, rename = "clientURLs")]
    pub client_urls: Vec<String>,

    /// Learner (non-voting) member
    #[serde(default, rename = "isLearner")]
    pub is_learner: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MemberListResponse {
    #[serde(default)]
    pub members: Vec<EtcdMember>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MemberRemoveRequest {
    #[serde(rename = "ID")]
    pub id: String,
}

/// Status of a single etcd member
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    /// Server version
    #[serde(default)]
    pub version: String,

    /// Backend database size in bytes
    #[serde(default = "default_u64", deserialize_with = "u64_from_string_or_number")]
    pub db_size: u64,

    /// Current leader id
    #[serde(default = "default_u64", deserialize_with = "u64_from_string_or_number")]
    pub leader: u64,

    /// Raft index
    #[serde(default = "default_u64", deserialize_with = "u64_from_string_or_number")]
    pub raft_index: u64,

    /// Raft term
    #[serde(default = "default_u64", deserialize_with = "u64_from_string_or_number")]
    pub raft_term: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SnapshotChunk {
    pub result: Option<SnapshotChunkResult>,
    pub error: Option<GatewayError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SnapshotChunkResult {
    #[serde(default)]
    pub blob: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GatewayError {
    #[serde(default)]
    pub message: String,
}

/// TLS identity for talking to etcd
#[derive(Clone, Default)]
pub struct EtcdTls {
    /// PEM CA bundle that signed the etcd server certificates
    pub ca_pem: Vec<u8>,
    /// PEM client certificate
    pub cert_pem: Vec<u8>,
    /// PEM client key
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for EtcdTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdTls").finish_non_exhaustive()
    }
}
