//! Etcd client traits for mocking

use crate::error::EtcdError;
use crate::models::{EtcdMember, EtcdTls, MemberStatus};

/// Etcd membership and maintenance operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait EtcdClientTrait: Send + Sync {
    /// Endpoint this client talks to
    fn endpoint(&self) -> &str;

    /// Lists the cluster members
    async fn list_members(&self) -> Result<Vec<EtcdMember>, EtcdError>;

    /// Removes a member by id
    async fn remove_member(&self, id: u64) -> Result<(), EtcdError>;

    /// Reads status of the member behind `endpoint`
    async fn member_status(&self, endpoint: &str) -> Result<MemberStatus, EtcdError>;

    /// Streams a full backend snapshot
    async fn snapshot(&self) -> Result<Vec<u8>, EtcdError>;
}

/// Builds etcd clients bound to a cluster's TLS identity
pub trait EtcdConnector: Send + Sync {
    /// Connects to `endpoint` (e.g. `https://10.0.0.5:2379`)
    fn connect(&self, endpoint: &str, tls: &EtcdTls) -> Result<Box<dyn EtcdClientTrait>, EtcdError>;
}
