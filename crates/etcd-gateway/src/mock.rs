//! Mock etcd client for unit testing
//!
//! Keeps the member list in memory and records removals so tests can
//! assert which members were evicted.

use crate::error::EtcdError;
use crate::etcd_trait::{EtcdClientTrait, EtcdConnector};
use crate::models::{EtcdMember, EtcdTls, MemberStatus};
use std::sync::{Arc, Mutex};

/// Mock etcd client for testing
#[derive(Clone, Default)]
pub struct MockEtcdClient {
    members: Arc<Mutex<Vec<EtcdMember>>>,
    removed: Arc<Mutex<Vec<u64>>>,
    fail_list: Arc<Mutex<bool>>,
    snapshot: Arc<Mutex<Vec<u8>>>,
}

impl std::fmt::Debug for MockEtcdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEtcdClient").finish_non_exhaustive()
    }
}

impl MockEtcdClient {
    /// Create a new mock client with no members
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member (for test setup)
    pub fn add_member(&self, id: u64, name: &str, peer_url: &str) {
        self.members.lock().unwrap().push(EtcdMember {
            id,
            name: name.to_string(),
            peer_urls: vec![peer_url.to_string()],
            client_urls: Vec::new(),
            is_learner: false,
        });
    }

    /// Make `list_members` fail
    pub fn fail_list(&self, fail: bool) {
        *self.fail_list.lock().unwrap() = fail;
    }

    /// Set the bytes returned by `snapshot`
    pub fn set_snapshot(&self, data: &[u8]) {
        *self.snapshot.lock().unwrap() = data.to_vec();
    }

    /// Ids of removed members, in removal order
    pub fn removed(&self) -> Vec<u64> {
        self.removed.lock().unwrap().clone()
    }

    /// Current members
    pub fn members(&self) -> Vec<EtcdMember> {
        self.members.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EtcdClientTrait for MockEtcdClient {
    fn endpoint(&self) -> &str {
        "mock://etcd"
    }

    async fn list_members(&self) -> Result<Vec<EtcdMember>, EtcdError> {
        if *self.fail_list.lock().unwrap() {
            return Err(EtcdError::Timeout("list etcd members".to_string()));
        }
        Ok(self.members.lock().unwrap().clone())
    }

    async fn remove_member(&self, id: u64) -> Result<(), EtcdError> {
        let mut members = self.members.lock().unwrap();
        let before = members.len();
        members.retain(|m| m.id != id);
        if members.len() == before {
            return Err(EtcdError::NotFound(format!("member {id:x}")));
        }
        self.removed.lock().unwrap().push(id);
        Ok(())
    }

    async fn member_status(&self, _endpoint: &str) -> Result<MemberStatus, EtcdError> {
        Ok(MemberStatus {
            version: "3.5.0".to_string(),
            ..Default::default()
        })
    }

    async fn snapshot(&self) -> Result<Vec<u8>, EtcdError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

/// Connector that hands out clones of one [`MockEtcdClient`]
#[derive(Clone, Debug, Default)]
pub struct MockEtcdConnector {
    client: MockEtcdClient,
    endpoints: Arc<Mutex<Vec<String>>>,
}

impl MockEtcdConnector {
    /// Wrap a mock client
    pub fn new(client: MockEtcdClient) -> Self {
        Self {
            client,
            endpoints: Arc::default(),
        }
    }

    /// Endpoints passed to `connect`
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }
}

impl EtcdConnector for MockEtcdConnector {
    fn connect(&self, endpoint: &str, _tls: &EtcdTls) -> Result<Box<dyn EtcdClientTrait>, EtcdError> {
        self.endpoints.lock().unwrap().push(endpoint.to_string());
        Ok(Box::new(self.client.clone()))
    }
}
