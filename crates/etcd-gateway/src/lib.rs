//! Etcd Gateway Client
//!
//! Lists and removes etcd members, reads member status and streams
//! snapshots through the etcd v3 JSON gateway over mutual TLS.
//!
//! Every call carries a deadline: [`REQUEST_TIMEOUT`] for membership and
//! status calls, [`SNAPSHOT_TIMEOUT`] for full snapshots.

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod etcd_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{EtcdClient, HttpEtcdConnector, REQUEST_TIMEOUT, SNAPSHOT_TIMEOUT};
pub use error::EtcdError;
pub use etcd_trait::{EtcdClientTrait, EtcdConnector};
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::{MockEtcdClient, MockEtcdConnector};
