//! Types shared between the Cluster and Nodegroup CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Network attachment for a set of instances
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Vnet {
    /// Availability zone the network lives in
    pub availability_zone: String,

    /// Name of the network the primary interface attaches to
    pub network_interface_vnet_name: String,
}
