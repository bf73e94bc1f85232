//! KaaS CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the cluster and nodegroup
//! reconcilers.

pub mod cluster;
pub mod common;
pub mod nodegroup;

pub use cluster::*;
pub use common::*;
pub use nodegroup::*;
