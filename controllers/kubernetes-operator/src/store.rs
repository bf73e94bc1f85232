//! Object store access for the reconcilers.
//!
//! Reconcilers read and write Cluster, Nodegroup and Secret objects only
//! through [`ObjectStore`], which lets tests run the engines against an
//! in-memory store. Writes carry the object's resource version, so a stale
//! write fails with [`ControllerError::Conflict`].

use crate::cluster_secret::ClusterSecret;
use crate::error::ControllerError;
use crds::{Cluster, ClusterStatus, Nodegroup, NodegroupStatus, CLUSTER_LABEL};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// Read/write access to the objects the reconcilers own
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_nodegroup(&self, name: &str) -> Result<Option<Nodegroup>, ControllerError>;

    /// Nodegroups labelled with `cluster=<cluster>`
    async fn list_nodegroups(&self, cluster: &str) -> Result<Vec<Nodegroup>, ControllerError>;

    async fn create_nodegroup(&self, nodegroup: &Nodegroup) -> Result<Nodegroup, ControllerError>;

    /// Replaces metadata and spec
    async fn update_nodegroup(&self, nodegroup: &Nodegroup) -> Result<Nodegroup, ControllerError>;

    /// Deletes a nodegroup; an absent one is not an error
    async fn delete_nodegroup(&self, name: &str) -> Result<(), ControllerError>;

    /// Writes the status, guarded by the resource version of `nodegroup`
    async fn update_nodegroup_status(
        &self,
        nodegroup: &Nodegroup,
        status: &NodegroupStatus,
    ) -> Result<Nodegroup, ControllerError>;

    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>, ControllerError>;

    async fn list_clusters(&self) -> Result<Vec<Cluster>, ControllerError>;

    /// Replaces metadata and spec
    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, ControllerError>;

    /// Writes the status, guarded by the resource version of `cluster`
    async fn update_cluster_status(&self, cluster: &Cluster, status: &ClusterStatus) -> Result<Cluster, ControllerError>;

    async fn get_secret(&self, name: &str) -> Result<Option<ClusterSecret>, ControllerError>;

    /// Creates the cluster secret owned by `owner`; an existing secret is left alone
    async fn create_secret(&self, name: &str, owner: &Cluster, secret: &ClusterSecret) -> Result<(), ControllerError>;

    /// Replaces the data of an existing secret
    async fn update_secret(&self, name: &str, secret: &ClusterSecret) -> Result<(), ControllerError>;
}

fn map_kube_error(e: kube::Error) -> ControllerError {
    match e {
        kube::Error::Api(ae) if ae.code == 409 => ControllerError::Conflict(ae.message.clone()),
        other => ControllerError::Kube(other),
    }
}

fn name_of<K: Resource>(obj: &K) -> Result<&str, ControllerError> {
    obj.meta()
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidConfig("object missing name".to_string()))
}

fn status_patch<S: serde::Serialize>(resource_version: Option<&String>, status: &S) -> serde_json::Value {
    json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    })
}

/// [`ObjectStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    nodegroups: Api<Nodegroup>,
    clusters: Api<Cluster>,
    secrets: Api<Secret>,
}

impl KubeStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            nodegroups: Api::namespaced(client.clone(), namespace),
            clusters: Api::namespaced(client.clone(), namespace),
            secrets: Api::namespaced(client, namespace),
        }
    }

    pub fn nodegroup_api(&self) -> Api<Nodegroup> {
        self.nodegroups.clone()
    }

    pub fn cluster_api(&self) -> Api<Cluster> {
        self.clusters.clone()
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get_nodegroup(&self, name: &str) -> Result<Option<Nodegroup>, ControllerError> {
        self.nodegroups.get_opt(name).await.map_err(map_kube_error)
    }

    async fn list_nodegroups(&self, cluster: &str) -> Result<Vec<Nodegroup>, ControllerError> {
        let lp = ListParams::default().labels(&format!("{}={}", CLUSTER_LABEL, cluster));
        Ok(self.nodegroups.list(&lp).await.map_err(map_kube_error)?.items)
    }

    async fn create_nodegroup(&self, nodegroup: &Nodegroup) -> Result<Nodegroup, ControllerError> {
        self.nodegroups
            .create(&PostParams::default(), nodegroup)
            .await
            .map_err(map_kube_error)
    }

    async fn update_nodegroup(&self, nodegroup: &Nodegroup) -> Result<Nodegroup, ControllerError> {
        self.nodegroups
            .replace(name_of(nodegroup)?, &PostParams::default(), nodegroup)
            .await
            .map_err(map_kube_error)
    }

    async fn delete_nodegroup(&self, name: &str) -> Result<(), ControllerError> {
        match self.nodegroups.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("Nodegroup {} already deleted", name);
                Ok(())
            }
            Err(e) => Err(map_kube_error(e)),
        }
    }

    async fn update_nodegroup_status(
        &self,
        nodegroup: &Nodegroup,
        status: &NodegroupStatus,
    ) -> Result<Nodegroup, ControllerError> {
        let patch = status_patch(nodegroup.metadata.resource_version.as_ref(), status);
        self.nodegroups
            .patch_status(name_of(nodegroup)?, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(map_kube_error)
    }

    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>, ControllerError> {
        self.clusters.get_opt(name).await.map_err(map_kube_error)
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, ControllerError> {
        Ok(self.clusters.list(&ListParams::default()).await.map_err(map_kube_error)?.items)
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, ControllerError> {
        self.clusters
            .replace(name_of(cluster)?, &PostParams::default(), cluster)
            .await
            .map_err(map_kube_error)
    }

    async fn update_cluster_status(&self, cluster: &Cluster, status: &ClusterStatus) -> Result<Cluster, ControllerError> {
        let patch = status_patch(cluster.metadata.resource_version.as_ref(), status);
        self.clusters
            .patch_status(name_of(cluster)?, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(map_kube_error)
    }

    async fn get_secret(&self, name: &str) -> Result<Option<ClusterSecret>, ControllerError> {
        let secret = self.secrets.get_opt(name).await.map_err(map_kube_error)?;
        Ok(secret.map(|s| {
            ClusterSecret::new(
                s.data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k, v.0))
                    .collect(),
            )
        }))
    }

    async fn create_secret(&self, name: &str, owner: &Cluster, secret: &ClusterSecret) -> Result<(), ControllerError> {
        let object = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: owner.metadata.namespace.clone(),
                owner_references: owner.controller_owner_ref(&()).map(|r| vec![r]),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(to_byte_strings(secret)),
            ..Default::default()
        };
        match self.secrets.create(&PostParams::default(), &object).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!("Secret {} already exists", name);
                Ok(())
            }
            Err(e) => Err(map_kube_error(e)),
        }
    }

    async fn update_secret(&self, name: &str, secret: &ClusterSecret) -> Result<(), ControllerError> {
        let patch = json!({ "data": to_byte_strings(secret) });
        self.secrets
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(map_kube_error)?;
        Ok(())
    }
}

fn to_byte_strings(secret: &ClusterSecret) -> BTreeMap<String, ByteString> {
    secret
        .clone()
        .into_data()
        .into_iter()
        .map(|(k, v)| (k, ByteString(v)))
        .collect()
}
