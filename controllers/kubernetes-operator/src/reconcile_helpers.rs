//! Helper functions shared by the cluster and nodegroup reconcilers.

use crate::error::ControllerError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;

/// Name of an object, or an `InvalidConfig` error naming its kind.
pub fn object_name<'a, K: Resource>(obj: &'a K, kind: &str) -> Result<&'a str, ControllerError> {
    obj.meta()
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidConfig(format!("{} missing name", kind)))
}

/// `namespace/name` key used for per-object backoff tracking.
pub fn resource_key<K: Resource>(obj: &K) -> String {
    let meta = obj.meta();
    format!(
        "{}/{}",
        meta.namespace.as_deref().unwrap_or("default"),
        meta.name.as_deref().unwrap_or_default()
    )
}

pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Adds `finalizer`; returns whether the metadata changed.
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    if has_finalizer(meta, finalizer) {
        return false;
    }
    meta.finalizers.get_or_insert_with(Vec::new).push(finalizer.to_string());
    true
}

/// Removes `finalizer`; returns whether the metadata changed.
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != before
}

pub fn is_being_deleted(meta: &ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some()
}

/// Parses a boolean label, falling back to `default` when absent or malformed.
pub fn bool_label(meta: &ObjectMeta, key: &str, default: bool) -> bool {
    meta.labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .and_then(|v| v.trim().to_lowercase().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "reconcile_helpers_test.rs"]
mod reconcile_helpers_test;
