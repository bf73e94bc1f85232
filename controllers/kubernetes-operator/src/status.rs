//! Status writes with retry on conflict.
//!
//! A status write re-reads the object, applies the change to the fresh copy
//! and submits it. Conflicts are retried [`STATUS_RETRY_ATTEMPTS`] times
//! with a fixed delay; the last conflict is returned to the caller.

use crate::error::ControllerError;
use crate::store::ObjectStore;
use chrono::Utc;
use crds::{Cluster, ClusterStatus, Nodegroup, NodegroupStatus};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub const STATUS_RETRY_ATTEMPTS: u32 = 5;
pub const STATUS_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Runs `op` until it succeeds, fails with a non-conflict error, or
/// `attempts` conflicts have been seen.
pub async fn retry_on_conflict<T, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<T, ControllerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControllerError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < attempts => {
                debug!("Conflict on attempt {}/{}: {}", attempt, attempts, e);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// Persists a nodegroup status, re-reading the object before each attempt.
pub async fn write_nodegroup_status(
    store: &dyn ObjectStore,
    name: &str,
    status: &NodegroupStatus,
    delay: Duration,
) -> Result<Option<Nodegroup>, ControllerError> {
    retry_on_conflict(STATUS_RETRY_ATTEMPTS, delay, || async move {
        let Some(latest) = store.get_nodegroup(name).await? else {
            warn!("Nodegroup {} disappeared before its status was written", name);
            return Ok(None);
        };
        store.update_nodegroup_status(&latest, status).await.map(Some)
    })
    .await
}

/// Persists a cluster status, stamping `last_update`.
pub async fn write_cluster_status(
    store: &dyn ObjectStore,
    name: &str,
    status: &ClusterStatus,
    delay: Duration,
) -> Result<Option<Cluster>, ControllerError> {
    retry_on_conflict(STATUS_RETRY_ATTEMPTS, delay, || async move {
        let Some(latest) = store.get_cluster(name).await? else {
            warn!("Cluster {} disappeared before its status was written", name);
            return Ok(None);
        };
        let mut status = status.clone();
        status.last_update = Some(Utc::now());
        store.update_cluster_status(&latest, &status).await.map(Some)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_conflicts_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_on_conflict(5, Duration::ZERO, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ControllerError::Conflict("stale".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_on_conflict(5, Duration::ZERO, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ControllerError::Conflict("stale".to_string()))
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_on_conflict(5, Duration::ZERO, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ControllerError::InvalidSecret("ca.crt".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
