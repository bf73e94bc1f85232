//! Reconciliation logic for the Cluster and Nodegroup CRDs.
//!
//! - `nodegroup`: merges compute, downstream and etcd state into the node
//!   list, then creates, repairs and removes nodes until the group matches
//!   its spec
//! - `cluster`: control plane bootstrap and rolling upgrade, storage
//!   namespaces and worker nodegroups derived from the cluster templates
//!
//! Both engines only talk to the outside world through [`ObjectStore`] and
//! [`ProviderRegistry`], so the whole pass can run against in-memory mocks.

pub mod cluster;
pub mod nodegroup;

use crate::backoff::FibonacciBackoff;
use crate::config::OperatorConfig;
use crate::metrics::Metrics;
use crate::registry::ProviderRegistry;
use crate::status::STATUS_RETRY_DELAY;
use crate::store::ObjectStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// First requeue delay after a failed pass.
pub const ERROR_BACKOFF_MIN: Duration = Duration::from_secs(5);

/// Longest requeue delay after repeated failures.
pub const ERROR_BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(ERROR_BACKOFF_MIN, ERROR_BACKOFF_MAX),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles clusters and nodegroups.
pub struct Reconciler {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) registry: Arc<dyn ProviderRegistry>,
    pub(crate) config: OperatorConfig,
    pub(crate) metrics: Arc<Metrics>,
    /// Delay between status write attempts after a conflict
    pub(crate) status_retry_delay: Duration,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Arc<dyn ProviderRegistry>,
        config: OperatorConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            metrics,
            status_retry_delay: STATUS_RETRY_DELAY,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Overrides the delay between conflicting status writes.
    #[must_use]
    pub fn with_status_retry_delay(mut self, delay: Duration) -> Self {
        self.status_retry_delay = delay;
        self
    }

    /// Next requeue delay for a failing resource and its consecutive error count.
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (ERROR_BACKOFF_MIN, 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new)
                .increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemoryStore, MockProviderRegistry};

    fn reconciler() -> Reconciler {
        Reconciler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MockProviderRegistry::new()),
            OperatorConfig::default(),
            Arc::new(Metrics::new().unwrap()),
        )
    }

    #[test]
    fn test_backoff_grows_and_resets() {
        let r = reconciler();
        r.increment_error("default/ng-1");
        let (first, errors) = r.get_backoff_for_resource("default/ng-1");
        assert_eq!(first, Duration::from_secs(5));
        assert_eq!(errors, 1);

        r.get_backoff_for_resource("default/ng-1");
        let (third, _) = r.get_backoff_for_resource("default/ng-1");
        assert_eq!(third, Duration::from_secs(10));

        r.reset_error("default/ng-1");
        let (after_reset, errors) = r.get_backoff_for_resource("default/ng-1");
        assert_eq!(after_reset, Duration::from_secs(5));
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_backoff_is_per_resource() {
        let r = reconciler();
        r.get_backoff_for_resource("default/a");
        r.get_backoff_for_resource("default/a");
        let (other, _) = r.get_backoff_for_resource("default/b");
        assert_eq!(other, ERROR_BACKOFF_MIN);
    }
}
