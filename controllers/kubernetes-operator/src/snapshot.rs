//! Periodic etcd snapshots.
//!
//! Every period, each active cluster with `etcdBackupEnabled` gets one
//! snapshot task. Snapshots are gzipped to
//! `<dir>/<cluster>/<RFC3339 timestamp>.db.gz`. A failing cluster is logged
//! and skipped; the loop never stops.

use crate::registry::ProviderRegistry;
use crate::store::ObjectStore;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use crds::{Cluster, ClusterState};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// File extension of a gzipped snapshot
pub const SNAPSHOT_EXTENSION: &str = "db.gz";

fn backup_wanted(cluster: &Cluster) -> bool {
    cluster.spec.etcd_backup_enabled
        && cluster
            .status
            .as_ref()
            .is_some_and(|s| s.state == ClusterState::Active)
}

/// Writes `data` gzipped under `dir/<cluster>/` and returns the file path.
pub fn write_snapshot(dir: &Path, cluster: &str, at: DateTime<Utc>, data: &[u8]) -> Result<PathBuf> {
    let cluster_dir = dir.join(cluster);
    fs::create_dir_all(&cluster_dir).with_context(|| format!("create {}", cluster_dir.display()))?;

    let path = cluster_dir.join(format!(
        "{}.{}",
        at.to_rfc3339_opts(SecondsFormat::Secs, true),
        SNAPSHOT_EXTENSION
    ));
    let file = File::create(&path).with_context(|| format!("create {}", path.display()))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(data).context("compress snapshot")?;
    encoder.finish().context("flush snapshot")?;
    Ok(path)
}

/// Background snapshot loop
#[derive(Clone)]
pub struct SnapshotTask {
    store: Arc<dyn ObjectStore>,
    registry: Arc<dyn ProviderRegistry>,
    dir: PathBuf,
    period: Duration,
}

impl std::fmt::Debug for SnapshotTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotTask")
            .field("dir", &self.dir)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

impl SnapshotTask {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Arc<dyn ProviderRegistry>,
        dir: PathBuf,
        period: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            dir,
            period,
        }
    }

    /// Runs one round per period, forever.
    pub async fn run(self) {
        info!(
            "Starting etcd snapshot task: every {:?} into {}",
            self.period,
            self.dir.display()
        );
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.run_once().await {
                Ok(written) => debug!("Etcd snapshot round wrote {} snapshots", written),
                Err(e) => error!("Etcd snapshot round failed: {:#}", e),
            }
        }
    }

    /// Snapshots every eligible cluster concurrently; returns how many were written.
    pub async fn run_once(&self) -> Result<usize> {
        let clusters = self.store.list_clusters().await.context("list clusters")?;
        let mut tasks = JoinSet::new();
        for cluster in clusters.into_iter().filter(backup_wanted) {
            let task = self.clone();
            tasks.spawn(async move {
                let name = cluster.metadata.name.clone().unwrap_or_default();
                let result = task.snapshot_cluster(&cluster).await;
                (name, result)
            });
        }

        let mut written = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(path))) => {
                    info!("Saved etcd snapshot of cluster {} to {}", name, path.display());
                    written += 1;
                }
                Ok((name, Err(e))) => warn!("Etcd snapshot of cluster {} failed: {:#}", name, e),
                Err(e) => warn!("Etcd snapshot task panicked: {}", e),
            }
        }
        Ok(written)
    }

    async fn snapshot_cluster(&self, cluster: &Cluster) -> Result<PathBuf> {
        let name = cluster.metadata.name.clone().context("cluster has no name")?;
        let secret = self
            .store
            .get_secret(&name)
            .await?
            .with_context(|| format!("cluster secret {} not found", name))?;

        let lbs = &cluster.spec.load_balancers;
        let endpoint = format!("https://{}:{}", lbs.etcd, lbs.etcd_port);
        let client = self.registry.etcd_client(&endpoint, &secret).await?;
        let data = client.snapshot().await.context("etcd snapshot")?;

        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || write_snapshot(&dir, &name, Utc::now(), &data)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::ClusterStatus;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn backed_up(name: &str, state: ClusterState, enabled: bool) -> Cluster {
        let mut cluster = create_test_cluster(name, "imi-a");
        cluster.spec.etcd_backup_enabled = enabled;
        cluster.status = Some(ClusterStatus {
            state,
            ..Default::default()
        });
        cluster
    }

    fn read_gz(path: &Path) -> Vec<u8> {
        let mut data = Vec::new();
        GzDecoder::new(File::open(path).unwrap()).read_to_end(&mut data).unwrap();
        data
    }

    #[test]
    fn test_write_snapshot_layout() {
        let dir = tempfile::tempdir().unwrap();
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z").unwrap().with_timezone(&Utc);

        let path = write_snapshot(dir.path(), "cl-a", at, b"etcd data").unwrap();
        assert_eq!(path, dir.path().join("cl-a").join("2024-05-01T10:00:00Z.db.gz"));
        assert_eq!(read_gz(&path), b"etcd data");
    }

    #[tokio::test]
    async fn test_only_active_backed_up_clusters_are_snapshotted() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        registry.etcd.set_snapshot(b"snapshot bytes");
        for (name, state, enabled) in [
            ("cl-a", ClusterState::Active, true),
            ("cl-b", ClusterState::Active, false),
            ("cl-c", ClusterState::Updating, true),
        ] {
            store.insert_cluster(backed_up(name, state, enabled));
            store.insert_secret(name, create_test_cluster_secret("imi-a"));
        }

        let task = SnapshotTask::new(
            Arc::new(store.clone()),
            Arc::new(registry.clone()),
            dir.path().to_path_buf(),
            Duration::from_secs(3600),
        );
        assert_eq!(task.run_once().await.unwrap(), 1);

        let files: Vec<PathBuf> = fs::read_dir(dir.path().join("cl-a"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].to_string_lossy().ends_with(".db.gz"));
        assert_eq!(read_gz(&files[0]), b"snapshot bytes");
        assert!(!dir.path().join("cl-b").exists());
        assert!(!dir.path().join("cl-c").exists());
        assert_eq!(registry.etcd_connector.endpoints(), vec!["https://10.10.0.11:2379".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_secret_skips_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let registry = MockProviderRegistry::new();
        store.insert_cluster(backed_up("cl-a", ClusterState::Active, true));

        let task = SnapshotTask::new(
            Arc::new(store),
            Arc::new(registry),
            dir.path().to_path_buf(),
            Duration::from_secs(3600),
        );
        assert_eq!(task.run_once().await.unwrap(), 0);
        assert!(!dir.path().join("cl-a").exists());
    }
}
