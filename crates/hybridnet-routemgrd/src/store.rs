//! Cluster store access.
//!
//! [`SubnetStore`] is what the reconciler reads descriptors through.
//! [`SnapshotStore`] serves them from an in-memory [`ClusterSnapshot`] that
//! can be reloaded from a JSON file; [`watch_snapshot_file`] reloads it when
//! the file changes and fires the reconcile trigger.

use async_trait::async_trait;
use hybridnet_daemon_common::Trigger;
use hybridnet_types::{ClusterSnapshot, Network, RemoteSubnet, Subnet};
use parking_lot::RwLock;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Read access to subnet, network and remote-subnet descriptors.
///
/// A missing network is `Ok(None)`; `Err` is reserved for the store itself
/// failing.
#[async_trait]
pub trait SubnetStore: Send + Sync {
    /// Returns a view that stays the same for the rest of a pass.
    async fn view(&self) -> Result<Arc<dyn SubnetStore>, StoreError>;

    async fn list_subnets(&self) -> Result<Vec<Subnet>, StoreError>;

    async fn get_network(&self, name: &str) -> Result<Option<Network>, StoreError>;

    async fn list_remote_subnets(&self) -> Result<Vec<RemoteSubnet>, StoreError>;
}

/// Store backed by a replaceable in-memory snapshot.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshot: RwLock<Arc<ClusterSnapshot>>,
}

impl SnapshotStore {
    pub fn new(snapshot: ClusterSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Reads and decodes a snapshot document.
    pub async fn load_file(path: &Path) -> Result<ClusterSnapshot, StoreError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        serde_json::from_str(&content).map_err(|e| StoreError::Decode {
            source_name: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Swaps in a new snapshot. Readers see either the old or the new one.
    pub fn replace(&self, snapshot: ClusterSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    pub fn current(&self) -> Arc<ClusterSnapshot> {
        self.snapshot.read().clone()
    }
}

#[async_trait]
impl SubnetStore for ClusterSnapshot {
    async fn view(&self) -> Result<Arc<dyn SubnetStore>, StoreError> {
        Ok(Arc::new(self.clone()))
    }

    async fn list_subnets(&self) -> Result<Vec<Subnet>, StoreError> {
        Ok(self.subnets.clone())
    }

    async fn get_network(&self, name: &str) -> Result<Option<Network>, StoreError> {
        Ok(self.network(name).cloned())
    }

    async fn list_remote_subnets(&self) -> Result<Vec<RemoteSubnet>, StoreError> {
        Ok(self.remote_subnets.clone())
    }
}

#[async_trait]
impl SubnetStore for SnapshotStore {
    async fn view(&self) -> Result<Arc<dyn SubnetStore>, StoreError> {
        Ok(self.current())
    }

    async fn list_subnets(&self) -> Result<Vec<Subnet>, StoreError> {
        self.current().list_subnets().await
    }

    async fn get_network(&self, name: &str) -> Result<Option<Network>, StoreError> {
        self.current().get_network(name).await
    }

    async fn list_remote_subnets(&self) -> Result<Vec<RemoteSubnet>, StoreError> {
        self.current().list_remote_subnets().await
    }
}

async fn modified(path: &Path) -> io::Result<SystemTime> {
    tokio::fs::metadata(path).await?.modified()
}

/// Polls `path` and reloads `store` whenever its modification time changes.
///
/// Every successful reload fires `trigger`. A file that disappears or fails
/// to decode leaves the current snapshot in place.
pub async fn watch_snapshot_file(
    store: Arc<SnapshotStore>,
    path: PathBuf,
    interval: Duration,
    trigger: Trigger,
    shutdown: CancellationToken,
) {
    let mut last_seen = modified(&path).await.ok();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(path = %path.display(), "Watching snapshot file");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let mtime = match modified(&path).await {
            Ok(mtime) => mtime,
            Err(e) => {
                if last_seen.take().is_some() {
                    warn!(path = %path.display(), error = %e, "Snapshot file unavailable, keeping last snapshot");
                }
                continue;
            }
        };
        if last_seen == Some(mtime) {
            continue;
        }

        match SnapshotStore::load_file(&path).await {
            Ok(snapshot) => {
                last_seen = Some(mtime);
                info!(
                    networks = snapshot.networks.len(),
                    subnets = snapshot.subnets.len(),
                    remote_subnets = snapshot.remote_subnets.len(),
                    "Snapshot reloaded"
                );
                store.replace(snapshot);
                if !trigger.fire() {
                    debug!("Reconcile already pending");
                }
            }
            Err(e) => {
                last_seen = Some(mtime);
                warn!(error = %e, "Failed to reload snapshot, keeping last snapshot");
            }
        }
    }
}
