//! Configuration file support for routemgrd
//!
//! Loads and validates routemgrd configuration from TOML files.
//! Default location: /etc/hybridnet/routemgrd.toml

use hybridnet_daemon_common::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RouteMgrError, RouteMgrResult};
use crate::route_mgr::RoutingSettings;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hybridnet/routemgrd.toml";

/// Resync and retry timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncConfig {
    /// First retry delay after a failed pass, in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the retry delay, in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Unconditional full resync interval in seconds (0 disables it)
    #[serde(default = "default_periodic_interval")]
    pub periodic_interval_secs: u64,

    /// Snapshot file poll interval in milliseconds
    #[serde(default = "default_watch_interval")]
    pub watch_interval_ms: u64,
}

/// Complete routemgrd configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMgrConfig {
    /// Name of the node this daemon runs on
    #[serde(default)]
    pub node_name: String,

    /// Base device for underlay VLAN sub-interfaces
    #[serde(default = "default_vlan_if")]
    pub node_vlan_if_name: String,

    /// Base device for overlay VXLAN interfaces
    #[serde(default = "default_vxlan_if")]
    pub node_vxlan_if_name: String,

    /// Route remote subnets of peer clusters
    #[serde(default)]
    pub multicluster_enabled: bool,

    /// Cluster snapshot document read by the store
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Default log filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub routing: RoutingSettings,

    #[serde(default)]
    pub resync: ResyncConfig,
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_periodic_interval() -> u64 {
    300
}

fn default_watch_interval() -> u64 {
    1000
}

fn default_vlan_if() -> String {
    "eth0".to_string()
}

fn default_vxlan_if() -> String {
    "eth0".to_string()
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("/var/lib/hybridnet/snapshot.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            periodic_interval_secs: default_periodic_interval(),
            watch_interval_ms: default_watch_interval(),
        }
    }
}

impl Default for RouteMgrConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            node_vlan_if_name: default_vlan_if(),
            node_vxlan_if_name: default_vxlan_if(),
            multicluster_enabled: false,
            snapshot_path: default_snapshot_path(),
            log_level: default_log_level(),
            routing: RoutingSettings::default(),
            resync: ResyncConfig::default(),
        }
    }
}

impl RouteMgrConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> RouteMgrResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                RouteMgrError::invalid_config(
                    path.display().to_string(),
                    format!("failed to parse: {e}"),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "routemgrd: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(RouteMgrError::invalid_config(
                path.display().to_string(),
                e.to_string(),
            )),
        }
    }

    /// Retry delays for failed passes
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.resync.initial_backoff_ms),
            max: Duration::from_millis(self.resync.max_backoff_ms),
        }
    }

    /// Full resync interval, if enabled
    pub fn periodic_interval(&self) -> Option<Duration> {
        match self.resync.periodic_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.resync.watch_interval_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> RouteMgrResult<()> {
        if self.node_name.trim().is_empty() {
            return Err(RouteMgrError::invalid_config(
                "node_name",
                "must be set (config file, --node-name or NODE_NAME)",
            ));
        }
        if self.node_vlan_if_name.is_empty() {
            return Err(RouteMgrError::invalid_config(
                "node_vlan_if_name",
                "must not be empty",
            ));
        }
        if self.node_vxlan_if_name.is_empty() {
            return Err(RouteMgrError::invalid_config(
                "node_vxlan_if_name",
                "must not be empty",
            ));
        }
        if self.resync.initial_backoff_ms == 0 {
            return Err(RouteMgrError::invalid_config(
                "resync.initial_backoff_ms",
                "must be > 0",
            ));
        }
        if self.resync.max_backoff_ms < self.resync.initial_backoff_ms {
            return Err(RouteMgrError::invalid_config(
                "resync.max_backoff_ms",
                "must be >= initial_backoff_ms",
            ));
        }
        if self.resync.watch_interval_ms == 0 {
            return Err(RouteMgrError::invalid_config(
                "resync.watch_interval_ms",
                "must be > 0",
            ));
        }
        self.routing.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RouteMgrConfig::default();
        assert_eq!(config.node_vlan_if_name, "eth0");
        assert!(!config.multicluster_enabled);
        assert_eq!(config.routing.overlay_table, 40000);
        assert_eq!(config.routing.underlay_rule_priority, 20000);
        assert_eq!(config.resync.initial_backoff_ms, 500);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
node_name = "node-1"
multicluster_enabled = true

[routing]
overlay_table = 39999

[resync]
periodic_interval_secs = 0
"#
        )
        .unwrap();

        let config = RouteMgrConfig::load_or_default(file.path()).unwrap();

        assert_eq!(config.node_name, "node-1");
        assert!(config.multicluster_enabled);
        assert_eq!(config.routing.overlay_table, 39999);
        assert_eq!(config.routing.underlay_table_base, 10000);
        assert_eq!(config.periodic_interval(), None);
        assert_eq!(config.resync.max_backoff_ms, 60_000);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RouteMgrConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, RouteMgrConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "node_name = [").unwrap();

        let err = RouteMgrConfig::load_or_default(file.path()).unwrap_err();
        assert!(matches!(err, RouteMgrError::InvalidConfig { .. }));
    }

    #[test]
    fn test_validate() {
        let mut config = RouteMgrConfig::default();
        assert!(config.validate().is_err());

        config.node_name = "node-1".to_string();
        config.validate().unwrap();

        config.resync.max_backoff_ms = 10;
        assert!(config.validate().is_err());

        config.resync.max_backoff_ms = 60_000;
        config.routing.overlay_table = 10005;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_policy() {
        let config = RouteMgrConfig::default();
        let policy = config.backoff_policy();
        assert_eq!(policy.initial, Duration::from_millis(500));
        assert_eq!(policy.max, Duration::from_secs(60));
        assert_eq!(config.periodic_interval(), Some(Duration::from_secs(300)));
    }
}
