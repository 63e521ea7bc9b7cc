//! routemgrd - node-local route synchronization daemon for hybridnet
//!
//! Turns the cluster's Subnet, Network and RemoteSubnet descriptors into
//! VLAN forwarding interfaces, per-family routing tables and policy rules on
//! this node, and keeps the kernel converged through a serialized full-resync
//! loop.

pub mod config;
mod error;
pub mod ifname;
pub mod range;
mod route_mgr;
pub mod store;
mod subnet_reconciler;

pub use config::{ResyncConfig, RouteMgrConfig, DEFAULT_CONFIG_PATH};
pub use error::{RouteMgrError, RouteMgrResult, StoreError, SyncDelta};
pub use ifname::{
    overlay_forward_interface_name, vlan_interface_name, InterfaceProvisioner, MAX_IFNAME_LEN,
};
pub use range::{parse_range, parse_remote_range, ParsedRange};
pub use route_mgr::{
    DesiredState, RemoteSubnetInfo, RouteManager, RouteSnapshot, RouteStatusHandle,
    RoutingSettings, SubnetInfo, SyncReport,
};
pub use store::{watch_snapshot_file, SnapshotStore, SubnetStore};
pub use subnet_reconciler::{
    is_underlay_on_node, resolve_net_id, ReconcilerSettings, SubnetReconciler,
};
