//! Shared descriptor types for the hybridnet node daemons.
//!
//! This crate holds the declarative objects read from the cluster state
//! store and the small validated value types derived from them:
//!
//! - [`Network`]: a logical network segment (underlay or overlay)
//! - [`Subnet`]: a CIDR allocation bound to one network
//! - [`RemoteSubnet`]: a subnet owned by a peer cluster
//! - [`ClusterSnapshot`]: a point-in-time listing of all three
//! - [`VlanId`] / [`Vni`]: validated segment identifiers
//! - [`IpFamily`]: the address family a range or route belongs to

mod family;
mod netid;
mod network;
mod snapshot;
mod subnet;

pub use family::IpFamily;
pub use netid::{Vni, VlanId};
pub use network::{Network, NetworkSpec, NetworkStatus, NetworkType, ObjectMeta};
pub use snapshot::ClusterSnapshot;
pub use subnet::{AddressRange, RemoteSubnet, RemoteSubnetSpec, Subnet, SubnetSpec};

/// Common error type for value parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u32),

    #[error("invalid VXLAN network identifier: {0} (must be 0-16777215)")]
    InvalidVni(u32),

    #[error("invalid IP family: {0} (must be \"4\" or \"6\")")]
    InvalidFamily(String),
}
