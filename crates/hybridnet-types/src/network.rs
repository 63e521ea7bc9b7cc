//! Network descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Object metadata carried by every descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Kind of network segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NetworkType {
    /// Statically routed segment reached through a VLAN sub-interface.
    #[default]
    Underlay,
    /// Tunnel-encapsulated segment reached through a VXLAN device.
    Overlay,
}

impl NetworkType {
    pub const fn is_overlay(&self) -> bool {
        matches!(self, NetworkType::Overlay)
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::Underlay => f.write_str("Underlay"),
            NetworkType::Overlay => f.write_str("Overlay"),
        }
    }
}

/// Desired state of a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// VLAN tag (underlay) or VNI (overlay); subnets may override it.
    #[serde(default, rename = "netID", skip_serializing_if = "Option::is_none")]
    pub net_id: Option<u32>,
    #[serde(default, rename = "type")]
    pub network_type: NetworkType,
}

/// Observed state of a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Nodes attached to this network.
    #[serde(default)]
    pub node_list: Vec<String>,
}

/// A logical network segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NetworkSpec,
    #[serde(default)]
    pub status: NetworkStatus,
}

impl Network {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns true if `node` is listed as a member of this network.
    pub fn has_node(&self, node: &str) -> bool {
        self.status.node_list.iter().any(|n| n == node)
    }
}
