//! Subnet and remote-subnet descriptors.
//!
//! Addresses in an [`AddressRange`] are kept as strings: the descriptor is
//! whatever the store holds, and validation belongs to the range parser in
//! the consuming daemon.

use crate::{IpFamily, NetworkType, ObjectMeta};
use serde::{Deserialize, Serialize};

/// Address-range descriptor of a subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRange {
    pub version: IpFamily,
    pub cidr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Single addresses or inclusive `a-b` ranges.
    #[serde(default, rename = "excludeIPs", skip_serializing_if = "Vec::is_empty")]
    pub exclude_ips: Vec<String>,
}

impl AddressRange {
    pub fn new(version: IpFamily, cidr: impl Into<String>) -> Self {
        Self {
            version,
            cidr: cidr.into(),
            gateway: None,
            start: None,
            end: None,
            exclude_ips: Vec::new(),
        }
    }

    pub fn with_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = Some(gateway.into());
        self
    }

    pub fn with_bounds(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
    }

    pub fn with_exclude(mut self, entry: impl Into<String>) -> Self {
        self.exclude_ips.push(entry.into());
        self
    }
}

/// Desired state of a subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Name of the owning network.
    pub network: String,
    /// Overrides the network's `netID` when present.
    #[serde(default, rename = "netID", skip_serializing_if = "Option::is_none")]
    pub net_id: Option<u32>,
    pub range: AddressRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_nat_outgoing: Option<bool>,
}

/// A CIDR allocation bound to one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub metadata: ObjectMeta,
    pub spec: SubnetSpec,
}

impl Subnet {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Outgoing NAT is on unless the descriptor turns it off.
    pub fn is_auto_nat_outgoing(&self) -> bool {
        self.spec.auto_nat_outgoing.unwrap_or(true)
    }
}

/// Desired state of a remote subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSubnetSpec {
    pub range: AddressRange,
    #[serde(default, rename = "type")]
    pub network_type: NetworkType,
    /// Peer cluster owning the subnet.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
}

/// A subnet owned by a peer cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSubnet {
    pub metadata: ObjectMeta,
    pub spec: RemoteSubnetSpec,
}

impl RemoteSubnet {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn is_overlay(&self) -> bool {
        self.spec.network_type.is_overlay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_subnet_deserialize() {
        let json = r#"{
            "metadata": {"name": "s1"},
            "spec": {
                "network": "net1",
                "netID": 200,
                "range": {
                    "version": "4",
                    "cidr": "10.0.0.0/24",
                    "gateway": "10.0.0.1",
                    "start": "10.0.0.10",
                    "end": "10.0.0.200",
                    "excludeIPs": ["10.0.0.50", "10.0.0.60-10.0.0.70"]
                },
                "autoNatOutgoing": false
            }
        }"#;
        let subnet: Subnet = serde_json::from_str(json).unwrap();

        assert_eq!(subnet.name(), "s1");
        assert_eq!(subnet.spec.network, "net1");
        assert_eq!(subnet.spec.net_id, Some(200));
        assert_eq!(
            subnet.spec.range,
            AddressRange::new(IpFamily::V4, "10.0.0.0/24")
                .with_gateway("10.0.0.1")
                .with_bounds("10.0.0.10", "10.0.0.200")
                .with_exclude("10.0.0.50")
                .with_exclude("10.0.0.60-10.0.0.70")
        );
        assert!(!subnet.is_auto_nat_outgoing());
    }

    #[test]
    fn test_auto_nat_defaults_on() {
        let json = r#"{
            "metadata": {"name": "s2"},
            "spec": {"network": "n", "range": {"version": "6", "cidr": "fd00::/64"}}
        }"#;
        let subnet: Subnet = serde_json::from_str(json).unwrap();
        assert!(subnet.is_auto_nat_outgoing());
        assert_eq!(subnet.spec.range.version, IpFamily::V6);
    }

    #[test]
    fn test_remote_subnet_type() {
        let json = r#"{
            "metadata": {"name": "r1"},
            "spec": {
                "range": {"version": "4", "cidr": "10.9.0.0/16"},
                "type": "Overlay",
                "clusterName": "peer"
            }
        }"#;
        let remote: RemoteSubnet = serde_json::from_str(json).unwrap();
        assert!(remote.is_overlay());
        assert_eq!(remote.spec.cluster_name, "peer");
    }
}
