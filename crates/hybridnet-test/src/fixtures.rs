//! Descriptor fixtures
//!
//! Builders for the objects a cluster store would hold, so tests can lay out
//! a scenario in a few lines.

use hybridnet_types::{
    AddressRange, ClusterSnapshot, IpFamily, Network, NetworkSpec, NetworkStatus, NetworkType,
    ObjectMeta, RemoteSubnet, RemoteSubnetSpec, Subnet, SubnetSpec,
};

/// Underlay network attached to `nodes`.
pub fn underlay_network(name: &str, net_id: Option<u32>, nodes: &[&str]) -> Network {
    Network {
        metadata: ObjectMeta::new(name),
        spec: NetworkSpec {
            net_id,
            network_type: NetworkType::Underlay,
        },
        status: NetworkStatus {
            node_list: nodes.iter().map(|n| n.to_string()).collect(),
        },
    }
}

/// Overlay network with the given VNI.
pub fn overlay_network(name: &str, vni: Option<u32>) -> Network {
    Network {
        metadata: ObjectMeta::new(name),
        spec: NetworkSpec {
            net_id: vni,
            network_type: NetworkType::Overlay,
        },
        status: NetworkStatus::default(),
    }
}

/// IPv4 range with a gateway and default bounds.
pub fn v4_range(cidr: &str, gateway: &str) -> AddressRange {
    AddressRange::new(IpFamily::V4, cidr).with_gateway(gateway)
}

/// IPv6 range with a gateway and default bounds.
pub fn v6_range(cidr: &str, gateway: &str) -> AddressRange {
    AddressRange::new(IpFamily::V6, cidr).with_gateway(gateway)
}

/// Builder for subnet descriptors
#[derive(Debug, Clone)]
pub struct SubnetBuilder {
    subnet: Subnet,
}

impl SubnetBuilder {
    pub fn new(name: &str, network: &str, range: AddressRange) -> Self {
        Self {
            subnet: Subnet {
                metadata: ObjectMeta::new(name),
                spec: SubnetSpec {
                    network: network.to_string(),
                    net_id: None,
                    range,
                    auto_nat_outgoing: None,
                },
            },
        }
    }

    /// Override the network's netID
    pub fn net_id(mut self, net_id: u32) -> Self {
        self.subnet.spec.net_id = Some(net_id);
        self
    }

    pub fn auto_nat(mut self, enabled: bool) -> Self {
        self.subnet.spec.auto_nat_outgoing = Some(enabled);
        self
    }

    pub fn build(self) -> Subnet {
        self.subnet
    }
}

/// Subnet with no overrides.
pub fn subnet(name: &str, network: &str, range: AddressRange) -> Subnet {
    SubnetBuilder::new(name, network, range).build()
}

/// Remote subnet owned by `cluster`.
pub fn remote_subnet(
    name: &str,
    cluster: &str,
    network_type: NetworkType,
    range: AddressRange,
) -> RemoteSubnet {
    RemoteSubnet {
        metadata: ObjectMeta::new(name),
        spec: RemoteSubnetSpec {
            range,
            network_type,
            cluster_name: cluster.to_string(),
        },
    }
}

/// Assemble a snapshot from its parts.
pub fn snapshot(
    networks: Vec<Network>,
    subnets: Vec<Subnet>,
    remote_subnets: Vec<RemoteSubnet>,
) -> ClusterSnapshot {
    ClusterSnapshot {
        networks,
        subnets,
        remote_subnets,
    }
}
