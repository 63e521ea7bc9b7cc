//! Point-in-time listing of the cluster store.

use crate::{Network, RemoteSubnet, Subnet};
use serde::{Deserialize, Serialize};

/// Every descriptor the node daemons read, as one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    #[serde(default)]
    pub networks: Vec<Network>,
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    #[serde(default)]
    pub remote_subnets: Vec<RemoteSubnet>,
}

impl ClusterSnapshot {
    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty() && self.subnets.is_empty() && self.remote_subnets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document() {
        let snap: ClusterSnapshot = serde_json::from_str("{}").unwrap();
        assert!(snap.is_empty());
    }

    #[test]
    fn test_network_lookup() {
        let json = r#"{
            "networks": [{"metadata": {"name": "a"}}, {"metadata": {"name": "b"}}],
            "remoteSubnets": []
        }"#;
        let snap: ClusterSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.network("b").map(|n| n.name()), Some("b"));
        assert!(snap.network("c").is_none());
    }
}
