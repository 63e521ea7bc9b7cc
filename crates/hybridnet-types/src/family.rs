//! IP address family.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Address family of a range descriptor, a route or a policy rule.
///
/// Serialized as `"4"` / `"6"`, which is how range descriptors carry their
/// version field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IpFamily {
    #[serde(rename = "4")]
    V4,
    #[serde(rename = "6")]
    V6,
}

impl IpFamily {
    /// Returns the family of an address.
    pub const fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    /// Returns the `ip` tool flag selecting this family.
    pub const fn ip_flag(&self) -> &'static str {
        match self {
            IpFamily::V4 => "-4",
            IpFamily::V6 => "-6",
        }
    }

    /// Returns the maximum prefix length for this family.
    pub const fn max_prefix_len(&self) -> u8 {
        match self {
            IpFamily::V4 => 32,
            IpFamily::V6 => 128,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => f.write_str("ipv4"),
            IpFamily::V6 => f.write_str("ipv6"),
        }
    }
}

impl FromStr for IpFamily {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "4" | "ipv4" => Ok(IpFamily::V4),
            "6" | "ipv6" => Ok(IpFamily::V6),
            other => Err(ParseError::InvalidFamily(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_of() {
        assert_eq!(IpFamily::of(&"10.0.0.1".parse().unwrap()), IpFamily::V4);
        assert_eq!(IpFamily::of(&"fd00::1".parse().unwrap()), IpFamily::V6);
    }

    #[test]
    fn test_family_serde() {
        let v: IpFamily = serde_json::from_str("\"6\"").unwrap();
        assert_eq!(v, IpFamily::V6);
        assert_eq!(serde_json::to_string(&IpFamily::V4).unwrap(), "\"4\"");
        assert!(serde_json::from_str::<IpFamily>("\"5\"").is_err());
    }

    #[test]
    fn test_family_from_str() {
        assert_eq!("4".parse::<IpFamily>().unwrap(), IpFamily::V4);
        assert_eq!("ipv6".parse::<IpFamily>().unwrap(), IpFamily::V6);
        assert!("v4".parse::<IpFamily>().is_err());
    }
}
