//! Validated segment identifiers.
//!
//! A network's `netID` is carried as a plain integer in the descriptors and
//! means a VLAN tag on underlay networks and a VXLAN network identifier on
//! overlay networks. The two have different valid ranges.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// IEEE 802.1Q VLAN identifier (1-4094).
///
/// # Examples
///
/// ```
/// use hybridnet_types::VlanId;
///
/// let vlan = VlanId::new(100).unwrap();
/// assert_eq!(vlan.as_u16(), 100);
///
/// assert!(VlanId::new(0).is_err());
/// assert!(VlanId::new(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct VlanId(u16);

impl VlanId {
    /// Minimum valid VLAN ID.
    pub const MIN: u32 = 1;

    /// Maximum valid VLAN ID.
    pub const MAX: u32 = 4094;

    /// Creates a new VLAN ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is outside 1-4094.
    pub const fn new(id: u32) -> Result<Self, ParseError> {
        if id >= Self::MIN && id <= Self::MAX {
            Ok(VlanId(id as u16))
        } else {
            Err(ParseError::InvalidVlanId(id))
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for VlanId {
    type Error = ParseError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        VlanId::new(value)
    }
}

impl From<VlanId> for u32 {
    fn from(vlan: VlanId) -> Self {
        vlan.0 as u32
    }
}

/// VXLAN network identifier (24 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Vni(u32);

impl Vni {
    /// Maximum valid VNI.
    pub const MAX: u32 = (1 << 24) - 1;

    /// Creates a new VNI.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not fit in 24 bits.
    pub const fn new(id: u32) -> Result<Self, ParseError> {
        if id <= Self::MAX {
            Ok(Vni(id))
        } else {
            Err(ParseError::InvalidVni(id))
        }
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Vni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for Vni {
    type Error = ParseError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Vni::new(value)
    }
}

impl From<Vni> for u32 {
    fn from(vni: Vni) -> Self {
        vni.0
    }
}
