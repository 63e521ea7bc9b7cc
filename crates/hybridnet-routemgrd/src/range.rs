//! Address-range parsing and validation.
//!
//! Turns an [`AddressRange`] descriptor into a [`ParsedRange`] with typed
//! addresses, checking that every address lies inside the CIDR and matches
//! the declared family. Parsing has no side effects.

use hybridnet_types::{AddressRange, IpFamily};
use ipnet::IpNet;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{RouteMgrError, RouteMgrResult};

/// Largest number of addresses a single `a-b` exclusion may expand to.
pub const MAX_EXCLUDE_SPAN: u128 = 65536;

/// A validated address range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRange {
    pub version: IpFamily,
    /// Network with host bits cleared.
    pub cidr: IpNet,
    pub gateway: Option<IpAddr>,
    pub start: IpAddr,
    pub end: IpAddr,
    pub exclude: BTreeSet<IpAddr>,
}

/// Parses a local subnet range. The gateway is required.
pub fn parse_range(subject: &str, range: &AddressRange) -> RouteMgrResult<ParsedRange> {
    let parsed = parse(subject, range)?;
    if parsed.gateway.is_none() {
        return Err(RouteMgrError::malformed(subject, "gateway is required"));
    }
    Ok(parsed)
}

/// Parses a remote subnet range. The gateway may be omitted.
pub fn parse_remote_range(subject: &str, range: &AddressRange) -> RouteMgrResult<ParsedRange> {
    parse(subject, range)
}

fn parse(subject: &str, range: &AddressRange) -> RouteMgrResult<ParsedRange> {
    let bad = |reason: String| RouteMgrError::malformed(subject, reason);

    let cidr: IpNet = range
        .cidr
        .trim()
        .parse()
        .map_err(|_| bad(format!("invalid CIDR {:?}", range.cidr)))?;
    let cidr = cidr.trunc();
    if IpFamily::of(&cidr.addr()) != range.version {
        return Err(bad(format!(
            "CIDR {} is not an {} network",
            cidr, range.version
        )));
    }

    let address = |field: &str, value: &str| -> RouteMgrResult<IpAddr> {
        let addr: IpAddr = value
            .trim()
            .parse()
            .map_err(|_| bad(format!("invalid {field} address {value:?}")))?;
        if !cidr.contains(&addr) {
            return Err(bad(format!("{field} {addr} is outside {cidr}")));
        }
        Ok(addr)
    };

    let gateway = range
        .gateway
        .as_deref()
        .map(|gw| address("gateway", gw))
        .transpose()?;

    let (first, last) = usable_bounds(&cidr);
    let start = match range.start.as_deref() {
        Some(s) => address("start", s)?,
        None => first,
    };
    let end = match range.end.as_deref() {
        Some(e) => address("end", e)?,
        None => last,
    };
    if start > end {
        return Err(bad(format!("start {start} is after end {end}")));
    }

    let mut exclude = BTreeSet::new();
    for entry in &range.exclude_ips {
        match entry.split_once('-') {
            Some((from, to)) => {
                let from = address("exclude", from)?;
                let to = address("exclude", to)?;
                if from > to {
                    return Err(bad(format!("exclude range {entry:?} is reversed")));
                }
                let (lo, hi) = (to_u128(from), to_u128(to));
                if hi - lo >= MAX_EXCLUDE_SPAN {
                    return Err(bad(format!(
                        "exclude range {entry:?} spans more than {MAX_EXCLUDE_SPAN} addresses"
                    )));
                }
                exclude.extend((lo..=hi).map(|v| from_u128(range.version, v)));
            }
            None => {
                exclude.insert(address("exclude", entry)?);
            }
        }
    }

    Ok(ParsedRange {
        version: range.version,
        cidr,
        gateway,
        start,
        end,
        exclude,
    })
}

/// First and last assignable host of a network.
///
/// IPv4 skips the network and broadcast addresses except on /31 and /32.
/// IPv6 skips only the subnet-router anycast address.
fn usable_bounds(cidr: &IpNet) -> (IpAddr, IpAddr) {
    let family = IpFamily::of(&cidr.addr());
    let network = to_u128(cidr.network());
    let broadcast = to_u128(cidr.broadcast());
    let host_bits = family.max_prefix_len() - cidr.prefix_len();

    let (first, last) = match family {
        IpFamily::V4 if host_bits >= 2 => (network + 1, broadcast - 1),
        IpFamily::V4 => (network, broadcast),
        IpFamily::V6 if host_bits >= 1 => (network + 1, broadcast),
        IpFamily::V6 => (network, broadcast),
    };
    (from_u128(family, first), from_u128(family, last))
}

fn to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u32::from(a) as u128,
        IpAddr::V6(a) => u128::from(a),
    }
}

fn from_u128(family: IpFamily, value: u128) -> IpAddr {
    match family {
        IpFamily::V4 => IpAddr::V4(Ipv4Addr::from(value as u32)),
        IpFamily::V6 => IpAddr::V6(Ipv6Addr::from(value)),
    }
}
