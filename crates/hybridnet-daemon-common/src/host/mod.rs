//! Access to the host's links, routing tables and policy rules.
//!
//! [`HostNetwork`] is the seam between the reconcilers and the kernel. The
//! production implementation is [`ShellHost`], which drives the `ip` tool;
//! tests use an in-memory implementation.

mod shell_host;

pub use shell_host::ShellHost;

use async_trait::async_trait;
use hybridnet_types::IpFamily;
use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;

use crate::error::HostResult;

/// Kernel table id of the main routing table.
pub const MAIN_TABLE: u32 = 254;

/// What a route does with matching traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteKind {
    /// Directly connected: `dev <dev> scope link`.
    Link { dev: String },
    /// Through a next hop: `via <gateway> dev <dev> onlink`.
    Via { gateway: IpAddr, dev: String },
    /// Fall back to the next rule: `throw`.
    Throw,
    /// Any route type this crate does not manage (local, broadcast, ...).
    Other { route_type: String },
}

/// A single routing table entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteEntry {
    pub table: u32,
    pub destination: IpNet,
    pub kind: RouteKind,
}

impl RouteEntry {
    pub fn link(table: u32, destination: IpNet, dev: impl Into<String>) -> Self {
        Self {
            table,
            destination,
            kind: RouteKind::Link { dev: dev.into() },
        }
    }

    pub fn via(table: u32, destination: IpNet, gateway: IpAddr, dev: impl Into<String>) -> Self {
        Self {
            table,
            destination,
            kind: RouteKind::Via {
                gateway,
                dev: dev.into(),
            },
        }
    }

    pub fn throw(table: u32, destination: IpNet) -> Self {
        Self {
            table,
            destination,
            kind: RouteKind::Throw,
        }
    }

    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.destination.addr())
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RouteKind::Link { dev } => {
                write!(f, "{} dev {} table {}", self.destination, dev, self.table)
            }
            RouteKind::Via { gateway, dev } => write!(
                f,
                "{} via {} dev {} table {}",
                self.destination, gateway, dev, self.table
            ),
            RouteKind::Throw => write!(f, "throw {} table {}", self.destination, self.table),
            RouteKind::Other { route_type } => {
                write!(f, "{} {} table {}", route_type, self.destination, self.table)
            }
        }
    }
}

/// A policy routing rule: `[from <src>] lookup <table> priority <priority>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyRule {
    pub priority: u32,
    /// Source selector; `None` matches all traffic.
    pub from: Option<IpNet>,
    pub table: u32,
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.from {
            Some(src) => write!(
                f,
                "from {} lookup {} priority {}",
                src, self.table, self.priority
            ),
            None => write!(f, "from all lookup {} priority {}", self.table, self.priority),
        }
    }
}

/// Read and change host network state.
///
/// All methods are scoped to a single address family where the kernel
/// keeps per-family state. Link methods are family independent.
#[async_trait]
pub trait HostNetwork: Send + Sync {
    /// Returns true if a link with this name exists.
    async fn link_exists(&self, name: &str) -> HostResult<bool>;

    /// Creates a VLAN sub-interface `name` on top of `base`.
    async fn add_vlan_link(&self, base: &str, name: &str, vlan_id: u16) -> HostResult<()>;

    /// Sets a link administratively up.
    async fn set_link_up(&self, name: &str) -> HostResult<()>;

    /// Lists the routes of every table for one family.
    async fn list_routes(&self, family: IpFamily) -> HostResult<Vec<RouteEntry>>;

    async fn add_route(&self, route: &RouteEntry) -> HostResult<()>;

    async fn del_route(&self, route: &RouteEntry) -> HostResult<()>;

    /// Lists the policy rules for one family.
    async fn list_rules(&self, family: IpFamily) -> HostResult<Vec<PolicyRule>>;

    async fn add_rule(&self, family: IpFamily, rule: &PolicyRule) -> HostResult<()>;

    async fn del_rule(&self, family: IpFamily, rule: &PolicyRule) -> HostResult<()>;

    /// Returns true if IPv6 is disabled on the whole host.
    async fn ipv6_globally_disabled(&self) -> HostResult<bool>;
}
