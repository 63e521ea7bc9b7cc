//! RouteManager - per-family desired routing state and kernel convergence
//!
//! Desired state is staged with [`RouteManager::reset_infos`] and the
//! `add_*` calls, then [`RouteManager::sync_routes`] diffs it against the
//! kernel and applies the difference.
//!
//! Kernel encoding, per family:
//!
//! | What | Table | Entries |
//! |------|-------|---------|
//! | overlay subnets | `overlay_table` | `cidr dev <vxlan if>` |
//! | remote overlay subnets | `overlay_table` | `cidr dev <vxlan if>` |
//! | every underlay subnet | `overlay_table` | `throw cidr` |
//! | underlay subnet on this node | one table in `underlay_table_base..+underlay_table_span` | `cidr dev <vlan if> scope link`, `default via <gw> dev <vlan if> onlink` |
//!
//! Rules: `from all lookup overlay_table` at `overlay_rule_priority` while
//! the overlay table holds any overlay route, and `from cidr lookup <table>`
//! at `underlay_rule_priority` for each local underlay subnet. A subnet keeps
//! the table its installed rule points at; new subnets take the lowest free
//! table.

use hybridnet_daemon_common::{HostNetwork, PolicyRule, RouteEntry};
use hybridnet_types::IpFamily;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{RouteMgrError, RouteMgrResult, SyncDelta};
use crate::range::ParsedRange;

/// Routing table and rule priority layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSettings {
    #[serde(default = "default_overlay_table")]
    pub overlay_table: u32,
    #[serde(default = "default_overlay_rule_priority")]
    pub overlay_rule_priority: u32,
    #[serde(default = "default_underlay_table_base")]
    pub underlay_table_base: u32,
    /// Number of tables reserved for local underlay subnets.
    #[serde(default = "default_underlay_table_span")]
    pub underlay_table_span: u32,
    #[serde(default = "default_underlay_rule_priority")]
    pub underlay_rule_priority: u32,
}

fn default_overlay_table() -> u32 {
    40000
}

fn default_overlay_rule_priority() -> u32 {
    19000
}

fn default_underlay_table_base() -> u32 {
    10000
}

fn default_underlay_table_span() -> u32 {
    10000
}

fn default_underlay_rule_priority() -> u32 {
    20000
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            overlay_table: default_overlay_table(),
            overlay_rule_priority: default_overlay_rule_priority(),
            underlay_table_base: default_underlay_table_base(),
            underlay_table_span: default_underlay_table_span(),
            underlay_rule_priority: default_underlay_rule_priority(),
        }
    }
}

impl RoutingSettings {
    /// Returns true if routes in `table` are managed by this daemon.
    pub fn owns_table(&self, table: u32) -> bool {
        table == self.overlay_table
            || (table >= self.underlay_table_base
                && table - self.underlay_table_base < self.underlay_table_span)
    }

    /// Returns true if a rule at `priority` is managed by this daemon.
    pub fn owns_priority(&self, priority: u32) -> bool {
        priority == self.overlay_rule_priority || priority == self.underlay_rule_priority
    }

    /// Checks the layout for overlaps that would make ownership ambiguous.
    pub fn validate(&self) -> RouteMgrResult<()> {
        if self.underlay_table_span == 0 {
            return Err(RouteMgrError::invalid_config(
                "routing.underlay_table_span",
                "must be > 0",
            ));
        }
        let end = self
            .underlay_table_base
            .checked_add(self.underlay_table_span)
            .ok_or_else(|| {
                RouteMgrError::invalid_config("routing.underlay_table_span", "table range overflows")
            })?;
        if (self.underlay_table_base..end).contains(&self.overlay_table) {
            return Err(RouteMgrError::invalid_config(
                "routing.overlay_table",
                "must lie outside the underlay table range",
            ));
        }
        if self.underlay_table_base <= 255 {
            return Err(RouteMgrError::invalid_config(
                "routing.underlay_table_base",
                "must be above the reserved kernel tables",
            ));
        }
        if self.overlay_table <= 255 {
            return Err(RouteMgrError::invalid_config(
                "routing.overlay_table",
                "must be above the reserved kernel tables",
            ));
        }
        if self.overlay_rule_priority == self.underlay_rule_priority {
            return Err(RouteMgrError::invalid_config(
                "routing.overlay_rule_priority",
                "must differ from underlay_rule_priority",
            ));
        }
        if self.overlay_rule_priority == 0 || self.underlay_rule_priority == 0 {
            return Err(RouteMgrError::invalid_config(
                "routing",
                "rule priority 0 is reserved for the local table",
            ));
        }
        Ok(())
    }
}

/// A local subnet staged for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetInfo {
    pub cidr: IpNet,
    pub gateway: Option<IpAddr>,
    pub start: IpAddr,
    pub end: IpAddr,
    pub exclude: BTreeSet<IpAddr>,
    /// VLAN interface (local underlay) or VXLAN interface (overlay).
    pub forward_interface: Option<String>,
    pub auto_nat_outgoing: bool,
    pub is_overlay: bool,
    pub is_underlay_local: bool,
}

impl SubnetInfo {
    pub fn new(
        range: ParsedRange,
        forward_interface: Option<String>,
        auto_nat_outgoing: bool,
        is_overlay: bool,
        is_underlay_local: bool,
    ) -> Self {
        Self {
            cidr: range.cidr,
            gateway: range.gateway,
            start: range.start,
            end: range.end,
            exclude: range.exclude,
            forward_interface,
            auto_nat_outgoing,
            is_overlay,
            is_underlay_local,
        }
    }
}

/// A peer-cluster subnet staged for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSubnetInfo {
    pub cidr: IpNet,
    pub gateway: Option<IpAddr>,
    pub start: IpAddr,
    pub end: IpAddr,
    pub exclude: BTreeSet<IpAddr>,
    pub is_overlay: bool,
}

impl RemoteSubnetInfo {
    pub fn new(range: ParsedRange, is_overlay: bool) -> Self {
        Self {
            cidr: range.cidr,
            gateway: range.gateway,
            start: range.start,
            end: range.end,
            exclude: range.exclude,
            is_overlay,
        }
    }
}

/// Infos a manager last converged the kernel to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSnapshot {
    pub family: IpFamily,
    pub subnets: Vec<SubnetInfo>,
    pub remote_subnets: Vec<RemoteSubnetInfo>,
}

/// Read-only view of the last converged state, shareable across tasks.
#[derive(Debug, Clone)]
pub struct RouteStatusHandle {
    inner: Arc<RwLock<Arc<RouteSnapshot>>>,
}

impl RouteStatusHandle {
    pub fn current(&self) -> Arc<RouteSnapshot> {
        self.inner.read().clone()
    }
}

/// Kernel routes and rules a manager wants installed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    pub routes: BTreeSet<RouteEntry>,
    pub rules: BTreeSet<PolicyRule>,
}

/// Result of a successful sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}

enum Change<'a> {
    DelRule(&'a PolicyRule),
    DelRoute(&'a RouteEntry),
    AddRoute(&'a RouteEntry),
    AddRule(&'a PolicyRule),
}

impl Change<'_> {
    fn describe(&self) -> String {
        match self {
            Change::DelRule(r) => format!("rule del {r}"),
            Change::DelRoute(r) => format!("route del {r}"),
            Change::AddRoute(r) => format!("route add {r}"),
            Change::AddRule(r) => format!("rule add {r}"),
        }
    }
}

/// Route manager for one address family.
pub struct RouteManager {
    family: IpFamily,
    settings: RoutingSettings,
    host: Arc<dyn HostNetwork>,
    subnet_infos: Vec<SubnetInfo>,
    remote_infos: Vec<RemoteSubnetInfo>,
    published: Arc<RwLock<Arc<RouteSnapshot>>>,
}

impl RouteManager {
    pub fn new(family: IpFamily, settings: RoutingSettings, host: Arc<dyn HostNetwork>) -> Self {
        let empty = RouteSnapshot {
            family,
            subnets: Vec::new(),
            remote_subnets: Vec::new(),
        };
        Self {
            family,
            settings,
            host,
            subnet_infos: Vec::new(),
            remote_infos: Vec::new(),
            published: Arc::new(RwLock::new(Arc::new(empty))),
        }
    }

    pub fn family(&self) -> IpFamily {
        self.family
    }

    /// Handle for readers of the last converged state.
    pub fn status_handle(&self) -> RouteStatusHandle {
        RouteStatusHandle {
            inner: self.published.clone(),
        }
    }

    pub fn subnet_infos(&self) -> &[SubnetInfo] {
        &self.subnet_infos
    }

    pub fn remote_subnet_infos(&self) -> &[RemoteSubnetInfo] {
        &self.remote_infos
    }

    /// Clears all staged infos.
    pub fn reset_infos(&mut self) {
        self.subnet_infos.clear();
        self.remote_infos.clear();
    }

    fn check_family(&self, cidr: &IpNet) -> RouteMgrResult<()> {
        if IpFamily::of(&cidr.addr()) != self.family {
            return Err(RouteMgrError::malformed(
                cidr.to_string(),
                format!("not an {} network", self.family),
            ));
        }
        Ok(())
    }

    /// Stages a local subnet. Duplicates are not detected.
    ///
    /// Fails if the subnet belongs to the other address family.
    pub fn add_subnet_info(&mut self, info: SubnetInfo) -> RouteMgrResult<()> {
        self.check_family(&info.cidr)?;
        self.subnet_infos.push(info);
        Ok(())
    }

    /// Stages a peer-cluster subnet.
    ///
    /// Fails if its CIDR overlaps any staged local or remote subnet.
    pub fn add_remote_subnet_info(&mut self, info: RemoteSubnetInfo) -> RouteMgrResult<()> {
        self.check_family(&info.cidr)?;

        let existing = self
            .subnet_infos
            .iter()
            .map(|s| s.cidr)
            .chain(self.remote_infos.iter().map(|r| r.cidr))
            .find(|cidr| overlaps(cidr, &info.cidr));
        if let Some(existing) = existing {
            return Err(RouteMgrError::RemoteSubnetConflict {
                cidr: info.cidr.to_string(),
                existing: existing.to_string(),
            });
        }

        self.remote_infos.push(info);
        Ok(())
    }

    /// Computes the kernel entries for the staged infos.
    ///
    /// `installed_rules` are the policy rules currently in the kernel. A
    /// local underlay subnet keeps the table its installed rule points at;
    /// only subnets without one are given a new table.
    pub fn desired_state(
        &self,
        installed_rules: &BTreeSet<PolicyRule>,
    ) -> RouteMgrResult<DesiredState> {
        let s = &self.settings;
        let mut desired = DesiredState::default();
        let mut overlay_routes = 0usize;

        let mut overlay_subnets: Vec<&SubnetInfo> =
            self.subnet_infos.iter().filter(|i| i.is_overlay).collect();
        overlay_subnets.sort_by_key(|i| i.cidr);

        for info in &overlay_subnets {
            match &info.forward_interface {
                Some(dev) => {
                    desired
                        .routes
                        .insert(RouteEntry::link(s.overlay_table, info.cidr, dev.as_str()));
                    overlay_routes += 1;
                }
                None => warn!(cidr = %info.cidr, "Overlay subnet has no forwarding interface"),
            }
        }

        for info in self.subnet_infos.iter().filter(|i| !i.is_overlay) {
            desired
                .routes
                .insert(RouteEntry::throw(s.overlay_table, info.cidr));
        }

        // Remote overlay traffic leaves through the first local overlay device.
        let remote_dev = overlay_subnets
            .iter()
            .find_map(|i| i.forward_interface.as_deref());
        for remote in &self.remote_infos {
            if !remote.is_overlay {
                desired
                    .routes
                    .insert(RouteEntry::throw(s.overlay_table, remote.cidr));
                continue;
            }
            match remote_dev {
                Some(dev) => {
                    desired
                        .routes
                        .insert(RouteEntry::link(s.overlay_table, remote.cidr, dev));
                    overlay_routes += 1;
                }
                None => warn!(
                    cidr = %remote.cidr,
                    "No local overlay interface, skipping remote overlay subnet"
                ),
            }
        }

        if overlay_routes > 0 {
            desired.rules.insert(PolicyRule {
                priority: s.overlay_rule_priority,
                from: None,
                table: s.overlay_table,
            });
        } else {
            desired.routes.retain(|r| r.table != s.overlay_table);
        }

        let mut local: Vec<&SubnetInfo> = self
            .subnet_infos
            .iter()
            .filter(|i| !i.is_overlay && i.is_underlay_local)
            .collect();
        local.sort_by_key(|i| i.cidr);
        local.dedup_by_key(|i| i.cidr);

        if local.len() as u64 > u64::from(s.underlay_table_span) {
            return Err(RouteMgrError::sync(
                self.family,
                SyncDelta::default(),
                format!(
                    "{} local underlay subnets exceed the {} reserved tables",
                    local.len(),
                    s.underlay_table_span
                ),
            ));
        }

        let tables = self.assign_underlay_tables(&local, installed_rules);
        for (info, table) in local.into_iter().zip(tables) {
            let (Some(dev), Some(gateway)) = (info.forward_interface.as_deref(), info.gateway)
            else {
                warn!(cidr = %info.cidr, "Local underlay subnet lacks interface or gateway");
                continue;
            };
            desired.routes.insert(RouteEntry::link(table, info.cidr, dev));
            desired
                .routes
                .insert(RouteEntry::via(table, default_route(self.family), gateway, dev));
            desired.rules.insert(PolicyRule {
                priority: s.underlay_rule_priority,
                from: Some(info.cidr),
                table,
            });
        }

        Ok(desired)
    }

    /// Picks a routing table for each local underlay subnet, in order.
    ///
    /// A subnet whose `from <cidr>` rule is installed at the underlay
    /// priority keeps that rule's table. The others take the lowest table in
    /// the span that no subnet was given and no installed rule points at,
    /// falling back to tables held only by rules about to be removed.
    /// The caller has checked that the span is large enough.
    fn assign_underlay_tables(
        &self,
        local: &[&SubnetInfo],
        installed_rules: &BTreeSet<PolicyRule>,
    ) -> Vec<u32> {
        let s = &self.settings;
        let underlay_rules: Vec<&PolicyRule> = installed_rules
            .iter()
            .filter(|r| {
                r.priority == s.underlay_rule_priority
                    && r.table != s.overlay_table
                    && s.owns_table(r.table)
            })
            .collect();

        let mut taken = BTreeSet::new();
        let mut tables: Vec<Option<u32>> = Vec::with_capacity(local.len());
        for info in local {
            let kept = underlay_rules
                .iter()
                .filter(|r| r.from == Some(info.cidr))
                .map(|r| r.table)
                .find(|t| !taken.contains(t));
            if let Some(table) = kept {
                taken.insert(table);
            }
            tables.push(kept);
        }

        let occupied: BTreeSet<u32> = underlay_rules.iter().map(|r| r.table).collect();
        let span = s.underlay_table_base..s.underlay_table_base + s.underlay_table_span;
        tables
            .into_iter()
            .map(|kept| {
                kept.unwrap_or_else(|| {
                    let table = span
                        .clone()
                        .find(|t| !taken.contains(t) && !occupied.contains(t))
                        .or_else(|| span.clone().find(|t| !taken.contains(t)))
                        .unwrap_or(s.underlay_table_base);
                    taken.insert(table);
                    table
                })
            })
            .collect()
    }

    /// Converges the kernel to the staged infos.
    ///
    /// Only entries this manager owns are read or removed. Entries that are
    /// already correct are left alone. On failure every remaining change is
    /// still attempted and the error carries what was and was not applied.
    #[instrument(skip(self), fields(family = ?self.family))]
    pub async fn sync_routes(&mut self) -> RouteMgrResult<SyncReport> {
        let family = self.family;
        let s = self.settings;

        let actual_routes: BTreeSet<RouteEntry> = self
            .host
            .list_routes(family)
            .await
            .map_err(|e| RouteMgrError::sync(family, SyncDelta::default(), e.to_string()))?
            .into_iter()
            .filter(|r| s.owns_table(r.table))
            .collect();
        let actual_rules: BTreeSet<PolicyRule> = self
            .host
            .list_rules(family)
            .await
            .map_err(|e| RouteMgrError::sync(family, SyncDelta::default(), e.to_string()))?
            .into_iter()
            .filter(|r| s.owns_priority(r.priority))
            .collect();
        let desired = self.desired_state(&actual_rules)?;

        let changes: Vec<Change<'_>> = actual_rules
            .difference(&desired.rules)
            .map(Change::DelRule)
            .chain(actual_routes.difference(&desired.routes).map(Change::DelRoute))
            .chain(desired.routes.difference(&actual_routes).map(Change::AddRoute))
            .chain(desired.rules.difference(&actual_rules).map(Change::AddRule))
            .collect();

        let unchanged = actual_routes.intersection(&desired.routes).count()
            + actual_rules.intersection(&desired.rules).count();

        let mut report = SyncReport {
            unchanged,
            ..SyncReport::default()
        };
        let mut delta = SyncDelta::default();

        for change in &changes {
            let result = match change {
                Change::DelRule(r) => self.host.del_rule(family, r).await,
                Change::DelRoute(r) => self.host.del_route(r).await,
                Change::AddRoute(r) => self.host.add_route(r).await,
                Change::AddRule(r) => self.host.add_rule(family, r).await,
            };
            match result {
                Ok(()) => {
                    match change {
                        Change::DelRule(_) | Change::DelRoute(_) => report.removed += 1,
                        Change::AddRoute(_) | Change::AddRule(_) => report.added += 1,
                    }
                    info!(change = %change.describe(), "Applied");
                    delta.applied.push(change.describe());
                }
                Err(e) => {
                    warn!(change = %change.describe(), error = %e, "Failed to apply");
                    delta.failed.push(format!("{}: {}", change.describe(), e));
                }
            }
        }

        if !delta.failed.is_empty() {
            let reason = format!("{} of {} changes failed", delta.failed.len(), changes.len());
            return Err(RouteMgrError::sync(family, delta, reason));
        }

        self.publish();
        debug!(
            added = report.added,
            removed = report.removed,
            unchanged = report.unchanged,
            "Routes in sync"
        );
        Ok(report)
    }

    fn publish(&self) {
        let snapshot = RouteSnapshot {
            family: self.family,
            subnets: self.subnet_infos.clone(),
            remote_subnets: self.remote_infos.clone(),
        };
        *self.published.write() = Arc::new(snapshot);
    }
}

fn overlaps(a: &IpNet, b: &IpNet) -> bool {
    a.contains(b) || b.contains(a)
}

fn default_route(family: IpFamily) -> IpNet {
    match family {
        IpFamily::V4 => IpNet::V4(Ipv4Net::new_assert(Ipv4Addr::UNSPECIFIED, 0)),
        IpFamily::V6 => IpNet::V6(Ipv6Net::new_assert(Ipv6Addr::UNSPECIFIED, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::{parse_range, parse_remote_range};
    use hybridnet_test::{v4_range, v6_range, FakeHost, HostVerifier};
    use hybridnet_types::AddressRange;
    use pretty_assertions::assert_eq;

    fn local_underlay(cidr: &str, gw: &str, dev: &str) -> SubnetInfo {
        let range = parse_range("t", &v4_range(cidr, gw)).unwrap();
        SubnetInfo::new(range, Some(dev.to_string()), false, false, true)
    }

    fn remote_underlay(cidr: &str, gw: &str) -> SubnetInfo {
        let range = parse_range("t", &v4_range(cidr, gw)).unwrap();
        SubnetInfo::new(range, None, false, false, false)
    }

    fn overlay(cidr: &str, gw: &str, dev: &str) -> SubnetInfo {
        let range = parse_range("t", &v4_range(cidr, gw)).unwrap();
        SubnetInfo::new(range, Some(dev.to_string()), true, true, false)
    }

    fn remote(cidr: &str, is_overlay: bool) -> RemoteSubnetInfo {
        let range = parse_remote_range("r", &AddressRange::new(IpFamily::V4, cidr)).unwrap();
        RemoteSubnetInfo::new(range, is_overlay)
    }

    fn manager(host: &Arc<FakeHost>) -> RouteManager {
        RouteManager::new(IpFamily::V4, RoutingSettings::default(), host.clone())
    }

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn test_settings_ownership() {
        let s = RoutingSettings::default();
        assert!(s.owns_table(40000));
        assert!(s.owns_table(10000));
        assert!(s.owns_table(19999));
        assert!(!s.owns_table(20000));
        assert!(!s.owns_table(254));
        assert!(s.owns_priority(19000));
        assert!(!s.owns_priority(32766));
        s.validate().unwrap();
    }

    #[test]
    fn test_settings_validation() {
        let overlapping = RoutingSettings {
            overlay_table: 10005,
            ..RoutingSettings::default()
        };
        assert!(overlapping.validate().is_err());

        let same_priority = RoutingSettings {
            underlay_rule_priority: 19000,
            ..RoutingSettings::default()
        };
        assert!(same_priority.validate().is_err());
    }

    #[test]
    fn test_desired_state_underlay_local() {
        let host = Arc::new(FakeHost::new());
        let mut mgr = manager(&host);
        mgr.add_subnet_info(local_underlay("10.0.1.0/24", "10.0.1.1", "eth0.11")).unwrap();
        mgr.add_subnet_info(local_underlay("10.0.0.0/24", "10.0.0.1", "eth0.10")).unwrap();

        let desired = mgr.desired_state(&BTreeSet::new()).unwrap();

        let expected_routes: BTreeSet<RouteEntry> = [
            RouteEntry::link(10000, net("10.0.0.0/24"), "eth0.10"),
            RouteEntry::via(10000, net("0.0.0.0/0"), "10.0.0.1".parse().unwrap(), "eth0.10"),
            RouteEntry::link(10001, net("10.0.1.0/24"), "eth0.11"),
            RouteEntry::via(10001, net("0.0.0.0/0"), "10.0.1.1".parse().unwrap(), "eth0.11"),
        ]
        .into_iter()
        .collect();
        assert_eq!(desired.routes, expected_routes);

        let expected_rules: BTreeSet<PolicyRule> = [
            PolicyRule {
                priority: 20000,
                from: Some(net("10.0.0.0/24")),
                table: 10000,
            },
            PolicyRule {
                priority: 20000,
                from: Some(net("10.0.1.0/24")),
                table: 10001,
            },
        ]
        .into_iter()
        .collect();
        assert_eq!(desired.rules, expected_rules);
    }

    #[test]
    fn test_installed_rules_keep_their_tables() {
        let host = Arc::new(FakeHost::new());
        let mut mgr = manager(&host);
        mgr.add_subnet_info(local_underlay("10.0.0.0/24", "10.0.0.1", "eth0.10")).unwrap();
        mgr.add_subnet_info(local_underlay("10.0.1.0/24", "10.0.1.1", "eth0.11")).unwrap();
        mgr.add_subnet_info(local_underlay("10.0.2.0/24", "10.0.2.1", "eth0.12")).unwrap();

        let installed: BTreeSet<PolicyRule> = [
            PolicyRule {
                priority: 20000,
                from: Some(net("10.0.1.0/24")),
                table: 10000,
            },
            PolicyRule {
                priority: 20000,
                from: Some(net("10.9.0.0/24")),
                table: 10001,
            },
        ]
        .into_iter()
        .collect();

        let desired = mgr.desired_state(&installed).unwrap();
        let tables: Vec<(IpNet, u32)> = desired
            .rules
            .iter()
            .filter_map(|r| r.from.map(|from| (from, r.table)))
            .collect();

        assert_eq!(
            tables,
            vec![
                (net("10.0.0.0/24"), 10002),
                (net("10.0.1.0/24"), 10000),
                (net("10.0.2.0/24"), 10003),
            ]
        );
    }

    #[test]
    fn test_desired_state_overlay_with_remotes() {
        let host = Arc::new(FakeHost::new());
        let mut mgr = manager(&host);
        mgr.add_subnet_info(overlay("192.168.0.0/24", "192.168.0.1", "eth0.vxlan4")).unwrap();
        mgr.add_subnet_info(remote_underlay("10.0.0.0/24", "10.0.0.1")).unwrap();
        mgr.add_remote_subnet_info(remote("172.16.0.0/16", true)).unwrap();
        mgr.add_remote_subnet_info(remote("172.17.0.0/16", false)).unwrap();

        let desired = mgr.desired_state(&BTreeSet::new()).unwrap();

        let expected: BTreeSet<RouteEntry> = [
            RouteEntry::link(40000, net("192.168.0.0/24"), "eth0.vxlan4"),
            RouteEntry::throw(40000, net("10.0.0.0/24")),
            RouteEntry::link(40000, net("172.16.0.0/16"), "eth0.vxlan4"),
            RouteEntry::throw(40000, net("172.17.0.0/16")),
        ]
        .into_iter()
        .collect();
        assert_eq!(desired.routes, expected);
        assert_eq!(
            desired.rules.into_iter().collect::<Vec<_>>(),
            vec![PolicyRule {
                priority: 19000,
                from: None,
                table: 40000
            }]
        );
    }

    #[test]
    fn test_no_overlay_table_without_overlay_routes() {
        let host = Arc::new(FakeHost::new());
        let mut mgr = manager(&host);
        mgr.add_subnet_info(remote_underlay("10.0.0.0/24", "10.0.0.1")).unwrap();
        mgr.add_remote_subnet_info(remote("172.16.0.0/16", true)).unwrap();

        let desired = mgr.desired_state(&BTreeSet::new()).unwrap();
        assert!(desired.routes.is_empty());
        assert!(desired.rules.is_empty());
    }

    #[test]
    fn test_remote_conflicts() {
        let host = Arc::new(FakeHost::new());
        let mut mgr = manager(&host);
        mgr.add_subnet_info(remote_underlay("10.0.0.0/24", "10.0.0.1")).unwrap();

        let err = mgr.add_remote_subnet_info(remote("10.0.0.0/16", false)).unwrap_err();
        assert!(matches!(err, RouteMgrError::RemoteSubnetConflict { ref existing, .. } if existing == "10.0.0.0/24"));

        mgr.add_remote_subnet_info(remote("10.1.0.0/16", true)).unwrap();
        assert!(mgr.add_remote_subnet_info(remote("10.1.2.0/24", true)).is_err());
        assert_eq!(mgr.remote_subnet_infos().len(), 1);
    }

    #[test]
    fn test_add_subnet_info_does_not_dedup() {
        let host = Arc::new(FakeHost::new());
        let mut mgr = manager(&host);
        mgr.add_subnet_info(remote_underlay("10.0.0.0/24", "10.0.0.1")).unwrap();
        mgr.add_subnet_info(remote_underlay("10.0.0.0/24", "10.0.0.1")).unwrap();
        assert_eq!(mgr.subnet_infos().len(), 2);

        mgr.reset_infos();
        assert!(mgr.subnet_infos().is_empty());
    }

    #[test]
    fn test_wrong_family_subnet_is_rejected() {
        let host = Arc::new(FakeHost::new());
        let mut mgr = manager(&host);
        let range = parse_range("t", &v6_range("fd00::/64", "fd00::1")).unwrap();
        let err = mgr
            .add_subnet_info(SubnetInfo::new(range, Some("eth0".into()), false, false, true))
            .unwrap_err();
        assert!(err.to_string().contains("not an ipv4 network"));
        assert!(mgr.subnet_infos().is_empty());

        let remote = parse_remote_range("r", &AddressRange::new(IpFamily::V6, "fd01::/64")).unwrap();
        assert!(mgr
            .add_remote_subnet_info(RemoteSubnetInfo::new(remote, true))
            .is_err());
    }

    #[test]
    fn test_span_exhaustion_is_sync_error() {
        let host = Arc::new(FakeHost::new());
        let settings = RoutingSettings {
            underlay_table_span: 1,
            ..RoutingSettings::default()
        };
        let mut mgr = RouteManager::new(IpFamily::V4, settings, host.clone());
        mgr.add_subnet_info(local_underlay("10.0.0.0/24", "10.0.0.1", "eth0.10")).unwrap();
        mgr.add_subnet_info(local_underlay("10.0.1.0/24", "10.0.1.1", "eth0.11")).unwrap();

        assert!(matches!(mgr.desired_state(&BTreeSet::new()), Err(RouteMgrError::Sync { .. })));
    }

    #[tokio::test]
    async fn test_sync_installs_then_is_noop() {
        let host = Arc::new(FakeHost::new());
        let mut mgr = manager(&host);
        mgr.add_subnet_info(local_underlay("10.0.0.0/24", "10.0.0.1", "eth0.10")).unwrap();

        let first = mgr.sync_routes().await.unwrap();
        assert_eq!(
            first,
            SyncReport {
                added: 3,
                removed: 0,
                unchanged: 0
            }
        );

        host.clear_ops();
        let second = mgr.sync_routes().await.unwrap();
        assert_eq!(second.unchanged, 3);
        assert!(!second.changed());
        HostVerifier::new(&host).assert_no_mutations().unwrap();
    }

    #[tokio::test]
    async fn test_empty_desired_state_removes_owned_entries_only() {
        let host = Arc::new(FakeHost::new());
        let stale = RouteEntry::link(10003, net("10.9.0.0/24"), "eth0.9");
        let foreign = RouteEntry::link(254, net("10.9.0.0/24"), "eth0");
        host.seed_route(stale.clone());
        host.seed_route(foreign.clone());
        host.seed_rule(
            IpFamily::V4,
            PolicyRule {
                priority: 20000,
                from: Some(net("10.9.0.0/24")),
                table: 10003,
            },
        );
        host.seed_rule(
            IpFamily::V4,
            PolicyRule {
                priority: 32766,
                from: None,
                table: 254,
            },
        );

        let mut mgr = manager(&host);
        mgr.reset_infos();
        let report = mgr.sync_routes().await.unwrap();

        assert_eq!(report.removed, 2);
        assert_eq!(report.added, 0);
        assert_eq!(host.routes(IpFamily::V4), vec![foreign]);
        assert_eq!(host.rules(IpFamily::V4).len(), 1);
        assert_eq!(
            host.ops(),
            vec![
                "rule del ipv4 from 10.9.0.0/24 lookup 10003 priority 20000",
                "route del 10.9.0.0/24 dev eth0.9 table 10003",
            ]
        );
    }

    #[tokio::test]
    async fn test_adding_lower_subnet_leaves_existing_subnet_alone() {
        let host = Arc::new(FakeHost::new());
        let mut mgr = manager(&host);
        mgr.add_subnet_info(local_underlay("10.0.1.0/24", "10.0.1.1", "eth0.11")).unwrap();
        mgr.sync_routes().await.unwrap();

        mgr.reset_infos();
        mgr.add_subnet_info(local_underlay("10.0.1.0/24", "10.0.1.1", "eth0.11")).unwrap();
        mgr.add_subnet_info(local_underlay("10.0.0.0/24", "10.0.0.1", "eth0.10")).unwrap();
        host.clear_ops();
        let report = mgr.sync_routes().await.unwrap();

        assert_eq!((report.added, report.removed, report.unchanged), (3, 0, 3));
        assert_eq!(
            host.ops(),
            vec![
                "route add 0.0.0.0/0 via 10.0.0.1 dev eth0.10 table 10001",
                "route add 10.0.0.0/24 dev eth0.10 table 10001",
                "rule add ipv4 from 10.0.0.0/24 lookup 10001 priority 20000",
            ]
        );

        mgr.reset_infos();
        mgr.add_subnet_info(local_underlay("10.0.0.0/24", "10.0.0.1", "eth0.10")).unwrap();
        host.clear_ops();
        mgr.sync_routes().await.unwrap();

        assert!(host.ops().iter().all(|op| op.contains("10.0.1.")));
        HostVerifier::new(&host)
            .assert_route(&RouteEntry::link(10001, net("10.0.0.0/24"), "eth0.10"))
            .unwrap();
    }

    #[tokio::test]
    async fn test_changed_gateway_replaces_default_route() {
        let host = Arc::new(FakeHost::new());
        let mut mgr = manager(&host);
        mgr.add_subnet_info(local_underlay("10.0.0.0/24", "10.0.0.1", "eth0.10")).unwrap();
        mgr.sync_routes().await.unwrap();

        mgr.reset_infos();
        mgr.add_subnet_info(local_underlay("10.0.0.0/24", "10.0.0.254", "eth0.10")).unwrap();
        host.clear_ops();
        let report = mgr.sync_routes().await.unwrap();

        assert_eq!((report.added, report.removed, report.unchanged), (1, 1, 2));
        assert_eq!(
            host.ops(),
            vec![
                "route del 0.0.0.0/0 via 10.0.0.1 dev eth0.10 table 10000",
                "route add 0.0.0.0/0 via 10.0.0.254 dev eth0.10 table 10000",
            ]
        );
    }

    #[tokio::test]
    async fn test_partial_failure_continues_and_reports_delta() {
        let host = Arc::new(FakeHost::new());
        host.fail_when("10.0.0.0/24 dev eth0.10");
        let mut mgr = manager(&host);
        mgr.add_subnet_info(local_underlay("10.0.0.0/24", "10.0.0.1", "eth0.10")).unwrap();
        mgr.add_subnet_info(local_underlay("10.0.1.0/24", "10.0.1.1", "eth0.11")).unwrap();

        let err = mgr.sync_routes().await.unwrap_err();
        let RouteMgrError::Sync { delta, family, .. } = err else {
            panic!("expected sync error");
        };
        assert_eq!(family, IpFamily::V4);
        assert_eq!(delta.failed.len(), 1);
        assert_eq!(delta.applied.len(), 5);
        assert!(mgr.status_handle().current().subnets.is_empty());

        host.clear_failures();
        let report = mgr.sync_routes().await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(mgr.status_handle().current().subnets.len(), 2);
    }

    #[tokio::test]
    async fn test_listing_failure_is_sync_error() {
        let host = Arc::new(FakeHost::new());
        host.fail_listing(true);
        let mut mgr = manager(&host);
        let err = mgr.sync_routes().await.unwrap_err();
        assert!(matches!(err, RouteMgrError::Sync { ref delta, .. } if delta.is_empty()));
    }

    #[tokio::test]
    async fn test_status_published_after_sync_only() {
        let host = Arc::new(FakeHost::new());
        let mut mgr = manager(&host);
        let status = mgr.status_handle();

        mgr.add_subnet_info(overlay("192.168.0.0/24", "192.168.0.1", "eth0.vxlan4")).unwrap();
        assert!(status.current().subnets.is_empty());

        mgr.sync_routes().await.unwrap();
        let snap = status.current();
        assert_eq!(snap.family, IpFamily::V4);
        assert_eq!(snap.subnets.len(), 1);
        assert!(snap.subnets[0].auto_nat_outgoing);

        mgr.reset_infos();
        assert_eq!(status.current().subnets.len(), 1);
    }
}
