//! In-memory host network
//!
//! Keeps links, routes and rules in ordered sets and behaves like the kernel
//! for the cases the daemons care about: adding an existing route or rule and
//! deleting a missing one both fail. Every mutating call is appended to an
//! operation log, including calls that fail.

use async_trait::async_trait;
use hybridnet_daemon_common::{HostError, HostNetwork, HostResult, PolicyRule, RouteEntry};
use hybridnet_types::IpFamily;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
struct State {
    links: BTreeMap<String, bool>,
    routes: BTreeSet<RouteEntry>,
    rules: BTreeSet<(IpFamily, PolicyRule)>,
    ipv6_disabled: bool,
    ipv6_check_fails: bool,
    list_fails: bool,
    fail_patterns: Vec<String>,
    ops: Vec<String>,
}

/// Fake [`HostNetwork`] for tests
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<State>,
}

fn failed(op: &str, message: &str) -> HostError {
    HostError::ShellCommandFailed {
        command: op.to_string(),
        exit_code: 2,
        output: message.to_string(),
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host with the given physical links present and up.
    pub fn with_links(links: &[&str]) -> Self {
        let host = Self::new();
        for link in links {
            host.add_link(link);
        }
        host
    }

    /// Add a physical link without logging an operation.
    pub fn add_link(&self, name: &str) {
        self.state.lock().links.insert(name.to_string(), true);
    }

    /// Seed a route as if something else had installed it.
    pub fn seed_route(&self, route: RouteEntry) {
        self.state.lock().routes.insert(route);
    }

    /// Seed a policy rule as if something else had installed it.
    pub fn seed_rule(&self, family: IpFamily, rule: PolicyRule) {
        self.state.lock().rules.insert((family, rule));
    }

    pub fn set_ipv6_disabled(&self, disabled: bool) {
        self.state.lock().ipv6_disabled = disabled;
    }

    /// Make the IPv6 capability check return an error.
    pub fn fail_ipv6_check(&self, fail: bool) {
        self.state.lock().ipv6_check_fails = fail;
    }

    /// Make route and rule listings return an error.
    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().list_fails = fail;
    }

    /// Make every mutating operation whose log line contains `pattern` fail.
    pub fn fail_when(&self, pattern: &str) {
        self.state.lock().fail_patterns.push(pattern.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_patterns.clear();
        state.ipv6_check_fails = false;
        state.list_fails = false;
    }

    pub fn has_link(&self, name: &str) -> bool {
        self.state.lock().links.contains_key(name)
    }

    pub fn link_is_up(&self, name: &str) -> bool {
        self.state.lock().links.get(name).copied().unwrap_or(false)
    }

    /// Routes of one family, in table then destination order.
    pub fn routes(&self, family: IpFamily) -> Vec<RouteEntry> {
        self.state
            .lock()
            .routes
            .iter()
            .filter(|r| r.family() == family)
            .cloned()
            .collect()
    }

    pub fn routes_in_table(&self, table: u32) -> Vec<RouteEntry> {
        self.state
            .lock()
            .routes
            .iter()
            .filter(|r| r.table == table)
            .cloned()
            .collect()
    }

    pub fn rules(&self, family: IpFamily) -> Vec<PolicyRule> {
        self.state
            .lock()
            .rules
            .iter()
            .filter(|(f, _)| *f == family)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Log of mutating operations since the last [`clear_ops`](Self::clear_ops).
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    /// Record `op` and return an error if a failure pattern matches it.
    fn begin(&self, state: &mut State, op: String) -> HostResult<String> {
        state.ops.push(op.clone());
        if state.fail_patterns.iter().any(|p| op.contains(p.as_str())) {
            return Err(failed(&op, "injected failure"));
        }
        Ok(op)
    }
}

#[async_trait]
impl HostNetwork for FakeHost {
    async fn link_exists(&self, name: &str) -> HostResult<bool> {
        Ok(self.has_link(name))
    }

    async fn add_vlan_link(&self, base: &str, name: &str, vlan_id: u16) -> HostResult<()> {
        let mut state = self.state.lock();
        let op = self.begin(&mut state, format!("link add {name} link {base} vlan {vlan_id}"))?;
        if !state.links.contains_key(base) {
            return Err(failed(&op, "Cannot find device"));
        }
        if state.links.contains_key(name) {
            return Err(failed(&op, "File exists"));
        }
        state.links.insert(name.to_string(), false);
        Ok(())
    }

    async fn set_link_up(&self, name: &str) -> HostResult<()> {
        let mut state = self.state.lock();
        let op = self.begin(&mut state, format!("link up {name}"))?;
        match state.links.get_mut(name) {
            Some(up) => {
                *up = true;
                Ok(())
            }
            None => Err(failed(&op, "Cannot find device")),
        }
    }

    async fn list_routes(&self, family: IpFamily) -> HostResult<Vec<RouteEntry>> {
        if self.state.lock().list_fails {
            return Err(failed("route show", "injected failure"));
        }
        Ok(self.routes(family))
    }

    async fn add_route(&self, route: &RouteEntry) -> HostResult<()> {
        let mut state = self.state.lock();
        let op = self.begin(&mut state, format!("route add {route}"))?;
        let clash = state
            .routes
            .iter()
            .any(|r| r.table == route.table && r.destination == route.destination);
        if clash {
            return Err(failed(&op, "File exists"));
        }
        state.routes.insert(route.clone());
        Ok(())
    }

    async fn del_route(&self, route: &RouteEntry) -> HostResult<()> {
        let mut state = self.state.lock();
        let op = self.begin(&mut state, format!("route del {route}"))?;
        if !state.routes.remove(route) {
            return Err(failed(&op, "No such process"));
        }
        Ok(())
    }

    async fn list_rules(&self, family: IpFamily) -> HostResult<Vec<PolicyRule>> {
        if self.state.lock().list_fails {
            return Err(failed("rule show", "injected failure"));
        }
        Ok(self.rules(family))
    }

    async fn add_rule(&self, family: IpFamily, rule: &PolicyRule) -> HostResult<()> {
        let mut state = self.state.lock();
        let op = self.begin(&mut state, format!("rule add {family} {rule}"))?;
        if !state.rules.insert((family, rule.clone())) {
            return Err(failed(&op, "File exists"));
        }
        Ok(())
    }

    async fn del_rule(&self, family: IpFamily, rule: &PolicyRule) -> HostResult<()> {
        let mut state = self.state.lock();
        let op = self.begin(&mut state, format!("rule del {family} {rule}"))?;
        if !state.rules.remove(&(family, rule.clone())) {
            return Err(failed(&op, "No such file or directory"));
        }
        Ok(())
    }

    async fn ipv6_globally_disabled(&self) -> HostResult<bool> {
        let state = self.state.lock();
        if state.ipv6_check_fails {
            return Err(HostError::internal("injected IPv6 capability check failure"));
        }
        Ok(state.ipv6_disabled)
    }
}
