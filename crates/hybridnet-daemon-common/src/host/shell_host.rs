//! [`HostNetwork`] backed by the iproute2 `ip` tool.
//!
//! Reads use `ip -j` and parse the JSON output. Writes are plain
//! `ip route|rule|link` invocations whose argument vectors are built by the
//! pure functions at the bottom of this file.

use async_trait::async_trait;
use hybridnet_types::IpFamily;
use ipnet::IpNet;
use serde::Deserialize;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{debug, instrument};

use super::{HostNetwork, PolicyRule, RouteEntry, RouteKind, MAIN_TABLE};
use crate::error::{HostError, HostResult};
use crate::shell::{self, IP_CMD};

/// Kernel switch for IPv6 on every interface.
pub const DISABLE_IPV6_PATH: &str = "/proc/sys/net/ipv6/conf/all/disable_ipv6";

/// Host network access through `/sbin/ip`.
#[derive(Debug, Clone)]
pub struct ShellHost {
    ip_cmd: String,
    disable_ipv6_path: PathBuf,
}

impl Default for ShellHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellHost {
    pub fn new() -> Self {
        Self {
            ip_cmd: IP_CMD.to_string(),
            disable_ipv6_path: PathBuf::from(DISABLE_IPV6_PATH),
        }
    }

    /// Overrides the sysctl file consulted by `ipv6_globally_disabled`.
    pub fn with_disable_ipv6_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disable_ipv6_path = path.into();
        self
    }

    async fn ip(&self, args: &[String]) -> HostResult<String> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        shell::run_or_fail(&self.ip_cmd, &args).await
    }
}

#[async_trait]
impl HostNetwork for ShellHost {
    async fn link_exists(&self, name: &str) -> HostResult<bool> {
        let result = shell::run(&self.ip_cmd, &["link", "show", "dev", name]).await?;
        if result.success() {
            return Ok(true);
        }
        if result.stderr.contains("does not exist") {
            return Ok(false);
        }
        Err(HostError::ShellCommandFailed {
            command: shell::render(&self.ip_cmd, &["link", "show", "dev", name]),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }

    #[instrument(skip(self))]
    async fn add_vlan_link(&self, base: &str, name: &str, vlan_id: u16) -> HostResult<()> {
        self.ip(&vlan_link_add_args(base, name, vlan_id)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_link_up(&self, name: &str) -> HostResult<()> {
        self.ip(&link_up_args(name)).await?;
        Ok(())
    }

    async fn list_routes(&self, family: IpFamily) -> HostResult<Vec<RouteEntry>> {
        let args = route_show_args(family);
        let out = self.ip(&args).await?;
        parse_routes(&out, family).map_err(|message| {
            HostError::parse(
                shell::render(&self.ip_cmd, &args.iter().map(String::as_str).collect::<Vec<_>>()),
                message,
            )
        })
    }

    #[instrument(skip(self, route), fields(route = %route))]
    async fn add_route(&self, route: &RouteEntry) -> HostResult<()> {
        self.ip(&route_args("add", route)).await?;
        Ok(())
    }

    #[instrument(skip(self, route), fields(route = %route))]
    async fn del_route(&self, route: &RouteEntry) -> HostResult<()> {
        self.ip(&route_args("del", route)).await?;
        Ok(())
    }

    async fn list_rules(&self, family: IpFamily) -> HostResult<Vec<PolicyRule>> {
        let args = rule_show_args(family);
        let out = self.ip(&args).await?;
        parse_rules(&out, family).map_err(|message| {
            HostError::parse(
                shell::render(&self.ip_cmd, &args.iter().map(String::as_str).collect::<Vec<_>>()),
                message,
            )
        })
    }

    #[instrument(skip(self, rule), fields(rule = %rule))]
    async fn add_rule(&self, family: IpFamily, rule: &PolicyRule) -> HostResult<()> {
        self.ip(&rule_args("add", family, rule)).await?;
        Ok(())
    }

    #[instrument(skip(self, rule), fields(rule = %rule))]
    async fn del_rule(&self, family: IpFamily, rule: &PolicyRule) -> HostResult<()> {
        self.ip(&rule_args("del", family, rule)).await?;
        Ok(())
    }

    async fn ipv6_globally_disabled(&self) -> HostResult<bool> {
        match tokio::fs::read_to_string(&self.disable_ipv6_path).await {
            Ok(value) => Ok(value.trim() == "1"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.disable_ipv6_path.display(), "IPv6 sysctl missing, treating IPv6 as disabled");
                Ok(true)
            }
            Err(e) => Err(HostError::io(self.disable_ipv6_path.display().to_string(), e)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpRouteJson {
    #[serde(default, rename = "type")]
    route_type: Option<String>,
    dst: String,
    #[serde(default)]
    gateway: Option<IpAddr>,
    #[serde(default)]
    dev: Option<String>,
    #[serde(default)]
    table: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpRuleJson {
    priority: u32,
    #[serde(default)]
    src: Option<String>,
    #[serde(default)]
    srclen: Option<u8>,
    #[serde(default)]
    table: Option<String>,
}

/// Maps an iproute2 table name to its numeric id.
fn table_id(name: Option<&str>) -> Option<u32> {
    match name {
        None | Some("main") => Some(MAIN_TABLE),
        Some("local") => Some(255),
        Some("default") => Some(253),
        Some(other) => other.parse().ok(),
    }
}

fn parse_prefix(dst: &str, family: IpFamily) -> Result<IpNet, String> {
    if dst == "default" {
        let unspecified: IpAddr = match family {
            IpFamily::V4 => IpAddr::from([0u8; 4]),
            IpFamily::V6 => IpAddr::from([0u16; 8]),
        };
        return IpNet::new(unspecified, 0).map_err(|e| e.to_string());
    }
    if dst.contains('/') {
        return dst
            .parse::<IpNet>()
            .map(|net| net.trunc())
            .map_err(|e| format!("bad prefix {dst:?}: {e}"));
    }
    let addr: IpAddr = dst.parse().map_err(|e| format!("bad address {dst:?}: {e}"))?;
    IpNet::new(addr, IpFamily::of(&addr).max_prefix_len()).map_err(|e| e.to_string())
}

/// Parses `ip -j route show table all` output.
///
/// Routes in tables without a numeric id are skipped.
pub(crate) fn parse_routes(json: &str, family: IpFamily) -> Result<Vec<RouteEntry>, String> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<IpRouteJson> = serde_json::from_str(json).map_err(|e| e.to_string())?;

    let mut routes = Vec::with_capacity(raw.len());
    for r in raw {
        let Some(table) = table_id(r.table.as_deref()) else {
            continue;
        };
        let destination = parse_prefix(&r.dst, family)?;
        let kind = match (r.route_type.as_deref(), r.gateway, r.dev) {
            (None | Some("unicast"), Some(gateway), Some(dev)) => RouteKind::Via { gateway, dev },
            (None | Some("unicast"), None, Some(dev)) => RouteKind::Link { dev },
            (Some("throw"), _, _) => RouteKind::Throw,
            (other, _, _) => RouteKind::Other {
                route_type: other.unwrap_or("unicast").to_string(),
            },
        };
        routes.push(RouteEntry {
            table,
            destination,
            kind,
        });
    }
    Ok(routes)
}

/// Parses `ip -j rule show` output.
///
/// Rules without a lookup table (goto, nop, ...) are skipped.
pub(crate) fn parse_rules(json: &str, family: IpFamily) -> Result<Vec<PolicyRule>, String> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<IpRuleJson> = serde_json::from_str(json).map_err(|e| e.to_string())?;

    let mut rules = Vec::with_capacity(raw.len());
    for r in raw {
        let Some(table) = r.table.as_deref().and_then(|t| table_id(Some(t))) else {
            continue;
        };
        let from = match r.src.as_deref() {
            None | Some("all") => None,
            Some(src) => {
                let addr: IpAddr = src.parse().map_err(|e| format!("bad source {src:?}: {e}"))?;
                let len = r.srclen.unwrap_or(family.max_prefix_len());
                Some(IpNet::new(addr, len).map_err(|e| e.to_string())?)
            }
        };
        rules.push(PolicyRule {
            priority: r.priority,
            from,
            table,
        });
    }
    Ok(rules)
}

pub(crate) fn route_show_args(family: IpFamily) -> Vec<String> {
    ["-j", family.ip_flag(), "route", "show", "table", "all"]
        .map(String::from)
        .to_vec()
}

pub(crate) fn rule_show_args(family: IpFamily) -> Vec<String> {
    ["-j", family.ip_flag(), "rule", "show"].map(String::from).to_vec()
}

pub(crate) fn vlan_link_add_args(base: &str, name: &str, vlan_id: u16) -> Vec<String> {
    vec![
        "link".into(),
        "add".into(),
        "link".into(),
        base.into(),
        "name".into(),
        name.into(),
        "type".into(),
        "vlan".into(),
        "id".into(),
        vlan_id.to_string(),
    ]
}

pub(crate) fn link_up_args(name: &str) -> Vec<String> {
    ["link", "set", "dev", name, "up"].map(String::from).to_vec()
}

/// Builds `ip -4|-6 route add|del ...` for one entry.
pub(crate) fn route_args(op: &str, route: &RouteEntry) -> Vec<String> {
    let mut args: Vec<String> = vec![route.family().ip_flag().into(), "route".into(), op.into()];
    match &route.kind {
        RouteKind::Link { dev } => {
            args.push(route.destination.to_string());
            args.extend(["dev".into(), dev.clone(), "scope".into(), "link".into()]);
        }
        RouteKind::Via { gateway, dev } => {
            args.push(route.destination.to_string());
            args.extend([
                "via".into(),
                gateway.to_string(),
                "dev".into(),
                dev.clone(),
                "onlink".into(),
            ]);
        }
        RouteKind::Throw => {
            args.push("throw".into());
            args.push(route.destination.to_string());
        }
        RouteKind::Other { route_type } => {
            args.push(route_type.clone());
            args.push(route.destination.to_string());
        }
    }
    args.push("table".into());
    args.push(route.table.to_string());
    args
}

/// Builds `ip -4|-6 rule add|del ...` for one rule.
pub(crate) fn rule_args(op: &str, family: IpFamily, rule: &PolicyRule) -> Vec<String> {
    let mut args: Vec<String> = vec![family.ip_flag().into(), "rule".into(), op.into()];
    if let Some(src) = &rule.from {
        args.push("from".into());
        args.push(src.to_string());
    }
    args.extend([
        "lookup".into(),
        rule.table.to_string(),
        "priority".into(),
        rule.priority.to_string(),
    ]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn joined(args: Vec<String>) -> String {
        args.join(" ")
    }

    #[test]
    fn test_parse_routes() {
        let json = r#"[
            {"dst":"default","gateway":"192.168.1.1","dev":"eth0","flags":[]},
            {"dst":"10.0.0.0/24","dev":"eth0.100","table":"10000","scope":"link","flags":[]},
            {"dst":"default","gateway":"10.0.0.1","dev":"eth0.100","table":"10000","flags":["onlink"]},
            {"type":"throw","dst":"10.1.0.0/24","table":"40000","flags":[]},
            {"type":"local","dst":"127.0.0.1","dev":"lo","table":"local","flags":[]}
        ]"#;
        let routes = parse_routes(json, IpFamily::V4).unwrap();

        assert_eq!(
            routes,
            vec![
                RouteEntry::via(
                    MAIN_TABLE,
                    "0.0.0.0/0".parse().unwrap(),
                    "192.168.1.1".parse().unwrap(),
                    "eth0"
                ),
                RouteEntry::link(10000, "10.0.0.0/24".parse().unwrap(), "eth0.100"),
                RouteEntry::via(
                    10000,
                    "0.0.0.0/0".parse().unwrap(),
                    "10.0.0.1".parse().unwrap(),
                    "eth0.100"
                ),
                RouteEntry::throw(40000, "10.1.0.0/24".parse().unwrap()),
                RouteEntry {
                    table: 255,
                    destination: "127.0.0.1/32".parse().unwrap(),
                    kind: RouteKind::Other {
                        route_type: "local".into()
                    },
                },
            ]
        );
    }

    #[test]
    fn test_parse_routes_v6_default_and_unknown_table() {
        let json = r#"[
            {"dst":"default","gateway":"fd00::1","dev":"eth0.100","table":"10001"},
            {"dst":"fd01::/64","dev":"eth0","table":"custom"}
        ]"#;
        let routes = parse_routes(json, IpFamily::V6).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].destination, "::/0".parse::<IpNet>().unwrap());
        assert_eq!(routes[0].table, 10001);
    }

    #[test]
    fn test_parse_routes_empty_and_garbage() {
        assert!(parse_routes("", IpFamily::V4).unwrap().is_empty());
        assert!(parse_routes("[]", IpFamily::V4).unwrap().is_empty());
        assert!(parse_routes("not json", IpFamily::V4).is_err());
    }

    #[test]
    fn test_parse_rules() {
        let json = r#"[
            {"priority":0,"src":"all","table":"local"},
            {"priority":19000,"src":"all","table":"40000"},
            {"priority":20000,"src":"10.0.0.0","srclen":24,"table":"10000"},
            {"priority":32766,"src":"all","table":"main"},
            {"priority":32767,"src":"all","action":"goto","target":100}
        ]"#;
        let rules = parse_rules(json, IpFamily::V4).unwrap();

        assert_eq!(
            rules,
            vec![
                PolicyRule { priority: 0, from: None, table: 255 },
                PolicyRule { priority: 19000, from: None, table: 40000 },
                PolicyRule {
                    priority: 20000,
                    from: Some("10.0.0.0/24".parse().unwrap()),
                    table: 10000
                },
                PolicyRule { priority: 32766, from: None, table: MAIN_TABLE },
            ]
        );
    }

    #[test]
    fn test_route_args() {
        let link = RouteEntry::link(10000, "10.0.0.0/24".parse().unwrap(), "eth0.100");
        assert_eq!(
            joined(route_args("add", &link)),
            "-4 route add 10.0.0.0/24 dev eth0.100 scope link table 10000"
        );

        let via = RouteEntry::via(
            10001,
            "::/0".parse().unwrap(),
            "fd00::1".parse().unwrap(),
            "eth0.200",
        );
        assert_eq!(
            joined(route_args("del", &via)),
            "-6 route del ::/0 via fd00::1 dev eth0.200 onlink table 10001"
        );

        let throw = RouteEntry::throw(40000, "10.1.0.0/16".parse().unwrap());
        assert_eq!(
            joined(route_args("add", &throw)),
            "-4 route add throw 10.1.0.0/16 table 40000"
        );
    }

    #[test]
    fn test_rule_args() {
        let rule = PolicyRule {
            priority: 20000,
            from: Some("10.0.0.0/24".parse().unwrap()),
            table: 10000,
        };
        assert_eq!(
            joined(rule_args("add", IpFamily::V4, &rule)),
            "-4 rule add from 10.0.0.0/24 lookup 10000 priority 20000"
        );

        let all = PolicyRule {
            priority: 19000,
            from: None,
            table: 40000,
        };
        assert_eq!(
            joined(rule_args("del", IpFamily::V6, &all)),
            "-6 rule del lookup 40000 priority 19000"
        );
    }

    #[test]
    fn test_link_args() {
        assert_eq!(
            joined(vlan_link_add_args("eth0", "eth0.100", 100)),
            "link add link eth0 name eth0.100 type vlan id 100"
        );
        assert_eq!(joined(link_up_args("eth0.100")), "link set dev eth0.100 up");
        assert_eq!(
            joined(route_show_args(IpFamily::V6)),
            "-j -6 route show table all"
        );
    }

    #[tokio::test]
    async fn test_ipv6_disabled_from_sysctl_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disable_ipv6");

        let host = ShellHost::new().with_disable_ipv6_path(path.clone());
        assert!(host.ipv6_globally_disabled().await.unwrap());

        std::fs::write(&path, "0\n").unwrap();
        assert!(!host.ipv6_globally_disabled().await.unwrap());

        std::fs::write(&path, "1\n").unwrap();
        assert!(host.ipv6_globally_disabled().await.unwrap());
    }
}
