//! SubnetReconciler - rebuilds and converges node routing from the store
//!
//! One pass lists every subnet, resolves its network, provisions the
//! forwarding interface, stages the result into the route manager of the
//! subnet's family, optionally stages remote subnets, then syncs IPv4 and
//! (unless globally disabled) IPv6. A successful pass ends by requesting a
//! firewall resync.

use async_trait::async_trait;
use hybridnet_daemon_common::{HostNetwork, Reconcile, Trigger};
use hybridnet_types::{IpFamily, Network, Subnet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{RouteMgrError, RouteMgrResult};
use crate::ifname::{overlay_forward_interface_name, InterfaceProvisioner};
use crate::range::{parse_range, parse_remote_range};
use crate::route_mgr::{RemoteSubnetInfo, RouteManager, RouteStatusHandle, SubnetInfo};
use crate::store::SubnetStore;

/// Node identity and feature switches used by a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerSettings {
    pub node_name: String,
    pub node_vlan_if_name: String,
    pub node_vxlan_if_name: String,
    pub multicluster_enabled: bool,
}

/// A subnet's own netID wins over its network's.
pub fn resolve_net_id(subnet: &Subnet, network: &Network) -> Option<u32> {
    subnet.spec.net_id.or(network.spec.net_id)
}

/// True if `network` is underlay and lists `node` as attached.
pub fn is_underlay_on_node(network: &Network, node: &str) -> bool {
    !network.spec.network_type.is_overlay() && network.has_node(node)
}

pub struct SubnetReconciler {
    settings: ReconcilerSettings,
    store: Arc<dyn SubnetStore>,
    host: Arc<dyn HostNetwork>,
    provisioner: InterfaceProvisioner,
    route_v4: RouteManager,
    route_v6: RouteManager,
    firewall_trigger: Trigger,
}

impl SubnetReconciler {
    /// Creates a reconciler owning the two per-family route managers.
    pub fn new(
        settings: ReconcilerSettings,
        store: Arc<dyn SubnetStore>,
        host: Arc<dyn HostNetwork>,
        route_v4: RouteManager,
        route_v6: RouteManager,
        firewall_trigger: Trigger,
    ) -> Self {
        Self {
            provisioner: InterfaceProvisioner::new(host.clone()),
            settings,
            store,
            host,
            route_v4,
            route_v6,
            firewall_trigger,
        }
    }

    pub fn route_manager(&self, family: IpFamily) -> &RouteManager {
        match family {
            IpFamily::V4 => &self.route_v4,
            IpFamily::V6 => &self.route_v6,
        }
    }

    fn route_manager_mut(&mut self, family: IpFamily) -> &mut RouteManager {
        match family {
            IpFamily::V4 => &mut self.route_v4,
            IpFamily::V6 => &mut self.route_v6,
        }
    }

    /// Published route state of both families, for readers outside the loop.
    pub fn status_handles(&self) -> (RouteStatusHandle, RouteStatusHandle) {
        (self.route_v4.status_handle(), self.route_v6.status_handle())
    }

    async fn stage_subnet(
        &mut self,
        view: &dyn SubnetStore,
        subnet: &Subnet,
    ) -> RouteMgrResult<()> {
        let network = view
            .get_network(&subnet.spec.network)
            .await?
            .ok_or_else(|| RouteMgrError::Resolution {
                subnet: subnet.name().to_string(),
                network: subnet.spec.network.clone(),
            })?;

        let is_underlay_local = is_underlay_on_node(&network, &self.settings.node_name);
        let net_id = resolve_net_id(subnet, &network);
        let range = parse_range(subnet.name(), &subnet.spec.range)?;
        let family = range.version;

        let mut forward_interface = None;
        let mut is_overlay = false;
        let mut auto_nat_outgoing = false;

        if is_underlay_local {
            forward_interface = Some(
                self.provisioner
                    .ensure_underlay_forward_interface(&self.settings.node_vlan_if_name, net_id)
                    .await?,
            );
        } else if network.spec.network_type.is_overlay() {
            forward_interface = Some(overlay_forward_interface_name(
                &self.settings.node_vxlan_if_name,
                net_id,
            )?);
            is_overlay = true;
            auto_nat_outgoing = subnet.is_auto_nat_outgoing();
        }

        debug!(
            subnet = %subnet.name(),
            cidr = %range.cidr,
            network = %network.name(),
            interface = ?forward_interface,
            is_overlay,
            is_underlay_local,
            "Staging subnet"
        );

        self.route_manager_mut(family).add_subnet_info(SubnetInfo::new(
            range,
            forward_interface,
            auto_nat_outgoing,
            is_overlay,
            is_underlay_local,
        ))
    }

    async fn stage_remote_subnets(&mut self, view: &dyn SubnetStore) -> RouteMgrResult<()> {
        let remotes = view.list_remote_subnets().await?;
        for remote in &remotes {
            let range = parse_remote_range(remote.name(), &remote.spec.range)?;
            debug!(
                remote_subnet = %remote.name(),
                cluster = %remote.spec.cluster_name,
                cidr = %range.cidr,
                "Staging remote subnet"
            );
            let family = range.version;
            self.route_manager_mut(family)
                .add_remote_subnet_info(RemoteSubnetInfo::new(range, remote.is_overlay()))?;
        }
        Ok(())
    }

    /// Runs one full pass. Any error aborts the rest of the pass.
    #[instrument(skip(self), fields(node = %self.settings.node_name))]
    pub async fn run_pass(&mut self) -> RouteMgrResult<()> {
        let view = self.store.view().await?;
        let subnets = view.list_subnets().await?;

        self.route_v4.reset_infos();
        self.route_v6.reset_infos();

        for subnet in &subnets {
            self.stage_subnet(view.as_ref(), subnet).await?;
        }

        if self.settings.multicluster_enabled {
            self.stage_remote_subnets(view.as_ref()).await?;
        }

        let v4 = self.route_v4.sync_routes().await?;
        if v4.changed() {
            info!(added = v4.added, removed = v4.removed, "IPv4 routes synced");
        }

        let ipv6_disabled = self
            .host
            .ipv6_globally_disabled()
            .await
            .map_err(|e| RouteMgrError::CapabilityCheck {
                reason: e.to_string(),
            })?;
        if ipv6_disabled {
            debug!("IPv6 globally disabled, skipping IPv6 routes");
        } else {
            let v6 = self.route_v6.sync_routes().await?;
            if v6.changed() {
                info!(added = v6.added, removed = v6.removed, "IPv6 routes synced");
            }
        }

        if !self.firewall_trigger.fire() {
            debug!("Firewall resync already pending");
        }
        Ok(())
    }
}

#[async_trait]
impl Reconcile for SubnetReconciler {
    type Error = RouteMgrError;

    fn name(&self) -> &str {
        "subnet"
    }

    async fn reconcile(&mut self) -> RouteMgrResult<()> {
        self.run_pass().await
    }
}
