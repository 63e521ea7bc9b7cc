//! Forwarding interface naming and provisioning.
//!
//! Names are a pure function of `(base device, netID)`, so this daemon and
//! the overlay device agent compute the same name independently. Names that
//! do not fit the kernel limit are rejected, never truncated.

use hybridnet_daemon_common::HostNetwork;
use hybridnet_types::{VlanId, Vni};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{RouteMgrError, RouteMgrResult};

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
pub const MAX_IFNAME_LEN: usize = 15;

/// Infix between the base device and the VNI in overlay interface names.
pub const VXLAN_INFIX: &str = ".vxlan";

fn check_name(name: String) -> RouteMgrResult<String> {
    if name.len() > MAX_IFNAME_LEN {
        return Err(RouteMgrError::provision(
            name.clone(),
            format!("name is longer than {MAX_IFNAME_LEN} bytes"),
        ));
    }
    Ok(name)
}

fn check_base(base: &str) -> RouteMgrResult<()> {
    if base.is_empty() || base.contains(['/', ' ']) {
        return Err(RouteMgrError::provision(base, "invalid base device name"));
    }
    Ok(())
}

/// Returns `<base>.<vlan>`.
pub fn vlan_interface_name(base: &str, vlan: VlanId) -> RouteMgrResult<String> {
    check_base(base)?;
    check_name(format!("{base}.{vlan}"))
}

/// Returns the overlay forwarding interface name `<base>.vxlan<vni>`.
///
/// Nothing is created here; the overlay device agent owns the device.
pub fn overlay_forward_interface_name(base: &str, net_id: Option<u32>) -> RouteMgrResult<String> {
    check_base(base)?;
    // netID 0 means untagged, which has no VNI.
    let id = match net_id {
        None | Some(0) => {
            return Err(RouteMgrError::provision(
                format!("{base}{VXLAN_INFIX}"),
                "overlay network has no netID",
            ))
        }
        Some(id) => id,
    };
    let vni = Vni::new(id).map_err(|e| RouteMgrError::provision(format!("{base}{VXLAN_INFIX}{id}"), e))?;
    check_name(format!("{base}{VXLAN_INFIX}{vni}"))
}

/// Ensures underlay forwarding interfaces exist on the host.
pub struct InterfaceProvisioner {
    host: Arc<dyn HostNetwork>,
}

impl InterfaceProvisioner {
    pub fn new(host: Arc<dyn HostNetwork>) -> Self {
        Self { host }
    }

    /// Returns the forwarding interface for an underlay network, creating
    /// the VLAN sub-interface if it is missing.
    ///
    /// A `net_id` of `None` or 0 means untagged: the base device itself is
    /// used and must already exist. Calling this again with the same
    /// arguments changes nothing.
    #[instrument(skip(self))]
    pub async fn ensure_underlay_forward_interface(
        &self,
        base: &str,
        net_id: Option<u32>,
    ) -> RouteMgrResult<String> {
        check_base(base)?;

        let id = match net_id {
            None | Some(0) => {
                self.require_link(base).await?;
                return Ok(base.to_string());
            }
            Some(id) => id,
        };

        let vlan = VlanId::new(id).map_err(|e| RouteMgrError::provision(format!("{base}.{id}"), e))?;
        let name = vlan_interface_name(base, vlan)?;

        if self.exists(&name).await? {
            debug!(interface = %name, "VLAN interface already present");
            return Ok(name);
        }

        self.require_link(base).await?;
        self.host
            .add_vlan_link(base, &name, vlan.as_u16())
            .await
            .map_err(|e| RouteMgrError::provision(name.clone(), e))?;
        self.host
            .set_link_up(&name)
            .await
            .map_err(|e| RouteMgrError::provision(name.clone(), e))?;

        info!(interface = %name, base = %base, vlan = %vlan, "Created VLAN forwarding interface");
        Ok(name)
    }

    async fn exists(&self, name: &str) -> RouteMgrResult<bool> {
        self.host
            .link_exists(name)
            .await
            .map_err(|e| RouteMgrError::provision(name, e))
    }

    async fn require_link(&self, name: &str) -> RouteMgrResult<()> {
        if self.exists(name).await? {
            Ok(())
        } else {
            Err(RouteMgrError::provision(name, "device does not exist"))
        }
    }
}
