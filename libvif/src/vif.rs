use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use macaddr::MacAddr6;

/// An additional route the guest should receive via DHCP option 121
/// (`spec.md` §3's `Vif.Routes`).
#[derive(Debug, Clone, PartialEq)]
pub struct VifRoute {
    pub destination: Ipv4Network,
    pub gateway: Ipv4Addr,
}

/// The binding-agnostic description of a guest interface, built up by
/// `discover`/`prepare` and handed to the hypervisor device layer by
/// `decorate` (`spec.md` §3). Every strategy produces one of these
/// regardless of topology; only the fields each strategy actually
/// populates differ.
#[derive(Debug, Clone, PartialEq)]
pub struct Vif {
    pub name: String,
    pub mac: Option<MacAddr6>,
    pub ip: Option<Ipv4Network>,
    pub gateway: Option<Ipv4Addr>,
    pub mtu: u16,
    pub routes: Vec<VifRoute>,
    /// Set once `discover` finds the pod link carries no IPv4 address
    /// (`spec.md` §3/§4.2): no DHCP server is started and no address is
    /// transplanted for a layer-2 interface.
    pub is_layer2: bool,
}

impl Vif {
    pub fn new(name: impl Into<String>) -> Self {
        Vif {
            name: name.into(),
            mac: None,
            ip: None,
            gateway: None,
            mtu: 1500,
            routes: Vec::new(),
            is_layer2: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_vif_defaults_to_1500_mtu_and_no_routes() {
        let vif = Vif::new("eth0");
        assert_eq!(vif.name, "eth0");
        assert_eq!(vif.mtu, 1500);
        assert!(vif.routes.is_empty());
        assert!(vif.mac.is_none());
    }
}
