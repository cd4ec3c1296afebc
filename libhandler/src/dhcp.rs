use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use macaddr::MacAddr6;

use crate::error::HandlerError;

/// An additional route to hand to the guest via DHCP option 121
/// (`Vif.Routes` in `spec.md` §3).
#[derive(Debug, Clone)]
pub struct DhcpRoute {
    pub destination: Ipv4Network,
    pub gateway: Ipv4Addr,
}

/// The subset of `Vif` the DHCP server needs to answer leases with.
#[derive(Debug, Clone)]
pub struct DhcpLease {
    pub ip: Ipv4Network,
    pub gateway: Ipv4Addr,
    pub routes: Vec<DhcpRoute>,
    pub mtu: u16,
    pub mac: MacAddr6,
}

/// The DHCP server implementation is an external collaborator
/// (`spec.md` §1's "Out of scope" list) — this engine only calls it
/// through this seam, exactly as the teacher's `libbridge` only ever
/// calls its IPAM plugin through `cni_plugin::delegation::delegate`
/// rather than embedding an IPAM implementation.
pub trait DhcpLauncher {
    fn start_dhcp(
        &self,
        lease: &DhcpLease,
        server_addr: Ipv4Addr,
        bridge_name: &str,
        options: &[u8],
    ) -> Result<(), HandlerError>;
}

/// A `DhcpLauncher` that only logs — useful where the embedding binary
/// runs its own DHCP server out-of-process (e.g. dnsmasq) and this
/// engine's only job is to record that a lease *should* be served.
pub struct LoggingDhcpLauncher;

impl DhcpLauncher for LoggingDhcpLauncher {
    fn start_dhcp(
        &self,
        lease: &DhcpLease,
        server_addr: Ipv4Addr,
        bridge_name: &str,
        options: &[u8],
    ) -> Result<(), HandlerError> {
        log::info!(
            "start_dhcp: bridge={bridge_name} server={server_addr} lease={lease:?} options_len={}",
            options.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_launcher_never_errors() {
        let lease = DhcpLease {
            ip: "10.0.0.5/24".parse().unwrap(),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            routes: vec![],
            mtu: 1500,
            mac: MacAddr6::new(2, 0, 0, 0, 0, 1),
        };
        let launcher = LoggingDhcpLauncher;
        assert!(
            launcher
                .start_dhcp(&lease, Ipv4Addr::new(169, 254, 75, 10), "k6t-eth0", &[])
                .is_ok()
        );
    }
}
