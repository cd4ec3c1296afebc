use std::sync::OnceLock;

use anyhow::anyhow;
use ipnetwork::{IpNetwork, Ipv4Network};
use macaddr::MacAddr6;
use netlink_packet_route::{AddressFamily, link::LinkMessage};
use rtnetlink::Handle;

use crate::error::HandlerError;
use crate::nat::NatBackend;
use crate::{addr, cidr, link, mac, route};

/// The host capability surface `spec.md` §4.1/§6 calls `Handler`: a
/// single netlink connection shared by every strategy, plus MAC/CIDR
/// helpers and the NAT backend selector. There is exactly one
/// implementation, so this is a plain struct rather than a trait —
/// the spec's note that "a language-neutral implementation passes it
/// as an explicit context parameter" is satisfied by every strategy
/// method taking `&Handler` rather than reaching for a global.
pub struct Handler {
    handle: Handle,
    nat_backend: NatBackend,
}

static HANDLER: OnceLock<Handler> = OnceLock::new();

/// Initializes the process-global `Handler` if it hasn't been already
/// (`spec.md` §4.1 step 2, §5's "must be initialized at most once").
/// Safe to call from every `plug()` invocation.
pub fn init_handler(nat_backend: NatBackend) -> Result<&'static Handler, HandlerError> {
    if let Some(h) = HANDLER.get() {
        return Ok(h);
    }
    let (connection, handle, _) =
        rtnetlink::new_connection().map_err(|e| HandlerError::Netlink(anyhow!(e)))?;
    tokio::spawn(connection);
    let handler = Handler { handle, nat_backend };
    // Another task may have raced us; either way `HANDLER` now holds a Handler.
    let _ = HANDLER.set(handler);
    Ok(HANDLER.get().expect("set immediately above"))
}

impl Handler {
    pub async fn link_by_name(&self, name: &str) -> Result<LinkMessage, HandlerError> {
        link::link_by_name(&self.handle, name).await
    }

    pub async fn link_list(&self) -> Result<Vec<LinkMessage>, HandlerError> {
        link::link_list(&self.handle).await
    }

    pub async fn link_add(&self, msg: LinkMessage) -> Result<(), HandlerError> {
        link::link_add(&self.handle, msg).await
    }

    pub async fn link_set_up(&self, l: &LinkMessage) -> Result<(), HandlerError> {
        link::link_set_up(&self.handle, l).await
    }

    pub async fn link_set_down(&self, l: &LinkMessage) -> Result<(), HandlerError> {
        link::link_set_down(&self.handle, l).await
    }

    pub async fn link_set_master(&self, l: &LinkMessage, master: &LinkMessage) -> Result<(), HandlerError> {
        link::link_set_master(&self.handle, l, master).await
    }

    pub async fn link_set_learning_off(&self, l: &LinkMessage) -> Result<(), HandlerError> {
        link::link_set_learning_off(&self.handle, l).await
    }

    pub async fn link_set_address(&self, l: &LinkMessage, mac: MacAddr6) -> Result<(), HandlerError> {
        link::link_set_address(&self.handle, l, mac).await
    }

    pub async fn del_link(&self, l: &LinkMessage) -> Result<(), HandlerError> {
        link::del_link(&self.handle, l).await
    }

    pub async fn addr_list(&self, index: u32, family: AddressFamily) -> Result<Vec<addr::Addr>, HandlerError> {
        addr::addr_list(&self.handle, index, family).await
    }

    pub async fn addr_add(&self, index: u32, network: IpNetwork) -> Result<(), HandlerError> {
        addr::addr_add(&self.handle, index, network.ip(), network.prefix()).await
    }

    pub async fn addr_del(&self, index: u32, ip: std::net::IpAddr) -> Result<(), HandlerError> {
        addr::addr_del(&self.handle, index, ip).await
    }

    pub async fn route_list(&self, family: AddressFamily) -> Result<Vec<route::Route>, HandlerError> {
        route::route_list(&self.handle, family).await
    }

    pub fn parse_addr(&self, s: &str) -> Result<IpNetwork, HandlerError> {
        addr::parse_addr(s)
    }

    pub fn get_mac_details(&self, msg: &LinkMessage) -> Option<MacAddr6> {
        link::get_mac_address(&msg.attributes)
    }

    pub async fn set_random_mac(&self, l: &LinkMessage) -> Result<MacAddr6, HandlerError> {
        let new_mac = mac::generate_random_mac();
        self.link_set_address(l, new_mac).await?;
        Ok(new_mac)
    }

    pub fn generate_random_mac(&self) -> MacAddr6 {
        mac::generate_random_mac()
    }

    pub fn get_host_and_gw_addresses_from_cidr(
        &self,
        cidr_str: &str,
    ) -> Result<(Ipv4Network, Ipv4Network), HandlerError> {
        cidr::get_host_and_gw_addresses_from_cidr(cidr_str)
    }

    pub fn use_iptables(&self) -> bool {
        self.nat_backend == NatBackend::Iptables
    }

    pub fn nat_backend(&self) -> NatBackend {
        self.nat_backend
    }

    pub fn iptables_new_chain(&self, table: &str, chain: &str) -> Result<(), HandlerError> {
        let ipt = iptables::new(false).map_err(|e| HandlerError::Iptables(e.to_string()))?;
        ipt.new_chain(table, chain)
            .map_err(|e| HandlerError::Iptables(e.to_string()))
            .map(|_| ())
    }

    pub fn iptables_append_rule(&self, table: &str, chain: &str, rule: &str) -> Result<(), HandlerError> {
        let ipt = iptables::new(false).map_err(|e| HandlerError::Iptables(e.to_string()))?;
        ipt.append(table, chain, rule)
            .map_err(|e| HandlerError::Iptables(e.to_string()))
            .map(|_| ())
    }

    pub fn nftables_load(&self, ruleset: &str) -> Result<(), HandlerError> {
        crate::nat::nftables_load(ruleset)
    }

    pub fn nftables_new_chain(&self, table: &str, chain: &str) -> Result<(), HandlerError> {
        crate::nat::nftables_new_chain(table, chain)
    }

    pub fn nftables_append_rule(&self, table: &str, chain: &str, rule: &str) -> Result<(), HandlerError> {
        crate::nat::nftables_append_rule(table, chain, rule)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}
