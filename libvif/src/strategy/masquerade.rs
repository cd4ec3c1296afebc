use ipnetwork::{IpNetwork, Ipv4Network};
use libhandler::cidr::DEFAULT_VM_CIDR;
use libhandler::dhcp::{DhcpLauncher, DhcpLease};
use libhandler::nat::{NatParams, PortMapping};
use libhandler::Handler;
use netlink_packet_route::link::LinkMessage;
use rtnetlink::{LinkBridge, LinkDummy, LinkMessageBuilder};

use crate::cache::InterfaceCacheEntry;
use crate::domain::{DomainDevices, Interface};
use crate::error::PlugError;
use crate::strategy::StrategyCtx;
use crate::vif::Vif;

pub struct State {
    pub pod_link: LinkMessage,
    pub dummy_link: Option<LinkMessage>,
    pub bridge_link: Option<LinkMessage>,
    pub vif: Vif,
    pub gateway: Ipv4Network,
}

/// `spec.md` §4.3 `discover`: resolve the VM CIDR (falling back to
/// `DefaultVMCIDR` when the network spec doesn't supply one), derive
/// the gateway/VM addresses, and snapshot the pod link's MTU. The pod
/// link's own hardware MAC is never read here — masquerade leaves the
/// pod link untouched (`spec.md` §4.3), so the guest's MAC is either
/// the one the user pinned in `InterfaceSpec.mac_address` or, absent
/// that, left unset for `prepare` to randomly generate (`spec.md` §4.3
/// prepare step 2).
pub async fn discover(handler: &Handler, ctx: &StrategyCtx<'_>) -> Result<State, PlugError> {
    let pod_link = handler
        .link_by_name(ctx.pod_if_name)
        .await
        .map_err(PlugError::from_discovery)?;

    let cidr = ctx
        .network
        .vm_network_cidr
        .as_deref()
        .unwrap_or(DEFAULT_VM_CIDR);
    let (gateway, vm) = handler
        .get_host_and_gw_addresses_from_cidr(cidr)
        .map_err(PlugError::from_discovery)?;

    let mtu = libhandler::link::get_mtu(&pod_link.attributes);
    let mtu = libhandler::link::validate_mtu(mtu).map_err(PlugError::from_discovery)?;

    let mut vif = Vif::new(ctx.iface.name.clone());
    vif.mac = match &ctx.iface.mac_address {
        Some(s) => Some(libhandler::mac::parse_mac(s).map_err(PlugError::from_discovery)?),
        None => None,
    };
    vif.mtu = mtu;
    vif.ip = Some(vm);
    vif.gateway = Some(gateway.ip());

    Ok(State {
        pod_link,
        dummy_link: None,
        bridge_link: None,
        vif,
        gateway,
    })
}

/// `spec.md` §4.3 `prepare`'s five ordered steps: create the dummy
/// `<bridge>-nic` link and bring it up; generate a MAC if the user
/// didn't supply one; create the bridge, enslave the dummy to it, bring
/// it up, and assign the gateway address; program NAT; then start DHCP
/// bound to the bridge with the gateway as server address.
pub async fn prepare(
    handler: &Handler,
    ctx: &StrategyCtx<'_>,
    state: &mut State,
    dhcp: &dyn DhcpLauncher,
) -> Result<(), PlugError> {
    let dummy_name = format!("{}-nic", ctx.bridge_name());
    let dummy_link = match handler.link_by_name(&dummy_name).await {
        Ok(existing) => existing,
        Err(_) => {
            let msg = LinkMessageBuilder::<LinkDummy>::new(&dummy_name).build();
            handler.link_add(msg).await.map_err(PlugError::from_mutation)?;
            handler
                .link_by_name(&dummy_name)
                .await
                .map_err(PlugError::from_mutation)?
        }
    };
    handler
        .link_set_up(&dummy_link)
        .await
        .map_err(PlugError::from_mutation)?;

    if state.vif.mac.is_none() {
        state.vif.mac = Some(handler.generate_random_mac());
    }

    let bridge_name = ctx.bridge_name();
    let bridge_link = match handler.link_by_name(&bridge_name).await {
        Ok(existing) => existing,
        Err(_) => {
            let msg = LinkMessageBuilder::<LinkBridge>::new(&bridge_name).build();
            handler.link_add(msg).await.map_err(PlugError::from_mutation)?;
            handler
                .link_by_name(&bridge_name)
                .await
                .map_err(PlugError::from_mutation)?
        }
    };
    handler
        .link_set_master(&dummy_link, &bridge_link)
        .await
        .map_err(PlugError::from_mutation)?;
    handler
        .link_set_up(&bridge_link)
        .await
        .map_err(PlugError::from_mutation)?;
    handler
        .addr_add(bridge_link.header.index, IpNetwork::V4(state.gateway))
        .await
        .map_err(PlugError::from_mutation)?;

    let vm_net = state
        .vif
        .ip
        .ok_or_else(|| PlugError::Mutation("masquerade VIF has no address".to_string()))?;
    let nat_params = NatParams {
        pod_if_name: ctx.pod_if_name.to_string(),
        bridge_name: bridge_name.clone(),
        vif_ip: vm_net.ip(),
        gateway_ip: state.gateway.ip(),
        ports: ctx
            .iface
            .ports
            .iter()
            .map(|p| PortMapping {
                protocol: if p.protocol.is_empty() {
                    "tcp".to_string()
                } else {
                    p.protocol.clone()
                },
                port: p.port,
            })
            .collect(),
    };
    libhandler::nat::install_masquerade_rules(handler.nat_backend(), &nat_params)
        .map_err(PlugError::from_mutation)?;

    let lease = DhcpLease {
        ip: vm_net,
        gateway: state.gateway.ip(),
        routes: Vec::new(),
        mtu: state.vif.mtu,
        mac: state
            .vif
            .mac
            .ok_or_else(|| PlugError::Mutation("masquerade VIF has no MAC".to_string()))?,
    };
    let dhcp_options = ctx.network.dhcp_options.encode();
    dhcp.start_dhcp(&lease, state.gateway.ip(), &bridge_name, &dhcp_options)
        .map_err(PlugError::from_mutation)?;

    state.dummy_link = Some(dummy_link);
    state.bridge_link = Some(bridge_link);
    Ok(())
}

/// `spec.md` §4.3 `decorate`: unlike the other strategies, masquerade
/// describes the interface purely via its MAC/MTU; the bridge/NAT
/// plumbing is invisible to the guest.
pub fn decorate(
    ctx: &StrategyCtx<'_>,
    state: &State,
    domain: &mut DomainDevices,
) -> Result<InterfaceCacheEntry, PlugError> {
    let slot = domain
        .slot_index_by_alias(&ctx.iface.name)
        .ok_or_else(|| PlugError::Configuration(format!("no domain device slot for {}", ctx.iface.name)))?;

    let interface = Interface {
        alias: ctx.iface.name.clone(),
        mac: state.vif.mac.map(|m| m.to_string()),
        mtu: Some(state.vif.mtu.to_string()),
        model: domain.interfaces[slot].model.clone(),
    };
    domain.interfaces[slot] = interface.clone();
    Ok(InterfaceCacheEntry::Device(interface))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cidr_constant_is_the_documented_fallback() {
        assert_eq!(DEFAULT_VM_CIDR, "10.0.2.0/24");
    }
}
