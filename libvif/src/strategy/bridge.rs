use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::{IpNetwork, Ipv4Network};
use libhandler::dhcp::{DhcpLauncher, DhcpLease, DhcpRoute};
use libhandler::Handler;
use netlink_packet_route::AddressFamily;
use netlink_packet_route::link::LinkMessage;
use rtnetlink::{LinkBridge, LinkMessageBuilder};

use crate::cache::InterfaceCacheEntry;
use crate::domain::{DomainDevices, Interface};
use crate::error::PlugError;
use crate::strategy::StrategyCtx;
use crate::vif::{Vif, VifRoute};

/// `169.254.75.1<slot>/32`, literal decimal concatenation of
/// `"169.254.75.1"` and the slot index (`spec.md` §3/§4.2) — the fake
/// gateway the guest sees regardless of the pod's real subnet.
pub fn fake_gateway(slot_index: usize) -> Ipv4Network {
    let addr: Ipv4Addr = format!("169.254.75.1{slot_index}")
        .parse()
        .expect("slot_index digit concatenation always yields a valid IPv4 literal");
    Ipv4Network::new(addr, 32).expect("/32 is always a valid prefix")
}

pub struct State {
    pub pod_link: LinkMessage,
    pub vif: Vif,
}

/// `spec.md` §4.2 `discover`: look up the pod link, snapshot its MTU,
/// then capture its original MAC — unless the user already pinned one
/// in `InterfaceSpec.mac_address`, in which case that wins (`spec.md`
/// §4.1 step 5 / §4.2's "unless the user supplied one") — then decide
/// layer-2 vs layer-3 from whether the link carries an IPv4 address. A
/// layer-3 link's address 0 becomes `Vif.IP`; its first route's gateway
/// becomes `Vif.Gateway`, and any remaining routes (after dropping the
/// default and the pod's own subnet route) become `Vif.Routes` for
/// DHCP option 121.
pub async fn discover(handler: &Handler, ctx: &StrategyCtx<'_>) -> Result<State, PlugError> {
    let pod_link = handler
        .link_by_name(ctx.pod_if_name)
        .await
        .map_err(PlugError::from_discovery)?;

    let mtu = libhandler::link::get_mtu(&pod_link.attributes);
    let mtu = libhandler::link::validate_mtu(mtu).map_err(PlugError::from_discovery)?;

    let mut vif = Vif::new(ctx.iface.name.clone());
    vif.mac = match &ctx.iface.mac_address {
        Some(s) => Some(libhandler::mac::parse_mac(s).map_err(PlugError::from_discovery)?),
        None => handler.get_mac_details(&pod_link),
    };
    vif.mtu = mtu;

    let addrs = handler
        .addr_list(pod_link.header.index, AddressFamily::Inet)
        .await
        .map_err(PlugError::from_discovery)?;

    if addrs.is_empty() {
        vif.is_layer2 = true;
    } else {
        vif.ip = match addrs[0].ipnet {
            IpNetwork::V4(net) => Some(net),
            IpNetwork::V6(_) => None,
        };

        let all_routes = handler
            .route_list(AddressFamily::Inet)
            .await
            .map_err(PlugError::from_discovery)?;
        let mut own_routes = all_routes
            .into_iter()
            .filter(|r| r.oif_index == Some(pod_link.header.index));

        let first = own_routes.next().ok_or_else(|| {
            PlugError::Discovery(format!("{} has an address but no gateway route", ctx.pod_if_name))
        })?;
        let gateway = match first.gateway {
            Some(IpAddr::V4(gw)) => gw,
            _ => {
                return Err(PlugError::Discovery(format!(
                    "{} default route has no usable IPv4 gateway",
                    ctx.pod_if_name
                )))
            }
        };
        vif.gateway = Some(gateway);
        vif.routes = filter_pod_network_routes(own_routes, vif.ip);
    }

    Ok(State { pod_link, vif })
}

/// Drops the default route (the guest already gets one from `Vif.Gateway`
/// via DHCP) and any route whose gateway is the pod's own address
/// (`spec.md` §4.2's `filterPodNetworkRoutes`). Macvtap's `discover`
/// deliberately does not apply this filter (see `DESIGN.md`).
fn filter_pod_network_routes(
    routes: impl Iterator<Item = libhandler::route::Route>,
    pod_ip: Option<Ipv4Network>,
) -> Vec<VifRoute> {
    routes
        .filter(|r| !r.is_default())
        .filter_map(|r| match (r.dst, r.gateway) {
            (Some(IpNetwork::V4(dst)), Some(IpAddr::V4(gw))) => Some(VifRoute {
                destination: dst,
                gateway: gw,
            }),
            _ => None,
        })
        .filter(|route| Some(route.gateway) != pod_ip.map(|n| n.ip()))
        .collect()
}

/// `spec.md` §4.2 `prepare`'s ordered steps: bring the pod link down,
/// steal its MAC into the `Vif` and assign a fresh one, bring it back
/// up, create/enslave the bridge, assign the fake gateway address, and
/// — for layer-3 interfaces — delete the stolen address and start DHCP
/// bound to the bridge before disabling MAC learning on the enslaved
/// port.
pub async fn prepare(
    handler: &Handler,
    ctx: &StrategyCtx<'_>,
    state: &mut State,
    dhcp: &dyn DhcpLauncher,
) -> Result<(), PlugError> {
    handler
        .link_set_down(&state.pod_link)
        .await
        .map_err(PlugError::from_mutation)?;

    let original_mac = state.vif.mac;
    let new_mac = handler
        .set_random_mac(&state.pod_link)
        .await
        .map_err(PlugError::from_mutation)?;
    state.vif.mac = original_mac.or(Some(new_mac));

    handler
        .link_set_up(&state.pod_link)
        .await
        .map_err(PlugError::from_mutation)?;

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
        .link_set_master(&state.pod_link, &bridge_link)
        .await
        .map_err(PlugError::from_mutation)?;
    handler
        .link_set_up(&bridge_link)
        .await
        .map_err(PlugError::from_mutation)?;

    let fake_addr = fake_gateway(ctx.slot_index);
    handler
        .addr_add(bridge_link.header.index, IpNetwork::V4(fake_addr))
        .await
        .map_err(PlugError::from_mutation)?;

    if !state.vif.is_layer2 {
        if let Some(ip) = state.vif.ip {
            handler
                .addr_del(state.pod_link.header.index, IpAddr::V4(ip.ip()))
                .await
                .map_err(PlugError::from_mutation)?;
        }

        let vif_ip = state
            .vif
            .ip
            .ok_or_else(|| PlugError::Mutation("layer-3 bridge VIF has no address".to_string()))?;
        let gateway = state
            .vif
            .gateway
            .ok_or_else(|| PlugError::Mutation("layer-3 bridge VIF has no gateway".to_string()))?;
        let mac = state
            .vif
            .mac
            .ok_or_else(|| PlugError::Mutation("layer-3 bridge VIF has no MAC".to_string()))?;

        let lease = DhcpLease {
            ip: vif_ip,
            gateway,
            routes: state
                .vif
                .routes
                .iter()
                .map(|r| DhcpRoute {
                    destination: r.destination,
                    gateway: r.gateway,
                })
                .collect(),
            mtu: state.vif.mtu,
            mac,
        };
        let dhcp_options = ctx.network.dhcp_options.encode();
        dhcp.start_dhcp(&lease, fake_addr.ip(), &bridge_name, &dhcp_options)
            .map_err(PlugError::from_mutation)?;
    }

    handler
        .link_set_learning_off(&state.pod_link)
        .await
        .map_err(PlugError::from_mutation)?;

    Ok(())
}

/// `spec.md` §4.2 `decorate`: write the preserved original MAC and MTU
/// into the domain device slot reserved for this interface.
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
    fn fake_gateway_concatenates_slot_index() {
        assert_eq!(fake_gateway(0).ip(), Ipv4Addr::new(169, 254, 75, 10));
        assert_eq!(fake_gateway(3).ip(), Ipv4Addr::new(169, 254, 75, 13));
        assert_eq!(fake_gateway(0).prefix(), 32);
    }
}
