use std::fs::File;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use libhandler::Handler;
use netlink_packet_route::link::LinkMessage;
use netlink_packet_route::AddressFamily;

use crate::cache::InterfaceCacheEntry;
use crate::domain::{DomainDevices, Interface};
use crate::error::PlugError;
use crate::strategy::StrategyCtx;
use crate::vif::{Vif, VifRoute};

pub struct State {
    pub pod_link: LinkMessage,
    pub tap_link: LinkMessage,
    pub vif: Vif,
    pub tap_queues: Vec<File>,
}

/// `spec.md` §4.4 `discover`: look up the pod link (MTU range check),
/// then find the macvtap-kind link an external CNI has already
/// attached to it. The MAC comes from the *tap* interface, not the pod
/// link — the tap carries the guest-facing MAC. Layer-2 detection and
/// route capture otherwise follow Bridge, except that routes are never
/// filtered (see `DESIGN.md` open question 2).
pub async fn discover(handler: &Handler, ctx: &StrategyCtx<'_>) -> Result<State, PlugError> {
    let pod_link = handler
        .link_by_name(ctx.pod_if_name)
        .await
        .map_err(PlugError::from_discovery)?;

    let mtu = libhandler::link::get_mtu(&pod_link.attributes);
    libhandler::link::validate_mtu(mtu).map_err(PlugError::from_discovery)?;

    let links = handler.link_list().await.map_err(PlugError::from_discovery)?;
    let tap_link = links
        .into_iter()
        .find(|l| libhandler::link::link_kind(&l.attributes).as_deref() == Some("macvtap"))
        .ok_or_else(|| PlugError::Discovery(format!("no macvtap link found for {}", ctx.pod_if_name)))?;

    let tap_mtu = libhandler::link::get_mtu(&tap_link.attributes);
    let tap_mtu = libhandler::link::validate_mtu(tap_mtu).map_err(PlugError::from_discovery)?;

    let mut vif = Vif::new(ctx.iface.name.clone());
    vif.mac = match &ctx.iface.mac_address {
        Some(s) => Some(libhandler::mac::parse_mac(s).map_err(PlugError::from_discovery)?),
        None => handler.get_mac_details(&tap_link),
    };
    vif.mtu = tap_mtu;

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
        vif.routes = all_routes(handler, pod_link.header.index).await?;
    }

    Ok(State {
        pod_link,
        tap_link,
        vif,
        tap_queues: Vec::new(),
    })
}

/// Unlike `bridge::filter_pod_network_routes`, macvtap keeps every
/// route it observes, including the default route — the upstream
/// behavior this strategy preserves intentionally rather than aligning
/// with bridge's filtering (see `DESIGN.md`).
async fn all_routes(handler: &Handler, link_index: u32) -> Result<Vec<VifRoute>, PlugError> {
    let routes = handler
        .route_list(AddressFamily::Inet)
        .await
        .map_err(PlugError::from_discovery)?;

    Ok(routes
        .into_iter()
        .filter(|r| r.oif_index == Some(link_index))
        .filter_map(|r| match (r.dst, r.gateway) {
            (Some(IpNetwork::V4(dst)), Some(IpAddr::V4(gw))) => Some(VifRoute {
                destination: dst,
                gateway: gw,
            }),
            _ => None,
        })
        .collect())
}

/// `spec.md` §4.4 `prepare`: bring the pod link down, randomize its
/// MAC, bring it back up, then open its `/dev/tap<ifindex>` queue(s) —
/// `ctx.vcpus` of them when multiqueue is enabled, else zero — leaking
/// the fds into this process for the hypervisor to inherit (`spec.md`
/// §5 — the engine never closes them). For a layer-3 interface the
/// stolen address is finally deleted from the pod link.
pub async fn prepare(handler: &Handler, ctx: &StrategyCtx<'_>, state: &mut State) -> Result<(), PlugError> {
    handler
        .link_set_down(&state.pod_link)
        .await
        .map_err(PlugError::from_mutation)?;
    handler
        .set_random_mac(&state.pod_link)
        .await
        .map_err(PlugError::from_mutation)?;
    handler
        .link_set_up(&state.pod_link)
        .await
        .map_err(PlugError::from_mutation)?;

    let queues = if ctx.multiqueue { ctx.vcpus as usize } else { 0 };
    state.tap_queues =
        libhandler::tap::open_tap_queues(state.tap_link.header.index, queues).map_err(PlugError::from_mutation)?;

    if !state.vif.is_layer2 {
        if let Some(ip) = state.vif.ip {
            handler
                .addr_del(state.pod_link.header.index, std::net::IpAddr::V4(ip.ip()))
                .await
                .map_err(PlugError::from_mutation)?;
        }
    }

    Ok(())
}

/// `spec.md` §4.4 `decorate`: clear the domain's slot for this
/// interface (macvtap is described entirely via QEMU arguments, not a
/// libvirt `<interface>` block) and append the command-line pair
/// verbatim. Both the `id=network-1` and the `vhostfds=5,fds=6`
/// literal are kept exactly as `spec.md` §4.4 gives them — the "known
/// limitation" §9 calls out covers the whole hardcoded netdev
/// identity, not just the fd numbers; the actual fd count this engine
/// opens is `state.tap_queues.len()`, tracked separately and asserted
/// on in tests.
pub fn decorate(
    ctx: &StrategyCtx<'_>,
    state: &State,
    domain: &mut DomainDevices,
) -> Result<InterfaceCacheEntry, PlugError> {
    let slot = domain
        .slot_index_by_alias(&ctx.iface.name)
        .ok_or_else(|| PlugError::Configuration(format!("no domain device slot for {}", ctx.iface.name)))?;

    domain.interfaces[slot] = Interface {
        alias: ctx.iface.name.clone(),
        mac: None,
        mtu: None,
        model: None,
    };

    let mac = state
        .vif
        .mac
        .map(|m| m.to_string())
        .unwrap_or_else(|| "00:00:00:00:00:00".to_string());
    let netdev_arg = "-netdev tap,id=network-1,vhost=on,vhostfds=5,fds=6".to_string();
    let device_arg = format!(
        "-device driver=virtio-net-pci,netdev=network-1,mac={mac},disable-modern=false,mq=on,vectors=4,romfile="
    );
    domain.qemu_cmd.qemu_arg.push(netdev_arg.clone());
    domain.qemu_cmd.qemu_arg.push(device_arg.clone());

    Ok(InterfaceCacheEntry::QemuArg {
        values: vec![netdev_arg, device_arg],
        remove_slot: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_count_is_zero_without_multiqueue() {
        let multiqueue = false;
        let vcpus: u32 = 4;
        let queues = if multiqueue { vcpus as usize } else { 0 };
        assert_eq!(queues, 0);
    }

    #[test]
    fn queue_count_matches_vcpus_with_multiqueue() {
        let multiqueue = true;
        let vcpus: u32 = 4;
        let queues = if multiqueue { vcpus as usize } else { 0 };
        assert_eq!(queues, 4);
    }

    #[test]
    fn decorate_clears_the_slot_and_emits_the_literal_qemu_arg_pair() {
        let mut domain = DomainDevices {
            interfaces: vec![Interface {
                alias: "eth0".to_string(),
                mac: Some("stale".to_string()),
                mtu: Some("stale".to_string()),
                model: Some("virtio".to_string()),
            }],
            qemu_cmd: crate::domain::QemuCmd::default(),
        };
        let iface = crate::spec::InterfaceSpec {
            name: "eth0".to_string(),
            binding: crate::spec::BindingType::Macvtap,
            mac_address: None,
            ports: vec![],
            sriov: false,
        };
        let network = crate::spec::NetworkSpec {
            name: "default".to_string(),
            vm_network_cidr: None,
            dhcp_options: Default::default(),
        };
        let ctx = StrategyCtx {
            vmi_name: "vmi-a",
            iface: &iface,
            network: &network,
            pod_if_name: "net0",
            slot_index: 0,
            vcpus: 4,
            multiqueue: true,
        };
        let mut vif = Vif::new("eth0");
        vif.mac = Some(macaddr::MacAddr6::new(2, 0, 0, 0, 0, 1));
        let state = State {
            pod_link: LinkMessage::default(),
            tap_link: LinkMessage::default(),
            vif,
            tap_queues: Vec::new(),
        };

        let entry = decorate(&ctx, &state, &mut domain).unwrap();

        assert_eq!(domain.interfaces[0].mac, None);
        assert_eq!(domain.interfaces[0].mtu, None);
        assert_eq!(
            domain.qemu_cmd.qemu_arg,
            vec![
                "-netdev tap,id=network-1,vhost=on,vhostfds=5,fds=6".to_string(),
                "-device driver=virtio-net-pci,netdev=network-1,mac=02:00:00:00:00:01,disable-modern=false,mq=on,vectors=4,romfile=".to_string(),
            ]
        );
        match entry {
            InterfaceCacheEntry::QemuArg { values, remove_slot } => {
                assert!(!remove_slot);
                assert_eq!(values, domain.qemu_cmd.qemu_arg);
            }
            InterfaceCacheEntry::Device(_) => panic!("macvtap must cache a QemuArg entry"),
        }
    }
}
