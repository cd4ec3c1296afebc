use libhandler::Handler;

use crate::cache::InterfaceCacheEntry;
use crate::domain::DomainDevices;
use crate::error::PlugError;
use crate::strategy::StrategyCtx;
use crate::vif::Vif;

pub struct State {
    pub vif: Vif,
}

/// `spec.md` §4.5 `discover`: slirp is entirely userspace (QEMU's own
/// `-netdev user`) — there is no pod link to inspect, only the MAC the
/// interface spec may have pinned or a freshly generated one.
pub async fn discover(handler: &Handler, ctx: &StrategyCtx<'_>) -> Result<State, PlugError> {
    let mut vif = Vif::new(ctx.iface.name.clone());
    vif.mac = match &ctx.iface.mac_address {
        Some(s) => Some(libhandler::mac::parse_mac(s).map_err(PlugError::from_discovery)?),
        None => Some(handler.generate_random_mac()),
    };
    Ok(State { vif })
}

/// `spec.md` §4.5 `prepare`: no host network mutation at all — slirp
/// has no privileged side effects, matching `spec.md` §5's note that
/// not every strategy touches the kernel.
pub async fn prepare(_handler: &Handler, _ctx: &StrategyCtx<'_>, _state: &mut State) -> Result<(), PlugError> {
    Ok(())
}

/// `spec.md` §4.5 `decorate`: splices the domain's interface slot out
/// entirely (unlike macvtap, which only clears it — slirp has no
/// libvirt-visible device at all) and appends a single QEMU arg of the
/// shape `"<model>,netdev=<name>,id=<name>[,mac=<mac>]"`.
pub fn decorate(
    ctx: &StrategyCtx<'_>,
    state: &State,
    domain: &mut DomainDevices,
) -> Result<InterfaceCacheEntry, PlugError> {
    let slot = domain
        .slot_index_by_alias(&ctx.iface.name)
        .ok_or_else(|| PlugError::Configuration(format!("no domain device slot for {}", ctx.iface.name)))?;

    let model = domain.interfaces[slot]
        .model
        .clone()
        .unwrap_or_else(|| "virtio".to_string());
    domain.interfaces.remove(slot);

    let mut qemu_arg = format!("{model},netdev={0},id={0}", ctx.iface.name);
    if let Some(mac) = state.vif.mac {
        qemu_arg.push_str(&format!(",mac={mac}"));
    }
    domain.qemu_cmd.qemu_arg.push(qemu_arg.clone());

    Ok(InterfaceCacheEntry::QemuArg {
        values: vec![qemu_arg],
        remove_slot: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QemuCmd;

    #[test]
    fn decorate_requires_a_matching_domain_slot() {
        let mut domain = DomainDevices {
            interfaces: vec![],
            qemu_cmd: QemuCmd::default(),
        };
        let ctx = StrategyCtx {
            vmi_name: "vmi-a",
            iface: &crate::spec::InterfaceSpec {
                name: "eth0".to_string(),
                binding: crate::spec::BindingType::Slirp,
                mac_address: None,
                ports: vec![],
                sriov: false,
            },
            network: &crate::spec::NetworkSpec {
                name: "default".to_string(),
                vm_network_cidr: None,
                dhcp_options: Default::default(),
            },
            pod_if_name: "net0",
            slot_index: 0,
            vcpus: 1,
            multiqueue: false,
        };
        let state = State { vif: Vif::new("eth0") };
        assert!(decorate(&ctx, &state, &mut domain).is_err());
    }

    #[test]
    fn decorate_splices_out_the_slot_and_emits_a_single_arg() {
        let mut domain = DomainDevices {
            interfaces: vec![crate::domain::Interface {
                alias: "eth0".to_string(),
                mac: None,
                mtu: None,
                model: Some("virtio".to_string()),
            }],
            qemu_cmd: QemuCmd::default(),
        };
        let iface = crate::spec::InterfaceSpec {
            name: "eth0".to_string(),
            binding: crate::spec::BindingType::Slirp,
            mac_address: Some("52:54:00:00:00:ab".to_string()),
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
            vcpus: 1,
            multiqueue: false,
        };
        let mut state = State { vif: Vif::new("eth0") };
        state.vif.mac = Some(libhandler::mac::parse_mac("52:54:00:00:00:ab").unwrap());

        let entry = decorate(&ctx, &state, &mut domain).unwrap();
        assert!(domain.interfaces.is_empty());
        assert_eq!(domain.qemu_cmd.qemu_arg.len(), 1);
        let arg = &domain.qemu_cmd.qemu_arg[0];
        assert!(arg.starts_with("virtio,netdev=eth0,id=eth0,mac="));
        match entry {
            InterfaceCacheEntry::QemuArg { values, remove_slot } => {
                assert!(remove_slot);
                assert_eq!(values, vec![domain.qemu_cmd.qemu_arg[0].clone()]);
            }
            InterfaceCacheEntry::Device(_) => panic!("slirp must cache a QemuArg entry"),
        }
    }
}
