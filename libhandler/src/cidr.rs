use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

use crate::error::HandlerError;

/// The masquerade strategy's fallback VM subnet when the interface spec
/// doesn't supply one (`spec.md` §6's "VM CIDR → `DefaultVMCIDR` when
/// empty").
pub const DEFAULT_VM_CIDR: &str = "10.0.2.0/24";

fn next_ip(ip: Ipv4Addr) -> Option<Ipv4Addr> {
    let (num, overflow) = u32::from_be_bytes(ip.octets()).overflowing_add(1);
    if overflow {
        None
    } else {
        Some(Ipv4Addr::from(num.to_be_bytes()))
    }
}

/// `Handler.GetHostAndGwAddressesFromCIDR`: given `A.B.C.D/n`, returns
/// `(gateway, vm_address)` where gateway is the first usable host
/// (network address + 1) and the VM address is gateway + 1, per
/// `spec.md` §4.3's masquerade `discover`.
pub fn get_host_and_gw_addresses_from_cidr(
    cidr: &str,
) -> Result<(Ipv4Network, Ipv4Network), HandlerError> {
    let net: Ipv4Network = cidr
        .parse()
        .map_err(|_| HandlerError::InvalidAddress(cidr.to_string()))?;

    let gateway_ip = next_ip(net.network())
        .ok_or_else(|| HandlerError::InvalidAddress(format!("{cidr} has no usable host address")))?;
    let vm_ip = next_ip(gateway_ip)
        .ok_or_else(|| HandlerError::InvalidAddress(format!("{cidr} has no usable VM address")))?;

    let gateway = Ipv4Network::new(gateway_ip, net.prefix())
        .map_err(|e| HandlerError::InvalidAddress(e.to_string()))?;
    let vm = Ipv4Network::new(vm_ip, net.prefix())
        .map_err(|e| HandlerError::InvalidAddress(e.to_string()))?;
    Ok((gateway, vm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_vm_cidr_yields_10_0_2_1_and_2() {
        let (gw, vm) = get_host_and_gw_addresses_from_cidr(DEFAULT_VM_CIDR).unwrap();
        assert_eq!(gw.ip(), Ipv4Addr::new(10, 0, 2, 1));
        assert_eq!(vm.ip(), Ipv4Addr::new(10, 0, 2, 2));
        assert_eq!(gw.prefix(), 24);
    }

    #[test]
    fn rejects_garbage_cidr() {
        assert!(get_host_and_gw_addresses_from_cidr("not-a-cidr").is_err());
    }
}
