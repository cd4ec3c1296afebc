use std::net::Ipv4Addr;
use std::process::Command;

use log::debug;

use crate::error::HandlerError;

pub const PREINBOUND: &str = "KUBEVIRT_PREINBOUND";
pub const POSTINBOUND: &str = "KUBEVIRT_POSTINBOUND";

/// A port the masquerade strategy should forward from the pod's
/// externally-visible address into the guest.
#[derive(Debug, Clone)]
pub struct PortMapping {
    pub protocol: String,
    pub port: u16,
}

/// Inputs the masquerade strategy gathers before calling into the NAT
/// rule builder (`spec.md` §4.6).
#[derive(Debug, Clone)]
pub struct NatParams {
    pub pod_if_name: String,
    pub bridge_name: String,
    pub vif_ip: Ipv4Addr,
    pub gateway_ip: Ipv4Addr,
    pub ports: Vec<PortMapping>,
}

/// Which backend `install_masquerade_rules` should target
/// (`Handler.UseIptables()` in `spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatBackend {
    Iptables,
    Nftables,
}

/// Installs the masquerade NAT rule sequence from `spec.md` §4.6,
/// switching on the configured backend. Both backends install the same
/// five numbered steps; only chain/table-name casing and the transport
/// mechanism differ.
pub fn install_masquerade_rules(backend: NatBackend, params: &NatParams) -> Result<(), HandlerError> {
    match backend {
        NatBackend::Iptables => install_iptables(params),
        NatBackend::Nftables => install_nftables(params),
    }
}

fn install_iptables(params: &NatParams) -> Result<(), HandlerError> {
    let ipt = iptables::new(false).map_err(|e| HandlerError::Iptables(e.to_string()))?;

    for chain in [PREINBOUND, POSTINBOUND] {
        ipt.new_chain("nat", chain)
            .map_err(|e| HandlerError::Iptables(e.to_string()))?;
    }

    append(&ipt, "nat", "POSTROUTING", &format!(
        "-s {}/32 -j MASQUERADE",
        params.vif_ip
    ))?;
    append(&ipt, "nat", "PREROUTING", &format!(
        "-i {} -j {}",
        params.pod_if_name, PREINBOUND
    ))?;
    append(&ipt, "nat", "POSTROUTING", &format!(
        "-o {} -j {}",
        params.bridge_name, POSTINBOUND
    ))?;

    if params.ports.is_empty() {
        append(&ipt, "nat", PREINBOUND, &format!(
            "-j DNAT --to-destination {}",
            params.vif_ip
        ))?;
    } else {
        for p in &params.ports {
            let proto = p.protocol.to_lowercase();
            append(&ipt, "nat", POSTINBOUND, &format!(
                "-p {} --dport {} -j SNAT --to-source {}",
                proto, p.port, params.gateway_ip
            ))?;
            append(&ipt, "nat", PREINBOUND, &format!(
                "-p {} --dport {} -j DNAT --to-destination {}",
                proto, p.port, params.vif_ip
            ))?;
            append(&ipt, "nat", "OUTPUT", &format!(
                "-d 127.0.0.1 -p {} --dport {} -j DNAT --to-destination {}",
                proto, p.port, params.vif_ip
            ))?;
        }
    }
    Ok(())
}

fn append(ipt: &iptables::IPTables, table: &str, chain: &str, rule: &str) -> Result<(), HandlerError> {
    debug!("iptables -t {table} -A {chain} {rule}");
    ipt.append(table, chain, rule)
        .map_err(|e| HandlerError::Iptables(e.to_string()))
        .map(|_| ())
}

/// The nftables preamble kubevirt loads before installing its own
/// chains/rules, named `ipv4-nat` per `spec.md` §4.6.
const IPV4_NAT_PREAMBLE: &str = "table ip nat {\n}\n";

fn install_nftables(params: &NatParams) -> Result<(), HandlerError> {
    nftables_load(IPV4_NAT_PREAMBLE)?;

    for chain in [PREINBOUND, POSTINBOUND] {
        nftables_new_chain("nat", &chain.to_lowercase())?;
    }

    nftables_append_rule(
        "nat",
        "postrouting",
        &format!("ip saddr {} masquerade", params.vif_ip),
    )?;
    nftables_append_rule(
        "nat",
        "prerouting",
        &format!("iifname \"{}\" jump {}", params.pod_if_name, PREINBOUND.to_lowercase()),
    )?;
    nftables_append_rule(
        "nat",
        "postrouting",
        &format!("oifname \"{}\" jump {}", params.bridge_name, POSTINBOUND.to_lowercase()),
    )?;

    if params.ports.is_empty() {
        nftables_append_rule(
            "nat",
            &PREINBOUND.to_lowercase(),
            &format!("dnat to {}", params.vif_ip),
        )?;
    } else {
        for p in &params.ports {
            let proto = p.protocol.to_lowercase();
            nftables_append_rule(
                "nat",
                &POSTINBOUND.to_lowercase(),
                &format!("{proto} dport {} snat to {}", p.port, params.gateway_ip),
            )?;
            nftables_append_rule(
                "nat",
                &PREINBOUND.to_lowercase(),
                &format!("{proto} dport {} dnat to {}", p.port, params.vif_ip),
            )?;
            nftables_append_rule(
                "nat",
                "output",
                &format!(
                    "ip daddr 127.0.0.1 {proto} dport {} dnat to {}",
                    p.port, params.vif_ip
                ),
            )?;
        }
    }
    Ok(())
}

/// Loads an nftables ruleset fragment via `nft -f -`. There is no
/// nftables crate anywhere in the retrieval corpus this workspace was
/// built from, so this follows the corpus's own precedent of shelling
/// out to a system network tool (`lambdo`'s `Command::new("ip")` calls)
/// rather than inventing a dependency.
pub fn nftables_load(ruleset: &str) -> Result<(), HandlerError> {
    run_nft(&["-f", "-"], Some(ruleset))
}

pub fn nftables_new_chain(table: &str, chain: &str) -> Result<(), HandlerError> {
    let script = format!("add chain ip {table} {chain}\n");
    run_nft(&["-f", "-"], Some(&script))
}

pub fn nftables_append_rule(table: &str, chain: &str, rule: &str) -> Result<(), HandlerError> {
    let script = format!("add rule ip {table} {chain} {rule}\n");
    run_nft(&["-f", "-"], Some(&script))
}

fn run_nft(args: &[&str], stdin_script: Option<&str>) -> Result<(), HandlerError> {
    use std::io::Write;
    use std::process::Stdio;

    debug!("nft {} <<< {:?}", args.join(" "), stdin_script);
    let mut child = Command::new("nft")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| HandlerError::Nftables(e.to_string()))?;

    if let Some(script) = stdin_script {
        child
            .stdin
            .take()
            .ok_or_else(|| HandlerError::Nftables("nft stdin unavailable".to_string()))?
            .write_all(script.as_bytes())
            .map_err(|e| HandlerError::Nftables(e.to_string()))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| HandlerError::Nftables(e.to_string()))?;
    if !output.status.success() {
        return Err(HandlerError::Nftables(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(ports: Vec<PortMapping>) -> NatParams {
        NatParams {
            pod_if_name: "eth0".to_string(),
            bridge_name: "k6t-eth0".to_string(),
            vif_ip: Ipv4Addr::new(10, 0, 2, 2),
            gateway_ip: Ipv4Addr::new(10, 0, 2, 1),
            ports,
        }
    }

    #[test]
    fn chain_names_match_spec() {
        assert_eq!(PREINBOUND, "KUBEVIRT_PREINBOUND");
        assert_eq!(POSTINBOUND, "KUBEVIRT_POSTINBOUND");
        assert_eq!(PREINBOUND.to_lowercase(), "kubevirt_preinbound");
    }

    #[test]
    fn no_ports_params_are_well_formed() {
        let p = params(vec![]);
        assert!(p.ports.is_empty());
        assert_eq!(p.vif_ip, Ipv4Addr::new(10, 0, 2, 2));
    }

    #[test]
    fn port_protocol_defaults_are_lowered_by_caller() {
        let p = params(vec![PortMapping {
            protocol: "TCP".to_string(),
            port: 80,
        }]);
        assert_eq!(p.ports[0].protocol.to_lowercase(), "tcp");
    }
}
