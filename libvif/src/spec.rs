use serde::{Deserialize, Serialize};

/// Which topology a guest interface should use (`spec.md` §2's
/// `BindingStrategy` tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BindingType {
    Bridge,
    Masquerade,
    Macvtap,
    Slirp,
}

/// A port the masquerade strategy should forward from the pod's
/// externally-visible address into the guest (`spec.md` §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMappingSpec {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub port: u16,
}

/// `spec.md` §6's "port protocol → `tcp` when empty".
fn default_protocol() -> String {
    "tcp".to_string()
}

/// The per-interface configuration `plug()` is invoked with, shaped
/// the way the teacher's `BridgeNetConf` is: a `serde` struct with
/// `camelCase` wire names deserialized from the owning controller's
/// config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceSpec {
    pub name: String,
    pub binding: BindingType,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortMappingSpec>,
    /// Set when an external SR-IOV device plumbing path already owns
    /// this interface (`spec.md` §4.1 step 1, §1's "Out of scope: ...
    /// SR-IOV device plumbing"). `plug()` short-circuits to success
    /// without looking at `binding` at all.
    #[serde(default)]
    pub sriov: bool,
}

/// DHCP-related options threaded to `DhcpLauncher::start_dhcp`
/// (`spec.md` §3's `DhcpOptions`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhcpOptionsSpec {
    pub mtu: Option<u16>,
}

impl DhcpOptionsSpec {
    /// Encodes the configured overrides into the raw DHCP-options byte
    /// sequence `DhcpLauncher::start_dhcp`'s `options` parameter expects
    /// (`spec.md` §4.2 step 6 / §4.6's `iface.DHCPOptions`). Only the
    /// interface-MTU override is modeled today (DHCP option 26, a
    /// tag/length/value triplet); an unset `mtu` encodes to nothing.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        if let Some(mtu) = self.mtu {
            bytes.push(26);
            bytes.push(2);
            bytes.extend_from_slice(&mtu.to_be_bytes());
        }
        bytes
    }
}

/// The network this interface attaches to. `vm_network_cidr` only
/// matters to the masquerade strategy, which falls back to
/// `libhandler::cidr::DEFAULT_VM_CIDR` when it is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    pub name: String,
    #[serde(default)]
    pub vm_network_cidr: Option<String>,
    #[serde(default)]
    pub dhcp_options: DhcpOptionsSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_spec_deserializes_camel_case() {
        let json = r#"{"name":"eth0","binding":"bridge","macAddress":"02:00:00:00:00:01"}"#;
        let spec: InterfaceSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.name, "eth0");
        assert_eq!(spec.binding, BindingType::Bridge);
        assert_eq!(spec.mac_address.as_deref(), Some("02:00:00:00:00:01"));
        assert!(spec.ports.is_empty());
    }

    #[test]
    fn network_spec_defaults_cidr_and_dhcp_options() {
        let json = r#"{"name":"default"}"#;
        let spec: NetworkSpec = serde_json::from_str(json).unwrap();
        assert!(spec.vm_network_cidr.is_none());
        assert!(spec.dhcp_options.mtu.is_none());
    }

    #[test]
    fn dhcp_options_with_no_mtu_encodes_to_nothing() {
        assert!(DhcpOptionsSpec::default().encode().is_empty());
    }

    #[test]
    fn dhcp_options_mtu_encodes_as_option_26() {
        let opts = DhcpOptionsSpec { mtu: Some(1500) };
        assert_eq!(opts.encode(), vec![26, 2, 0x05, 0xdc]);
    }
}
