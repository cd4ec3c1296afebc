use serde::{Deserialize, Serialize};

/// The narrow slice of a libvirt domain's `<interface>` element this
/// engine touches: the alias (used to find "our" slot) plus the two
/// fields a binding strategy ever overwrites. A real deployment owns
/// the full domain-XML type; this is the seam `spec.md` §1 leaves as
/// an external collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub alias: String,
    pub mac: Option<String>,
    pub mtu: Option<String>,
    /// The libvirt device model (e.g. `"virtio"`), read by the slirp
    /// strategy before it splices the slot out (`spec.md` §4.5's
    /// `"<model.Type>,netdev=<iface.Name>"`).
    #[serde(default)]
    pub model: Option<String>,
}

/// The hypervisor launch command line's extra `-device`/`-netdev`
/// arguments, mutated by the slirp and macvtap strategies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QemuCmd {
    pub qemu_arg: Vec<String>,
}

/// The set of devices `decorate` mutates by slot index (`spec.md`
/// §4.1 step 3).
#[derive(Debug, Clone, Default)]
pub struct DomainDevices {
    pub interfaces: Vec<Interface>,
    pub qemu_cmd: QemuCmd,
}

impl DomainDevices {
    /// Scans for `Alias.Name == iface.Name`, the lookup `spec.md`
    /// §4.1 step 3 performs before any strategy touches the domain.
    pub fn slot_index_by_alias(&self, alias: &str) -> Option<usize> {
        self.interfaces.iter().position(|i| i.alias == alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_lookup_finds_matching_alias() {
        let domain = DomainDevices {
            interfaces: vec![
                Interface { alias: "eth0".to_string(), mac: None, mtu: None, model: None },
                Interface { alias: "eth1".to_string(), mac: None, mtu: None, model: None },
            ],
            qemu_cmd: QemuCmd::default(),
        };
        assert_eq!(domain.slot_index_by_alias("eth1"), Some(1));
        assert_eq!(domain.slot_index_by_alias("eth2"), None);
    }
}
