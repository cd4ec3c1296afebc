pub mod bridge;
pub mod macvtap;
pub mod masquerade;
pub mod slirp;

use libhandler::dhcp::DhcpLauncher;
use libhandler::Handler;

use crate::cache::InterfaceCacheEntry;
use crate::domain::DomainDevices;
use crate::error::PlugError;
use crate::spec::{BindingType, InterfaceSpec, NetworkSpec};

/// Immutable inputs every strategy needs, threaded through the whole
/// select → loadCache → discover → prepare → decorate → writeCache
/// pipeline (`spec.md` §3.4).
pub struct StrategyCtx<'a> {
    pub vmi_name: &'a str,
    pub iface: &'a InterfaceSpec,
    pub network: &'a NetworkSpec,
    pub pod_if_name: &'a str,
    pub slot_index: usize,
    /// The guest's vCPU count, consulted only by macvtap's tap-queue
    /// count (`spec.md` §4.4: "queues = vcpu.CPUs if multi-queue flag
    /// is on, else 0").
    pub vcpus: u32,
    pub multiqueue: bool,
}

impl<'a> StrategyCtx<'a> {
    /// `k6t-<pod-if>` (`spec.md` §6 naming conventions).
    pub fn bridge_name(&self) -> String {
        format!("k6t-{}", self.pod_if_name)
    }
}

/// Per-variant discovery/prepare state, populated once `discover` (or a
/// cache hit) fills it in.
pub enum StrategyState {
    Bridge(bridge::State),
    Masquerade(masquerade::State),
    Macvtap(macvtap::State),
    Slirp(slirp::State),
}

/// The tagged-enum driver `spec.md` §9's REDESIGN FLAG calls for: one
/// variant per topology, one `match` per pipeline step instead of a
/// class hierarchy of strategy objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStrategy {
    Bridge,
    Masquerade,
    Macvtap,
    Slirp,
}

impl BindingStrategy {
    pub fn select(iface: &InterfaceSpec) -> Self {
        match iface.binding {
            BindingType::Bridge => BindingStrategy::Bridge,
            BindingType::Masquerade => BindingStrategy::Masquerade,
            BindingType::Macvtap => BindingStrategy::Macvtap,
            BindingType::Slirp => BindingStrategy::Slirp,
        }
    }

    pub async fn discover(&self, handler: &Handler, ctx: &StrategyCtx<'_>) -> Result<StrategyState, PlugError> {
        match self {
            BindingStrategy::Bridge => bridge::discover(handler, ctx).await.map(StrategyState::Bridge),
            BindingStrategy::Masquerade => masquerade::discover(handler, ctx).await.map(StrategyState::Masquerade),
            BindingStrategy::Macvtap => macvtap::discover(handler, ctx).await.map(StrategyState::Macvtap),
            BindingStrategy::Slirp => slirp::discover(handler, ctx).await.map(StrategyState::Slirp),
        }
    }

    pub async fn prepare(
        &self,
        handler: &Handler,
        ctx: &StrategyCtx<'_>,
        state: &mut StrategyState,
        dhcp: &dyn DhcpLauncher,
    ) -> Result<(), PlugError> {
        match (self, state) {
            (BindingStrategy::Bridge, StrategyState::Bridge(s)) => bridge::prepare(handler, ctx, s, dhcp).await,
            (BindingStrategy::Masquerade, StrategyState::Masquerade(s)) => {
                masquerade::prepare(handler, ctx, s, dhcp).await
            }
            (BindingStrategy::Macvtap, StrategyState::Macvtap(s)) => macvtap::prepare(handler, ctx, s).await,
            (BindingStrategy::Slirp, StrategyState::Slirp(s)) => slirp::prepare(handler, ctx, s).await,
            _ => Err(PlugError::Configuration(
                "strategy/state mismatch: discover produced the wrong state variant".to_string(),
            )),
        }
    }

    pub fn decorate(
        &self,
        ctx: &StrategyCtx<'_>,
        state: &StrategyState,
        domain: &mut DomainDevices,
    ) -> Result<InterfaceCacheEntry, PlugError> {
        match (self, state) {
            (BindingStrategy::Bridge, StrategyState::Bridge(s)) => bridge::decorate(ctx, s, domain),
            (BindingStrategy::Masquerade, StrategyState::Masquerade(s)) => masquerade::decorate(ctx, s, domain),
            (BindingStrategy::Macvtap, StrategyState::Macvtap(s)) => macvtap::decorate(ctx, s, domain),
            (BindingStrategy::Slirp, StrategyState::Slirp(s)) => slirp::decorate(ctx, s, domain),
            _ => Err(PlugError::Configuration(
                "strategy/state mismatch: discover produced the wrong state variant".to_string(),
            )),
        }
    }

    /// Masquerade's cache write is a documented no-op (`spec.md`
    /// §4.3) — every other strategy persists whatever `decorate`
    /// produced.
    pub fn should_write_cache(&self) -> bool {
        !matches!(self, BindingStrategy::Masquerade)
    }

    /// Applies a previously cached artifact straight to the domain on
    /// a cache hit (`spec.md` §4.1 step 2), skipping `discover`/
    /// `prepare`/`decorate` entirely.
    pub fn apply_cache_entry(
        &self,
        ctx: &StrategyCtx<'_>,
        entry: &InterfaceCacheEntry,
        domain: &mut DomainDevices,
    ) -> Result<(), PlugError> {
        let slot = domain
            .slot_index_by_alias(&ctx.iface.name)
            .ok_or_else(|| PlugError::Configuration(format!("no domain device slot for {}", ctx.iface.name)))?;
        match entry {
            InterfaceCacheEntry::Device(interface) => {
                domain.interfaces[slot] = interface.clone();
            }
            InterfaceCacheEntry::QemuArg { values, remove_slot } => {
                if *remove_slot {
                    domain.interfaces.remove(slot);
                } else {
                    domain.interfaces[slot] = crate::domain::Interface {
                        alias: ctx.iface.name.clone(),
                        mac: None,
                        mtu: None,
                        model: None,
                    };
                }
                domain.qemu_cmd.qemu_arg.extend(values.iter().cloned());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_maps_every_binding_type() {
        let mk = |binding| InterfaceSpec {
            name: "eth0".to_string(),
            binding,
            mac_address: None,
            ports: vec![],
            sriov: false,
        };
        assert_eq!(BindingStrategy::select(&mk(BindingType::Bridge)), BindingStrategy::Bridge);
        assert_eq!(
            BindingStrategy::select(&mk(BindingType::Masquerade)),
            BindingStrategy::Masquerade
        );
        assert_eq!(BindingStrategy::select(&mk(BindingType::Macvtap)), BindingStrategy::Macvtap);
        assert_eq!(BindingStrategy::select(&mk(BindingType::Slirp)), BindingStrategy::Slirp);
    }

    #[test]
    fn only_masquerade_skips_the_cache_write() {
        assert!(BindingStrategy::Bridge.should_write_cache());
        assert!(BindingStrategy::Macvtap.should_write_cache());
        assert!(BindingStrategy::Slirp.should_write_cache());
        assert!(!BindingStrategy::Masquerade.should_write_cache());
    }
}
