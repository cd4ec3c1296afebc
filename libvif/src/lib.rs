//! Pod-to-guest network binding engine.
//!
//! Given a guest interface's binding type (Bridge, Masquerade, Macvtap,
//! or Slirp), [`plug::plug`] selects the matching [`strategy::BindingStrategy`],
//! runs its discover/prepare/decorate pipeline against the host network
//! namespace via [`libhandler::Handler`], and mutates the caller's
//! hypervisor [`domain::DomainDevices`] accordingly. Cross-invocation
//! idempotency is provided by [`cache::CacheStore`].

pub mod cache;
pub mod domain;
pub mod error;
pub mod plug;
pub mod spec;
pub mod strategy;
pub mod vif;

pub use error::PlugError;
pub use plug::{plug, PlugContext};
pub use strategy::BindingStrategy;
