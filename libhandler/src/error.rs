use thiserror::Error;

/// Errors surfaced by the `Handler` host-capability surface.
///
/// These sit one layer below `libvif::error::PlugError`: every strategy
/// converts a `HandlerError` into either a recoverable `Discovery` error
/// (during `discover`) or the fatal path (during `prepare`/`decorate`/
/// `write_cache`), per `spec.md` §7.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("link {0:?} not found")]
    LinkNotFound(String),

    #[error("netlink error: {0}")]
    Netlink(#[from] anyhow::Error),

    #[error("invalid MTU {0}: must be between 0 and 65535")]
    InvalidMtu(u32),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("iptables error: {0}")]
    Iptables(String),

    #[error("nftables error: {0}")]
    Nftables(String),

    #[error("tap device error: {0}")]
    Tap(String),
}
