use thiserror::Error;

/// Errors surfaced by `plug()` (`spec.md` §7).
///
/// The first three are recoverable and returned to the caller as a
/// normal `Err` — a VMI controller may retry. `Mutation` is not: once a
/// strategy has begun touching host network state, a failure partway
/// through leaves that state inconsistent, and `spec.md` §7 treats it
/// as fatal. `plug()` never returns `Mutation` to its caller; see
/// `plug::plug`.
#[derive(Debug, Error)]
pub enum PlugError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("cache read error: {0}")]
    CacheRead(String),

    #[error("mutation error: {0}")]
    Mutation(String),
}

impl PlugError {
    pub fn from_discovery(e: impl std::fmt::Display) -> Self {
        PlugError::Discovery(e.to_string())
    }

    pub fn from_mutation(e: impl std::fmt::Display) -> Self {
        PlugError::Mutation(e.to_string())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, PlugError::Mutation(_))
    }
}
