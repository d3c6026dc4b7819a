//! Protocol version table and negotiation parameters.
//!
//! A relay connection opens with an ASCII version string. The static table
//! below maps each known string to the triple that shapes the rest of the
//! connection: cache capacity, the out-of-block transaction size limit, and
//! the relay mode. The triple is frozen at negotiation and never changes.

use crate::wire::MAX_BLOCK_SIZE;

/// The version string this engine speaks natively.
pub const PROTOCOL_VERSION: &str = "swift swallow";

/// How block transactions are referenced on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Reference by 8-byte short id; transactions the receiver lacks follow
    /// the block frame as separately framed inline records.
    AbbrevHash,
    /// Reference by 16-bit positional cache index; `0xFFFF` signals inline
    /// transaction bytes follow in place.
    CacheId,
}

/// Per-version connection parameters, frozen at negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionParams {
    /// Capacity of every per-connection transaction cache.
    pub cache_capacity: usize,
    /// Largest transaction the peer may relay outside a block.
    pub max_free_tx_bytes: usize,
    /// Block transaction reference scheme.
    pub mode: RelayMode,
}

/// Look a peer's version string up in the static table.
pub fn lookup(version: &str) -> Option<VersionParams> {
    match version {
        "efficient eagle" => Some(VersionParams {
            cache_capacity: 2000,
            max_free_tx_bytes: MAX_BLOCK_SIZE as usize,
            mode: RelayMode::AbbrevHash,
        }),
        "charming chameleon" => Some(VersionParams {
            cache_capacity: 1000,
            max_free_tx_bytes: 10_000,
            mode: RelayMode::AbbrevHash,
        }),
        PROTOCOL_VERSION => Some(VersionParams {
            cache_capacity: 1000,
            max_free_tx_bytes: 25_000,
            mode: RelayMode::CacheId,
        }),
        _ => None,
    }
}

/// Strip a peer-supplied string down to printable ASCII before logging.
pub fn printable(version: &str) -> String {
    version.chars().filter(|c| (' '..='~').contains(c)).collect()
}
