//! Transaction and block identifiers.
//!
//! Identifiers are the double-SHA-256 of the serialized object. On the wire
//! a transaction is referenced either by its full 32-byte id or by its
//! [`ShortId`], the first 8 bytes of that id.

use {
    sha2::{Digest, Sha256},
    std::fmt,
};

/// Length of a full transaction or block identifier.
pub const ID_LEN: usize = 32;

/// Length of the truncated wire key for a transaction.
pub const SHORT_ID_LEN: usize = 8;

/// SHA-256 applied twice, the network's canonical object hash.
pub fn double_sha256(bytes: &[u8]) -> [u8; ID_LEN] {
    let first = Sha256::digest(bytes);
    Sha256::digest(first).into()
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

/// 32-byte transaction identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub [u8; ID_LEN]);

impl TxId {
    /// Hash raw transaction bytes into their identifier.
    pub fn of(raw: &[u8]) -> Self {
        Self(double_sha256(raw))
    }

    /// The 8-byte truncation used as a compact wire key.
    pub fn short_id(&self) -> ShortId {
        let mut short = [0u8; SHORT_ID_LEN];
        short.copy_from_slice(&self.0[..SHORT_ID_LEN]);
        ShortId(short)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({self})")
    }
}

/// 32-byte block identifier, the double-SHA-256 of the 80-byte header.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub [u8; ID_LEN]);

impl BlockId {
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({self})")
    }
}

/// First 8 bytes of a [`TxId`]; equality and hashing cover all 8 bytes.
///
/// Distinct transactions may collide on their short id; within a single
/// block such a collision is a protocol error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShortId(pub [u8; SHORT_ID_LEN]);

impl ShortId {
    pub fn from_bytes(bytes: [u8; SHORT_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SHORT_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortId({self})")
    }
}
