//! Blocks and transactions as the relay engine sees them.
//!
//! The engine treats transaction bytes as opaque: semantic validation is an
//! injected capability. What it does care about is identity (the double-SHA
//! id), size, and the 80-byte block header.

use {
    crate::hash::{double_sha256, BlockId, ShortId, TxId},
    std::{fmt, hash::Hash, sync::Arc},
};

/// Byte length of a serialized block header.
pub const BLOCK_HEADER_LEN: usize = 80;

/// An opaque transaction: raw serialized bytes plus the precomputed id.
///
/// The bytes live behind an `Arc` so a transaction can sit in several
/// caches and cross worker pools without copying. Equality and hashing
/// use the id only.
#[derive(Clone)]
pub struct Transaction {
    id: TxId,
    raw: Arc<[u8]>,
}

impl Transaction {
    /// Take ownership of raw transaction bytes, computing their id.
    pub fn from_raw(raw: Vec<u8>) -> Self {
        let id = TxId::of(&raw);
        Self { id, raw: raw.into() }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn short_id(&self) -> ShortId {
        self.id.short_id()
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}

impl Hash for Transaction {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("len", &self.raw.len())
            .finish()
    }
}

/// Fixed-size 80-byte block header. Its id is the double-SHA-256 of the
/// header bytes themselves.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader([u8; BLOCK_HEADER_LEN]);

impl BlockHeader {
    pub fn from_bytes(bytes: [u8; BLOCK_HEADER_LEN]) -> Self {
        Self(bytes)
    }

    pub fn id(&self) -> BlockId {
        BlockId(double_sha256(&self.0))
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_HEADER_LEN] {
        &self.0
    }
}

impl fmt::Debug for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHeader({})", self.id())
    }
}

/// A header plus its ordered transactions. Assembled blocks are handed to
/// the embedder; the engine does not retain them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn id(&self) -> BlockId {
        self.header.id()
    }
}
