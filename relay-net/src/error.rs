//! Error types for the relay peer engine.

use {crate::hash::ShortId, thiserror::Error};

/// Errors that can occur on a relay peer connection.
///
/// Every variant except [`RelayError::Io`] is fatal for the connection it
/// occurs on: the engine closes the offending connection and leaves every
/// other connection untouched. Write-side I/O errors are logged and the
/// read side is left to observe the disconnect.
#[derive(Error, Debug)]
pub enum RelayError {
    /// A frame boundary did not start with the protocol magic.
    #[error("bad magic bytes on frame boundary")]
    BadMagic,

    /// The frame header carried a type value outside the known enum.
    #[error("unknown message type {0}")]
    UnknownMessageType(u32),

    /// A declared length exceeds the maximum block size.
    #[error("frame length {length} exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared payload length.
        length: u32,
        /// Configured maximum.
        max: u32,
    },

    /// The peer violated the protocol state machine or message structure.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An out-of-block transaction exceeds the negotiated free-relay limit.
    #[error("free transaction of {size} bytes exceeds negotiated limit of {max}")]
    OversizedTransaction {
        /// Received transaction size.
        size: usize,
        /// Negotiated per-version limit.
        max: usize,
    },

    /// Two slots of a single block carried the same short id.
    #[error("duplicate transaction {0} in a single block")]
    DuplicateInBlock(ShortId),

    /// A `CACHE_ID` index did not resolve to a live cache entry.
    #[error("cache index {0} does not resolve to a live transaction")]
    DeadCacheIndex(u16),

    /// The peer announced a version string absent from the static table.
    /// Closed quietly; this is an expected condition, not an attack.
    #[error("unknown peer version {0:?}")]
    UnknownVersion(String),

    /// The embedder's semantic validator rejected a transaction or block.
    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),

    /// An impossible internal state, e.g. a cache index past the wire range.
    #[error("internal inconsistency: {0}")]
    Internal(String),

    /// Transport-level I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection has already been closed; no further bytes are accepted.
    #[error("connection closed")]
    Closed,
}

/// Rejection returned by the embedder-provided semantic validators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct VerificationError(pub String);

/// Convenience result type for relay engine operations.
pub type Result<T> = std::result::Result<T, RelayError>;
