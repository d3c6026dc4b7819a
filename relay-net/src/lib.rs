//! Compact block and transaction relay peer protocol engine.
//!
//! Peers that both run this engine propagate proof-of-work blocks with a
//! fraction of their byte size: by the time a block is announced, most of
//! its transactions have already crossed the wire individually, so the
//! announcement carries the 80-byte header plus short identifiers (or cache
//! indices) and only the raw bytes of transactions the far side genuinely
//! lacks.
//!
//! This crate is the per-connection protocol engine: version negotiation,
//! the bounded transaction caches that make abbreviation possible, block
//! reassembly from cache references plus inline bytes, and strict framing
//! enforcement against adversarial peers. Sockets, semantic validation, and
//! peering to the currency network are injected by the embedder.
//!
//! ## Architecture
//!
//! ```text
//!  ┌─────────────────────────────────────────────────┐
//!  │  Embedder (node, validators, socket loops)      │
//!  │  → send_block / send_transaction                │
//!  │  ← on_block_header / on_block / on_transaction  │
//!  └───────┬─────────────────────────────▲───────────┘
//!          │                             │
//!  ┌───────▼───────┐             ┌───────┴───────┐
//!  │ send pipeline │             │ session engine│
//!  │ (global pools,│             │ (receive state│
//!  │  per-peer mtx)│             │  machine)     │
//!  └───────┬───────┘             └───────▲───────┘
//!          │                             │
//!  ┌───────▼─────────────────────────────┴───────────┐
//!  │  framed duplex stream (12-byte headers, and the │
//!  │  compressed in-block sub-framing)               │
//!  └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`cache`]     | Bounded ordered caches with stable global positions |
//! | [`config`]    | Pool and buffer sizing |
//! | [`engine`]    | Receive state machine, handler trait |
//! | [`error`]     | Crate-wide error enum |
//! | [`hash`]      | Double-SHA-256 ids and 8-byte short ids |
//! | [`pending`]   | In-flight block reassembly |
//! | [`send`]      | Outbound serialization, dedup caches, worker pools |
//! | [`transport`] | Tokio stream driver |
//! | [`types`]     | `Transaction`, `BlockHeader`, `Block` |
//! | [`version`]   | Static version table and negotiation parameters |
//! | [`wire`]      | Frame header codec and size constants |

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod pending;
pub mod send;
pub mod transport;
pub mod types;
pub mod version;
pub mod wire;

pub use {
    config::RelayConfig,
    engine::{RecvStats, RelayConnection, RelayHandler, Role},
    error::{RelayError, Result, VerificationError},
    send::{RelayPools, RelaySender},
    types::{Block, BlockHeader, Transaction},
    version::{RelayMode, VersionParams, PROTOCOL_VERSION},
};
