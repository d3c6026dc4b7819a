//! Property-based invariant tests for the relay engine.
//!
//! Uses proptest to verify the protocol's load-bearing invariants:
//! - Cache positions are monotone and never reused.
//! - The send path emits each transaction hash at most once until eviction.
//! - Any block survives an encode/decode round trip against any shared
//!   cache prefix, in both relay modes.
//! - `CACHE_ID` index use consumes the referenced cache entry.
//! - Feeding the receive buffer byte-by-byte produces exactly the callbacks
//!   that feeding it whole does.

pub mod cache_invariants;
pub mod relay_invariants;
