//! Configuration for the relay engine's pools and buffers.

/// Sizing knobs for the send-side worker pools and the receive buffer.
///
/// The two pools are global: every relay connection enqueues onto the same
/// bounded queues, and a saturated queue intentionally backpressures the
/// embedder. Per-peer ordering comes from the per-peer send mutex, not from
/// the pools.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Workers draining the block relay queue.
    pub block_workers: usize,

    /// Bounded depth of the block relay queue.
    pub block_queue_depth: usize,

    /// Workers draining the transaction relay queue.
    pub txn_workers: usize,

    /// Bounded depth of the transaction relay queue.
    pub txn_queue_depth: usize,

    /// Size of the per-connection read buffer. Blocks are larger than this;
    /// the receive state machine resumes across chunk boundaries.
    pub read_buffer_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            block_workers: 4,
            block_queue_depth: 50,
            txn_workers: 4,
            txn_queue_depth: 25,
            read_buffer_bytes: 64 * 1024,
        }
    }
}

impl RelayConfig {
    /// Create a config suitable for local testing.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            block_workers: 2,
            block_queue_depth: 8,
            txn_workers: 2,
            txn_queue_depth: 8,
            read_buffer_bytes: 4 * 1024,
        }
    }
}
