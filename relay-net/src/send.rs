//! Outbound relay pipeline.
//!
//! Two global bounded pools serve outbound work: one for blocks, one for
//! out-of-block transactions. A job carries the target peer's shared send
//! state; a worker locks that state for the whole operation, so every frame
//! sequence a peer observes is the atomic product of one send call. Frames
//! reach a given peer in send-mutex acquisition order; nothing is promised
//! across peers.
//!
//! Enqueueing awaits only when a queue is saturated — that is the engine's
//! backpressure into the embedder.

use {
    crate::{
        cache::{BoundedFifoSet, BoundedIndexSet},
        config::RelayConfig,
        error::{RelayError, Result},
        hash::{BlockId, TxId},
        types::{Block, Transaction},
        version::{RelayMode, VersionParams},
        wire::{
            frame_bytes, FrameHeader, MessageType, FRAME_HEADER_LEN, INLINE_TX_SENTINEL,
            MAX_CACHE_INDEX, MAX_INLINE_TX_BYTES,
        },
    },
    log::{debug, error, warn},
    std::sync::Arc,
    tokio::{
        io::{AsyncWrite, AsyncWriteExt},
        sync::{mpsc, Mutex},
    },
};

/// Capacity of the per-peer relayed-block dedup cache.
pub const RELAYED_BLOCK_CACHE: usize = 50;

/// Per-peer send-side state: the stream writer, the negotiated parameters,
/// and the dedup caches consulted while serializing.
///
/// Everything here is guarded by one `tokio::sync::Mutex` — the per-peer
/// send lock. Pool workers hold it across the full serialize-and-write of
/// a send call; the receive path takes it briefly for version replies.
pub struct SendShared {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    params: Option<VersionParams>,
    sent_tx_set: Option<BoundedIndexSet<TxId>>,
    relayed_block_set: BoundedFifoSet<BlockId>,
    closed: bool,
}

impl SendShared {
    pub fn new(writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            writer,
            params: None,
            sent_tx_set: None,
            relayed_block_set: BoundedFifoSet::new(RELAYED_BLOCK_CACHE),
            closed: false,
        }
    }

    /// Negotiated parameters, `None` until the version exchange completes.
    pub fn params(&self) -> Option<VersionParams> {
        self.params
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Freeze the negotiated triple and create the send-side cache.
    /// Normally driven by the engine's version exchange.
    pub fn negotiate(&mut self, params: VersionParams) {
        self.params = Some(params);
        self.sent_tx_set = Some(BoundedIndexSet::new(params.cache_capacity));
    }

    /// Poison the send side and shut the stream down.
    pub(crate) async fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.writer.shutdown().await;
        }
    }

    pub(crate) async fn write_version(&mut self, version: &str) -> Result<()> {
        self.write_all(&frame_bytes(MessageType::Version, version.as_bytes()))
            .await
    }

    pub(crate) async fn write_max_version(&mut self, version: &str) -> Result<()> {
        self.write_all(&frame_bytes(MessageType::MaxVersion, version.as_bytes()))
            .await
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Serialize the `BLOCK` frame for one block: the 80-byte header plus, per
/// transaction, a short id (`ABBREV_HASH`) or a cache index / inline record
/// (`CACHE_ID`). Consumes used indices from `sent`.
fn build_block_frame(
    mode: RelayMode,
    block: &Block,
    sent: &mut BoundedIndexSet<TxId>,
) -> Result<Vec<u8>> {
    let header_bytes = block.header.as_bytes();
    let count = block.transactions.len() as u32;

    // Typically only the coinbase needs inline relay; size for that.
    let first_tx_len = block.transactions.first().map_or(0, Transaction::len);
    let mut out = Vec::with_capacity(
        FRAME_HEADER_LEN + header_bytes.len() + 4 + count as usize * 2 + 3 + first_tx_len,
    );

    match mode {
        RelayMode::AbbrevHash => {
            let length = (header_bytes.len() + 4 + block.transactions.len() * 8) as u32;
            out.extend_from_slice(&FrameHeader::new(MessageType::Block, length).encode());
            out.extend_from_slice(header_bytes);
            out.extend_from_slice(&count.to_be_bytes());
            for tx in &block.transactions {
                out.extend_from_slice(tx.short_id().as_bytes());
            }
        }
        RelayMode::CacheId => {
            out.extend_from_slice(&FrameHeader::new(MessageType::Block, count).encode());
            out.extend_from_slice(header_bytes);
            for tx in &block.transactions {
                match sent.index_of(&tx.id()) {
                    Some(index) if index >= MAX_CACHE_INDEX => {
                        error!(
                            "INTERNAL ERROR: sent-transaction cache index {index} out of wire range"
                        );
                        return Err(RelayError::Internal(format!(
                            "cache index {index} out of wire range"
                        )));
                    }
                    Some(index) => {
                        out.extend_from_slice(&(index as u16).to_be_bytes());
                        sent.remove(&tx.id());
                    }
                    None => {
                        let raw = tx.raw_bytes();
                        if raw.len() >= MAX_INLINE_TX_BYTES {
                            error!("tried to relay a block with an oversized transaction in it");
                            return Err(RelayError::Internal(format!(
                                "inline transaction of {} bytes",
                                raw.len()
                            )));
                        }
                        out.extend_from_slice(&INLINE_TX_SENTINEL.to_be_bytes());
                        out.extend_from_slice(&(raw.len() as u32).to_be_bytes()[1..4]);
                        out.extend_from_slice(raw);
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Serialize and write one out-of-block transaction, deduplicated against
/// the sent-transaction cache. Runs under the per-peer send lock; the pool
/// workers call this, and tests may drive it directly.
pub async fn relay_transaction(shared: &Mutex<SendShared>, tx: &Transaction) {
    let mut guard = shared.lock().await;
    let state = &mut *guard;
    if state.closed {
        return;
    }
    let Some(params) = state.params else {
        return;
    };
    if tx.len() > params.max_free_tx_bytes {
        return;
    }
    let Some(sent) = state.sent_tx_set.as_mut() else {
        return;
    };
    if sent.contains(&tx.id()) {
        return;
    }
    if let Err(err) = state
        .writer
        .write_all(&frame_bytes(MessageType::Transaction, tx.raw_bytes()))
        .await
    {
        warn!("failed to write transaction frame: {err}");
    }
    // The hash is cached even after a failed write; the read side will
    // observe the disconnect and tear the connection down.
    sent.insert(tx.id());
}

/// Serialize and write one block, abbreviated against the sent-transaction
/// cache, followed by its `END_BLOCK`. Runs under the per-peer send lock;
/// the pool workers call this, and tests may drive it directly.
pub async fn relay_block(shared: &Mutex<SendShared>, block: &Block) -> Result<()> {
    let mut guard = shared.lock().await;
    let state = &mut *guard;
    if state.closed {
        return Ok(());
    }
    let Some(params) = state.params else {
        return Ok(());
    };
    let block_id = block.id();
    if state.relayed_block_set.contains(&block_id) {
        return Ok(());
    }

    let frame = match state.sent_tx_set.as_mut() {
        Some(sent) => build_block_frame(params.mode, block, sent),
        None => return Ok(()),
    };
    let frame = match frame {
        Ok(frame) => frame,
        Err(err) => {
            // Internal inconsistency: this connection cannot be trusted to
            // stay in sync with the peer's caches.
            state.shutdown().await;
            return Err(err);
        }
    };
    state.writer.write_all(&frame).await?;

    if params.mode == RelayMode::AbbrevHash {
        for tx in &block.transactions {
            let cached = state
                .sent_tx_set
                .as_ref()
                .is_some_and(|sent| sent.contains(&tx.id()));
            if !cached {
                let raw = tx.raw_bytes();
                let mut record = Vec::with_capacity(4 + raw.len());
                record.extend_from_slice(&(raw.len() as u32).to_be_bytes());
                record.extend_from_slice(raw);
                state.writer.write_all(&record).await?;
            }
        }
    }

    state
        .writer
        .write_all(&frame_bytes(MessageType::EndBlock, &[]))
        .await?;
    state.writer.flush().await?;

    state.relayed_block_set.insert(block_id);
    Ok(())
}

// ── Worker pools ────────────────────────────────────────────────────────────

struct BlockJob {
    shared: Arc<Mutex<SendShared>>,
    block: Arc<Block>,
}

struct TxnJob {
    shared: Arc<Mutex<SendShared>>,
    tx: Transaction,
}

/// Handles to the global send pools. Cloning is cheap; all clones feed the
/// same bounded queues.
#[derive(Clone)]
pub struct RelayPools {
    block_tx: mpsc::Sender<BlockJob>,
    txn_tx: mpsc::Sender<TxnJob>,
}

impl RelayPools {
    /// Spawn the worker tasks and return the queue handles.
    pub fn spawn(config: &RelayConfig) -> Self {
        let (block_tx, block_rx) = mpsc::channel::<BlockJob>(config.block_queue_depth);
        let block_rx = Arc::new(Mutex::new(block_rx));
        for _ in 0..config.block_workers {
            let rx = Arc::clone(&block_rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    if let Err(err) = relay_block(&job.shared, &job.block).await {
                        debug!("block relay aborted: {err}");
                    }
                }
            });
        }

        let (txn_tx, txn_rx) = mpsc::channel::<TxnJob>(config.txn_queue_depth);
        let txn_rx = Arc::new(Mutex::new(txn_rx));
        for _ in 0..config.txn_workers {
            let rx = Arc::clone(&txn_rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    relay_transaction(&job.shared, &job.tx).await;
                }
            });
        }

        Self { block_tx, txn_tx }
    }
}

/// Per-peer send handle given to the embedder.
#[derive(Clone)]
pub struct RelaySender {
    shared: Arc<Mutex<SendShared>>,
    pools: RelayPools,
}

impl RelaySender {
    pub(crate) fn new(shared: Arc<Mutex<SendShared>>, pools: RelayPools) -> Self {
        Self { shared, pools }
    }

    /// Enqueue a block for relay to this peer. Dropped silently before
    /// version negotiation; deduplicated against recently relayed blocks.
    pub async fn send_block(&self, block: Arc<Block>) {
        if self.shared.lock().await.params.is_none() {
            return;
        }
        let _ = self
            .pools
            .block_tx
            .send(BlockJob {
                shared: Arc::clone(&self.shared),
                block,
            })
            .await;
    }

    /// Enqueue an out-of-block transaction for relay to this peer. Dropped
    /// silently before version negotiation or when larger than the
    /// negotiated free-relay limit.
    pub async fn send_transaction(&self, tx: Transaction) {
        {
            let shared = self.shared.lock().await;
            let Some(params) = shared.params else {
                return;
            };
            if tx.len() > params.max_free_tx_bytes {
                return;
            }
        }
        let _ = self
            .pools
            .txn_tx
            .send(TxnJob {
                shared: Arc::clone(&self.shared),
                tx,
            })
            .await;
    }

    /// Close the send side of this peer.
    pub async fn close(&self) {
        self.shared.lock().await.shutdown().await;
    }

    /// Whether the version exchange has completed for this peer.
    pub async fn is_ready(&self) -> bool {
        self.shared.lock().await.params.is_some()
    }
}
