//! Receive-side session engine for one relay peer.
//!
//! [`RelayConnection`] is a state machine driven by bytes arriving from the
//! peer's stream. It is the sole mutator of per-connection receive state:
//! the out-of-block transaction caches, the in-flight [`PendingBlock`], and
//! the state fields below. The driver feeds it chunks via
//! [`RelayConnection::receive_bytes`], which consumes as much as it can and
//! reports how far it got; partial frames are left for the next chunk.
//!
//! States:
//!
//! 1. awaiting version — nothing negotiated yet; block and transaction
//!    frames are illegal.
//! 2. idle — a frame header (or, inside a block, a raw record length) is
//!    expected next.
//! 3. reading block records — consuming short-id or index records until the
//!    announced count is exhausted or an inline transaction interrupts.
//! 4. reading transaction — accumulating raw transaction bytes.
//! 5. closed — every error lands here and stays.

use {
    crate::{
        cache::{BoundedFifoMap, BoundedIndexSet},
        error::{RelayError, Result, VerificationError},
        hash::ShortId,
        pending::PendingBlock,
        send::SendShared,
        types::{Block, BlockHeader, Transaction, BLOCK_HEADER_LEN},
        version::{self, RelayMode, VersionParams, PROTOCOL_VERSION},
        wire::{
            FrameHeader, MessageType, WireCursor, FRAME_HEADER_LEN, INLINE_TX_SENTINEL, MAGIC,
            MAX_BLOCK_SIZE,
        },
    },
    log::{debug, info},
    std::sync::Arc,
    tokio::sync::Mutex,
};

/// Which side of the version exchange this connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends its version immediately on attach.
    Initiator,
    /// Waits for the peer's version, then echoes the negotiated one.
    Responder,
}

/// Embedder callbacks and services for one relay connection.
///
/// Callbacks run on the receive path and must not block. The verifiers and
/// the interning hook are injected capabilities; the defaults accept
/// everything, deduplicate nothing, and forward log lines to the `log`
/// crate.
pub trait RelayHandler: Send {
    /// A block header arrived, before any transaction resolution.
    fn on_block_header(&mut self, header: &BlockHeader);

    /// A block finished reassembly.
    fn on_block(&mut self, block: Block);

    /// An out-of-block transaction was accepted into the receive caches.
    fn on_transaction(&mut self, tx: &Transaction);

    fn on_log(&mut self, line: &str) {
        info!("{line}");
    }

    fn on_log_stats(&mut self, line: &str) {
        debug!("{line}");
    }

    fn on_connected(&mut self, line: &str) {
        info!("{line}");
    }

    /// Parse and semantically validate raw transaction bytes. A rejection
    /// aborts the connection.
    fn verify_transaction(
        &mut self,
        raw: &[u8],
    ) -> std::result::Result<Transaction, VerificationError> {
        Ok(Transaction::from_raw(raw.to_vec()))
    }

    /// Semantically validate an assembled block. A rejection aborts the
    /// connection.
    fn verify_block(&mut self, _block: &Block) -> std::result::Result<(), VerificationError> {
        Ok(())
    }

    /// Process-wide deduplication hook; must return a transaction equal by
    /// id to its argument.
    fn intern_transaction(&mut self, tx: Transaction) -> Transaction {
        tx
    }
}

/// Best-effort receive statistics, reset per block where noted.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecvStats {
    /// Transactions referenced by the block currently being read.
    pub txn_in_block: u64,
    /// Of those, how many arrived inline rather than from cache.
    pub txn_relayed_in_block: u64,
    /// Approximate wire bytes of the current block.
    pub bytes_in_block: u64,
    /// Lifetime count of in-block transaction references.
    pub txn_in_block_total: u64,
    /// Lifetime count of references served from cache.
    pub txn_skipped_total: u64,
    /// Lifetime count of transactions relayed outside blocks.
    pub txn_relayed_out_of_block_total: u64,
}

/// Outcome of one parse step.
enum Step {
    /// Consumed this many bytes (possibly zero when only state advanced).
    Advance(usize),
    /// Not enough buffered bytes; resume from the same offset later.
    NeedMore,
}

/// Accumulator for raw transaction bytes announced by a length field.
struct InlineRead {
    buf: Vec<u8>,
    filled: usize,
}

impl InlineRead {
    fn new(len: usize) -> Self {
        Self {
            buf: vec![0; len],
            filled: 0,
        }
    }
}

/// Receive state machine for one relay peer.
pub struct RelayConnection<H: RelayHandler> {
    handler: H,
    role: Role,
    shared: Arc<Mutex<SendShared>>,
    negotiated: Option<VersionParams>,

    // Receive-path caches; which one exists depends on the negotiated mode.
    received_tx_map: Option<BoundedFifoMap<ShortId, Transaction>>,
    received_tx_set: Option<BoundedIndexSet<Transaction>>,

    pending_block: Option<PendingBlock>,
    records_left: u32,
    inline: Option<InlineRead>,
    closed: bool,

    stats: RecvStats,
}

impl<H: RelayHandler> RelayConnection<H> {
    pub fn new(role: Role, handler: H, shared: Arc<Mutex<SendShared>>) -> Self {
        Self {
            handler,
            role,
            shared,
            negotiated: None,
            received_tx_map: None,
            received_tx_set: None,
            pending_block: None,
            records_left: 0,
            inline: None,
            closed: false,
            stats: RecvStats::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Negotiated parameters, `None` before the version exchange.
    pub fn negotiated(&self) -> Option<VersionParams> {
        self.negotiated
    }

    pub fn stats(&self) -> RecvStats {
        self.stats
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Poison the state machine and shut the stream down. In-flight send
    /// pool work for this peer completes against a closed writer and is
    /// discarded.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.lock().await.shutdown().await;
        }
    }

    /// Feed a chunk of stream bytes. Returns how many were consumed; the
    /// driver must carry unconsumed bytes over to the next call. Any error
    /// has already closed the connection when this returns.
    pub async fn receive_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(RelayError::Closed);
        }
        let mut pos = 0;
        loop {
            match self.step(&buf[pos..]).await {
                Ok(Step::Advance(n)) => pos += n,
                Ok(Step::NeedMore) => return Ok(pos),
                Err(err) => return Err(self.fail(err).await),
            }
        }
    }

    async fn step(&mut self, buf: &[u8]) -> Result<Step> {
        if self.inline.is_some() {
            return self.read_inline(buf);
        }
        if self.records_left > 0 {
            return self.read_block_records(buf);
        }
        self.read_frame(buf).await
    }

    // ── Reading transaction bytes ───────────────────────────────────────

    fn read_inline(&mut self, buf: &[u8]) -> Result<Step> {
        let Some(mut inline) = self.inline.take() else {
            return Err(RelayError::Internal("inline read state missing".into()));
        };
        let want = inline.buf.len() - inline.filled;
        let take = want.min(buf.len());
        inline.buf[inline.filled..inline.filled + take].copy_from_slice(&buf[..take]);
        inline.filled += take;

        if inline.filled < inline.buf.len() {
            self.inline = Some(inline);
            return Ok(if take > 0 {
                Step::Advance(take)
            } else {
                Step::NeedMore
            });
        }
        self.finish_transaction(inline.buf)?;
        Ok(Step::Advance(take))
    }

    /// A transaction's bytes are complete: intern, verify, and route it
    /// either into the pending block or into the out-of-block caches.
    fn finish_transaction(&mut self, raw: Vec<u8>) -> Result<()> {
        let tx = self
            .handler
            .verify_transaction(&raw)
            .map_err(RelayError::Verification)?;
        let tx = self.handler.intern_transaction(tx);
        let params = self
            .negotiated
            .ok_or_else(|| RelayError::Internal("transaction read before version".into()))?;

        if self.pending_block.is_some() {
            match params.mode {
                RelayMode::AbbrevHash => {
                    let done = match self.pending_block.as_mut() {
                        Some(pending) => pending.resolve(&tx)?,
                        None => false,
                    };
                    if done {
                        self.build_pending()?;
                    }
                }
                RelayMode::CacheId => {
                    if let Some(pending) = self.pending_block.as_mut() {
                        pending.add_resolved(tx.clone())?;
                    }
                    if self.records_left == 0 {
                        self.build_pending()?;
                    }
                }
            }
            self.stats.txn_relayed_in_block += 1;
            self.handler
                .on_log_stats(&format!("received in-block {} size: {}", tx.id(), tx.len()));
        } else {
            match params.mode {
                RelayMode::AbbrevHash => {
                    let map = self
                        .received_tx_map
                        .as_mut()
                        .ok_or_else(|| RelayError::Internal("receive cache missing".into()))?;
                    map.insert(tx.short_id(), tx.clone());
                }
                RelayMode::CacheId => {
                    let set = self
                        .received_tx_set
                        .as_mut()
                        .ok_or_else(|| RelayError::Internal("receive cache missing".into()))?;
                    set.insert(tx.clone());
                }
            }
            self.handler.on_transaction(&tx);
            self.stats.txn_relayed_out_of_block_total += 1;
        }
        Ok(())
    }

    // ── Reading block transaction records ───────────────────────────────

    fn read_block_records(&mut self, buf: &[u8]) -> Result<Step> {
        let params = self
            .negotiated
            .ok_or_else(|| RelayError::Internal("block records before version".into()))?;
        let pending = self
            .pending_block
            .as_mut()
            .ok_or_else(|| RelayError::Internal("block records without a pending block".into()))?;

        let mut cur = WireCursor::new(buf);
        let mut build_now = false;

        while self.records_left > 0 {
            match params.mode {
                RelayMode::AbbrevHash => {
                    let Some(short) = cur.short_id() else { break };
                    let map = self
                        .received_tx_map
                        .as_mut()
                        .ok_or_else(|| RelayError::Internal("receive cache missing".into()))?;
                    pending.add_short_id(short, map)?;
                    self.records_left -= 1;
                    self.stats.txn_in_block += 1;
                    self.stats.txn_in_block_total += 1;
                }
                RelayMode::CacheId => {
                    let checkpoint = cur.consumed();
                    let Some(index) = cur.u16_be() else { break };
                    if index != INLINE_TX_SENTINEL {
                        let set = self
                            .received_tx_set
                            .as_mut()
                            .ok_or_else(|| RelayError::Internal("receive cache missing".into()))?;
                        pending.add_cache_index(index, set)?;
                        self.records_left -= 1;
                        self.stats.txn_in_block += 1;
                        self.stats.txn_in_block_total += 1;
                        self.stats.bytes_in_block += 2;
                        if self.records_left == 0 {
                            // Consuming the last slot assembles immediately;
                            // END_BLOCK still follows on the wire.
                            build_now = true;
                        }
                    } else {
                        let Some(length) = cur.u24_be() else {
                            cur.reset(checkpoint);
                            break;
                        };
                        if length > MAX_BLOCK_SIZE {
                            return Err(RelayError::Protocol(format!(
                                "inline transaction length {length} in block"
                            )));
                        }
                        self.records_left -= 1;
                        self.stats.txn_in_block += 1;
                        self.stats.txn_in_block_total += 1;
                        self.stats.bytes_in_block += u64::from(2 + 3 + length);
                        self.inline = Some(InlineRead::new(length as usize));
                        break;
                    }
                }
            }
        }

        if build_now {
            self.build_pending()?;
        }
        Ok(if cur.consumed() > 0 {
            Step::Advance(cur.consumed())
        } else {
            Step::NeedMore
        })
    }

    // ── Frame dispatch ──────────────────────────────────────────────────

    async fn read_frame(&mut self, buf: &[u8]) -> Result<Step> {
        let mut cur = WireCursor::new(buf);
        let in_block = self.pending_block.is_some();
        let Some(first) = cur.peek_u32_be() else {
            return Ok(Step::NeedMore);
        };

        let header = if !in_block || first == MAGIC {
            let Some(decoded) = cur.frame_header() else {
                return Ok(Step::NeedMore);
            };
            let header = decoded?;
            if in_block && header.msg_type != MessageType::EndBlock {
                return Err(RelayError::Protocol(format!(
                    "full {:?} message while reading a block",
                    header.msg_type
                )));
            }
            header
        } else {
            // Inside a block a non-magic token is the raw length of an
            // inline transaction record.
            let Some(length) = cur.u32_be() else {
                return Ok(Step::NeedMore);
            };
            if length > MAX_BLOCK_SIZE {
                return Err(RelayError::FrameTooLarge {
                    length,
                    max: MAX_BLOCK_SIZE,
                });
            }
            FrameHeader::new(MessageType::Transaction, length)
        };

        match header.msg_type {
            MessageType::Version => self.handle_version(&mut cur, header).await,
            MessageType::MaxVersion => self.handle_max_version(&mut cur, header),
            MessageType::Block => self.handle_block(&mut cur, header),
            MessageType::Transaction => self.handle_transaction(&cur, header),
            MessageType::EndBlock => self.handle_end_block(&cur),
        }
    }

    async fn handle_version(
        &mut self,
        cur: &mut WireCursor<'_>,
        header: FrameHeader,
    ) -> Result<Step> {
        let Some(payload) = cur.take(header.length as usize) else {
            return Ok(Step::NeedMore);
        };
        if self.negotiated.is_some() {
            return Err(RelayError::Protocol(
                "VERSION after negotiation already completed".into(),
            ));
        }

        let text = String::from_utf8_lossy(payload).into_owned();
        let display = version::printable(&text);
        let Some(params) = version::lookup(&text) else {
            self.handler
                .on_log(&format!("connected to node with bad version: {display}"));
            return Err(RelayError::UnknownVersion(display));
        };

        match params.mode {
            RelayMode::AbbrevHash => {
                self.received_tx_map = Some(BoundedFifoMap::new(params.cache_capacity));
            }
            RelayMode::CacheId => {
                self.received_tx_set = Some(BoundedIndexSet::new(params.cache_capacity));
            }
        }
        self.negotiated = Some(params);

        {
            let mut shared = self.shared.lock().await;
            shared.negotiate(params);
            if self.role == Role::Responder {
                // Acknowledge by speaking the peer's version back; offer an
                // upgrade when ours is newer.
                shared.write_version(&text).await?;
                if text != PROTOCOL_VERSION {
                    shared.write_max_version(PROTOCOL_VERSION).await?;
                }
            }
        }

        if text == PROTOCOL_VERSION {
            self.handler
                .on_connected(&format!("connected to node with version: {display}"));
        } else {
            self.handler
                .on_log(&format!("connected to node with old version: {display}"));
        }
        Ok(Step::Advance(cur.consumed()))
    }

    fn handle_max_version(&mut self, cur: &mut WireCursor<'_>, header: FrameHeader) -> Result<Step> {
        let Some(payload) = cur.take(header.length as usize) else {
            return Ok(Step::NeedMore);
        };
        let display = version::printable(&String::from_utf8_lossy(payload));
        self.handler.on_log(&format!(
            "WARNING: connected to node with a higher max version (please upgrade): {display}"
        ));
        Ok(Step::Advance(cur.consumed()))
    }

    fn handle_block(&mut self, cur: &mut WireCursor<'_>, header: FrameHeader) -> Result<Step> {
        let Some(params) = self.negotiated else {
            return Err(RelayError::Protocol("BLOCK before VERSION".into()));
        };
        debug_assert!(
            self.pending_block.is_none(),
            "frame dispatch admits only END_BLOCK inside a block"
        );

        let Some(header_bytes) = cur.array::<BLOCK_HEADER_LEN>() else {
            return Ok(Step::NeedMore);
        };
        let block_header = BlockHeader::from_bytes(header_bytes);

        let count = match params.mode {
            RelayMode::AbbrevHash => {
                let Some(count) = cur.u32_be() else {
                    return Ok(Step::NeedMore);
                };
                let expected = BLOCK_HEADER_LEN as u64 + 4 + u64::from(count) * 8;
                if expected != u64::from(header.length) {
                    return Err(RelayError::Protocol(format!(
                        "transaction count {count} inconsistent with frame length {}",
                        header.length
                    )));
                }
                count
            }
            // The frame's length field doubles as the transaction count.
            RelayMode::CacheId => header.length,
        };

        self.handler.on_block_header(&block_header);
        self.pending_block = Some(PendingBlock::new(block_header));
        self.records_left = count;
        self.stats.bytes_in_block = (FRAME_HEADER_LEN + BLOCK_HEADER_LEN) as u64;
        Ok(Step::Advance(cur.consumed()))
    }

    fn handle_transaction(&mut self, cur: &WireCursor<'_>, header: FrameHeader) -> Result<Step> {
        let Some(params) = self.negotiated else {
            return Err(RelayError::Protocol("TRANSACTION before VERSION".into()));
        };
        let size = header.length as usize;
        if self.pending_block.is_none() && size > params.max_free_tx_bytes {
            return Err(RelayError::OversizedTransaction {
                size,
                max: params.max_free_tx_bytes,
            });
        }
        self.inline = Some(InlineRead::new(size));
        Ok(Step::Advance(cur.consumed()))
    }

    fn handle_end_block(&mut self, cur: &WireCursor<'_>) -> Result<Step> {
        if self.negotiated.is_none() {
            return Err(RelayError::Protocol("END_BLOCK before VERSION".into()));
        }
        let pending = self
            .pending_block
            .as_ref()
            .ok_or_else(|| RelayError::Protocol("END_BLOCK without BLOCK".into()))?;
        if pending.pending_count() > 0 {
            return Err(RelayError::Protocol(format!(
                "{} unresolved transactions at end of block",
                pending.pending_count()
            )));
        }
        let block_id = pending.header().id();

        self.build_pending()?;

        let skipped = self
            .stats
            .txn_in_block
            .saturating_sub(self.stats.txn_relayed_in_block);
        self.stats.txn_skipped_total += skipped;
        let line = format!(
            "skipped {}/{} in block {block_id}; total skipped {} of {}; relayed {} out of block",
            skipped,
            self.stats.txn_in_block,
            self.stats.txn_skipped_total,
            self.stats.txn_in_block_total,
            self.stats.txn_relayed_out_of_block_total,
        );
        self.handler.on_log_stats(&line);
        self.stats.txn_in_block = 0;
        self.stats.txn_relayed_in_block = 0;

        self.pending_block = None;
        Ok(Step::Advance(cur.consumed()))
    }

    // ── Assembly ────────────────────────────────────────────────────────

    /// Run the pending block's assembly if it has not fired yet: verify,
    /// deliver, and log the wire footprint.
    fn build_pending(&mut self) -> Result<()> {
        let built = match self.pending_block.as_mut() {
            None => return Ok(()),
            Some(pending) => pending.build()?,
        };
        if let Some(block) = built {
            self.handler.verify_block(&block)?;
            self.handler.on_block(block);
            self.handler.on_log_stats(&format!(
                "block built with {} bytes on the wire",
                self.stats.bytes_in_block
            ));
        }
        Ok(())
    }

    // ── Failure ─────────────────────────────────────────────────────────

    async fn fail(&mut self, err: RelayError) -> RelayError {
        match &err {
            // Expected when talking to a foreign or future node; a friendly
            // line was already emitted.
            RelayError::UnknownVersion(_) => {}
            RelayError::Internal(msg) => self.handler.on_log(&format!("INTERNAL ERROR: {msg}")),
            RelayError::Io(_) => self.handler.on_log("failed to write to relay peer"),
            other => self
                .handler
                .on_log(&format!("corrupted data from relay peer: {other}")),
        }
        self.closed = true;
        self.shared.lock().await.shutdown().await;
        err
    }

    // ── Test access ─────────────────────────────────────────────────────

    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn received_tx_set(&self) -> Option<&BoundedIndexSet<Transaction>> {
        self.received_tx_set.as_ref()
    }

    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn received_tx_map(&self) -> Option<&BoundedFifoMap<ShortId, Transaction>> {
        self.received_tx_map.as_ref()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
