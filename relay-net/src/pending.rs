//! In-flight reassembly state for a block being received.
//!
//! A [`PendingBlock`] is a plain value owned by the session engine. Its
//! operations take the receive caches as parameters; resolution mutates the
//! pending slots and, in `CACHE_ID` mode, consumes cache entries.

use {
    crate::{
        cache::{BoundedFifoMap, BoundedIndexSet},
        error::{RelayError, Result},
        hash::ShortId,
        types::{Block, BlockHeader, Transaction},
    },
    std::collections::HashMap,
};

/// A block header plus its transaction slots, some possibly unresolved.
#[derive(Debug)]
pub struct PendingBlock {
    header: BlockHeader,
    /// Slot order on the wire; keys into `slots`.
    order: Vec<ShortId>,
    /// `None` marks a tombstone awaiting an inline transaction.
    slots: HashMap<ShortId, Option<Transaction>>,
    pending: u32,
    already_built: bool,
}

impl PendingBlock {
    pub fn new(header: BlockHeader) -> Self {
        Self {
            header,
            order: Vec::new(),
            slots: HashMap::new(),
            pending: 0,
            already_built: false,
        }
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// Unresolved slot count.
    pub fn pending_count(&self) -> u32 {
        self.pending
    }

    pub fn slot_count(&self) -> usize {
        self.order.len()
    }

    /// `ABBREV_HASH` record: reference a transaction by short id. A cache
    /// hit fills the slot; a miss places a tombstone to be resolved by a
    /// later inline transaction.
    pub fn add_short_id(
        &mut self,
        short: ShortId,
        cache: &BoundedFifoMap<ShortId, Transaction>,
    ) -> Result<()> {
        if self.slots.contains_key(&short) {
            return Err(RelayError::DuplicateInBlock(short));
        }
        let hit = cache.get(&short).cloned();
        if hit.is_none() {
            self.pending += 1;
        }
        self.order.push(short);
        self.slots.insert(short, hit);
        Ok(())
    }

    /// `CACHE_ID` record: reference a transaction by positional index,
    /// consuming the cache entry.
    pub fn add_cache_index(
        &mut self,
        index: u16,
        cache: &mut BoundedIndexSet<Transaction>,
    ) -> Result<()> {
        let tx = cache
            .take(u64::from(index))
            .ok_or(RelayError::DeadCacheIndex(index))?;
        self.add_resolved(tx)
    }

    /// Place an already-resolved transaction into a fresh slot (`CACHE_ID`
    /// inline records, and `CACHE_ID` transactions arriving mid-block).
    pub fn add_resolved(&mut self, tx: Transaction) -> Result<()> {
        let short = tx.short_id();
        if self.slots.contains_key(&short) {
            return Err(RelayError::DuplicateInBlock(short));
        }
        self.order.push(short);
        self.slots.insert(short, Some(tx));
        Ok(())
    }

    /// `ABBREV_HASH` resolution: an inline transaction fills its tombstoned
    /// slot. Returns `true` when this was the last unresolved slot.
    pub fn resolve(&mut self, tx: &Transaction) -> Result<bool> {
        let slot = self
            .slots
            .get_mut(&tx.short_id())
            .ok_or_else(|| RelayError::Protocol("resolved a transaction no slot needed".into()))?;
        if slot.is_some() {
            return Err(RelayError::DuplicateInBlock(tx.short_id()));
        }
        *slot = Some(tx.clone());
        self.pending -= 1;
        Ok(self.pending == 0)
    }

    /// Compose the ordered transaction list. `Ok(None)` when the block was
    /// already built; the flag guards the two assembly triggers firing for
    /// the same block.
    pub fn build(&mut self) -> Result<Option<Block>> {
        if self.already_built {
            return Ok(None);
        }
        self.already_built = true;

        let mut transactions = Vec::with_capacity(self.order.len());
        for short in &self.order {
            match self.slots.get(short).and_then(Clone::clone) {
                Some(tx) => transactions.push(tx),
                None => {
                    return Err(RelayError::Internal(format!(
                        "building block with unresolved slot {short}"
                    )))
                }
            }
        }
        Ok(Some(Block::new(self.header, transactions)))
    }
}
