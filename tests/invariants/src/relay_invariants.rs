//! Property-based tests for the relay wire protocol.
//!
//! Properties tested:
//! 1. Round trip: any block, against any shared cache prefix, decodes back
//!    to the block that was sent — in both relay modes.
//! 2. `CACHE_ID` consumption: every index a block references is gone from
//!    the receiver's positional cache afterwards.
//! 3. Chunking independence: feeding the receiver arbitrary chunk sizes
//!    produces exactly the callbacks a single whole-buffer feed does.
//! 4. Send dedup: the wire carries each distinct transaction hash at most
//!    once, no matter how often it is offered.

#[cfg(test)]
mod tests {
    use {
        proptest::prelude::*,
        relay_net::{
            engine::{RelayConnection, RelayHandler, Role},
            hash::{BlockId, TxId},
            send::{relay_block, relay_transaction, SendShared},
            types::{Block, BlockHeader, Transaction},
            version::{lookup, PROTOCOL_VERSION},
            wire::{frame_bytes, MessageType, FRAME_HEADER_LEN},
        },
        std::sync::Arc,
        tokio::{
            io::{duplex, AsyncReadExt, DuplexStream},
            sync::Mutex,
        },
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Header(BlockId),
        Block(BlockId, Vec<TxId>),
        Tx(TxId),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl RelayHandler for Recorder {
        fn on_block_header(&mut self, header: &BlockHeader) {
            self.events.push(Event::Header(header.id()));
        }

        fn on_block(&mut self, block: Block) {
            let ids = block.transactions.iter().map(Transaction::id).collect();
            self.events.push(Event::Block(block.id(), ids));
        }

        fn on_transaction(&mut self, tx: &Transaction) {
            self.events.push(Event::Tx(tx.id()));
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("test runtime")
    }

    /// Distinct-by-construction transaction: the tag byte leads the payload.
    fn make_tx(tag: u8, len: usize) -> Transaction {
        Transaction::from_raw(vec![tag; len.max(1)])
    }

    /// A receiver engine negotiated to `version`. The returned stream keeps
    /// the engine's write side alive.
    async fn receiver(version: &str) -> (RelayConnection<Recorder>, DuplexStream) {
        let (write_half, peer_side) = duplex(1 << 22);
        let shared = Arc::new(Mutex::new(SendShared::new(Box::new(write_half))));
        let mut conn = RelayConnection::new(Role::Responder, Recorder::default(), shared);
        let frame = frame_bytes(MessageType::Version, version.as_bytes());
        let consumed = conn.receive_bytes(&frame).await.unwrap();
        assert_eq!(consumed, frame.len());
        (conn, peer_side)
    }

    /// Send `shared_count` transactions out-of-block and then the block
    /// itself; return everything that hit the wire.
    async fn encode_session(version: &str, block: &Block, shared_count: usize) -> Vec<u8> {
        let (write_half, mut capture) = duplex(1 << 22);
        let sender = Arc::new(Mutex::new(SendShared::new(Box::new(write_half))));
        sender.lock().await.negotiate(lookup(version).unwrap());
        for tx in &block.transactions[..shared_count] {
            relay_transaction(&sender, tx).await;
        }
        relay_block(&sender, block).await.unwrap();
        drop(sender);

        let mut wire = Vec::new();
        capture.read_to_end(&mut wire).await.unwrap();
        wire
    }

    fn make_block(lens: &[usize]) -> Block {
        let txs = lens
            .iter()
            .enumerate()
            .map(|(i, len)| make_tx(i as u8, *len))
            .collect();
        Block::new(BlockHeader::from_bytes([0x42; 80]), txs)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn block_roundtrip_cache_id(
            lens in prop::collection::vec(1usize..120, 0..8),
            shared in 0usize..8,
        ) {
            runtime().block_on(async move {
                let block = make_block(&lens);
                let shared = shared.min(block.transactions.len());
                let wire = encode_session(PROTOCOL_VERSION, &block, shared).await;

                let (mut conn, _keep) = receiver(PROTOCOL_VERSION).await;
                let consumed = conn.receive_bytes(&wire).await.unwrap();
                assert_eq!(consumed, wire.len());

                let expected = Event::Block(
                    block.id(),
                    block.transactions.iter().map(Transaction::id).collect(),
                );
                assert!(conn.handler().events.contains(&expected));

                // Consumption law: every referenced index is gone; the only
                // cache entries ever made were the shared prefix, so the
                // positional cache drains completely.
                let set = conn.received_tx_set().expect("CACHE_ID cache");
                assert!(set.is_empty());
                for pos in 0..shared as u64 {
                    assert!(set.get(pos).is_none());
                }
            });
        }

        #[test]
        fn block_roundtrip_abbrev_hash(
            lens in prop::collection::vec(1usize..120, 0..8),
            shared in 0usize..8,
        ) {
            runtime().block_on(async move {
                let block = make_block(&lens);
                let shared = shared.min(block.transactions.len());
                let wire = encode_session("charming chameleon", &block, shared).await;

                let (mut conn, _keep) = receiver("charming chameleon").await;
                let consumed = conn.receive_bytes(&wire).await.unwrap();
                assert_eq!(consumed, wire.len());

                let expected = Event::Block(
                    block.id(),
                    block.transactions.iter().map(Transaction::id).collect(),
                );
                assert!(conn.handler().events.contains(&expected));
            });
        }

        #[test]
        fn chunked_feed_equals_whole_feed(
            lens in prop::collection::vec(1usize..120, 1..8),
            shared in 0usize..8,
            chunks in prop::collection::vec(1usize..16, 1..64),
        ) {
            runtime().block_on(async move {
                let block = make_block(&lens);
                let shared = shared.min(block.transactions.len());
                let wire = encode_session(PROTOCOL_VERSION, &block, shared).await;

                let (mut whole, _keep_a) = receiver(PROTOCOL_VERSION).await;
                let consumed = whole.receive_bytes(&wire).await.unwrap();
                assert_eq!(consumed, wire.len());

                let (mut dribble, _keep_b) = receiver(PROTOCOL_VERSION).await;
                let mut sizes = chunks.iter().cycle();
                let mut pending: Vec<u8> = Vec::new();
                let mut offset = 0;
                while offset < wire.len() {
                    let n = (*sizes.next().unwrap()).min(wire.len() - offset);
                    pending.extend_from_slice(&wire[offset..offset + n]);
                    offset += n;
                    let consumed = dribble.receive_bytes(&pending).await.unwrap();
                    pending.drain(..consumed);
                }
                assert!(pending.is_empty());
                assert_eq!(whole.handler().events, dribble.handler().events);
            });
        }

        #[test]
        fn wire_carries_each_hash_at_most_once(
            pool_lens in prop::collection::vec(1usize..60, 1..6),
            picks in prop::collection::vec(0usize..6, 1..40),
        ) {
            runtime().block_on(async move {
                let pool: Vec<Transaction> = pool_lens
                    .iter()
                    .enumerate()
                    .map(|(i, len)| make_tx(i as u8, *len))
                    .collect();

                let (write_half, mut capture) = duplex(1 << 22);
                let sender = Arc::new(Mutex::new(SendShared::new(Box::new(write_half))));
                sender
                    .lock()
                    .await
                    .negotiate(lookup(PROTOCOL_VERSION).unwrap());

                let mut offered = Vec::new();
                for &pick in &picks {
                    let tx = &pool[pick % pool.len()];
                    offered.push(tx.id());
                    relay_transaction(&sender, tx).await;
                }
                drop(sender);

                let mut wire = Vec::new();
                capture.read_to_end(&mut wire).await.unwrap();

                // Walk the frames and collect the relayed ids.
                let mut seen = Vec::new();
                let mut offset = 0;
                while offset < wire.len() {
                    let length = u32::from_be_bytes(
                        wire[offset + 8..offset + 12].try_into().unwrap(),
                    ) as usize;
                    let payload = &wire[offset + FRAME_HEADER_LEN..offset + FRAME_HEADER_LEN + length];
                    seen.push(TxId::of(payload));
                    offset += FRAME_HEADER_LEN + length;
                }

                let mut distinct = offered.clone();
                distinct.sort();
                distinct.dedup();
                assert_eq!(seen.len(), distinct.len());
                let mut seen_sorted = seen.clone();
                seen_sorted.sort();
                assert_eq!(seen_sorted, distinct);
            });
        }
    }
}
