//! Property-based tests for the bounded ordered caches.
//!
//! Properties tested:
//! 1. Positions are assigned by a strictly increasing counter; no position
//!    is ever reused, across any interleaving of inserts and removes.
//! 2. Eviction is FIFO over live entries and never moves a survivor.
//! 3. Evicted and removed positions read as absent forever.
//! 4. Live-entry count never exceeds capacity.

#[cfg(test)]
mod tests {
    use {proptest::prelude::*, relay_net::cache::BoundedIndexSet};

    /// One scripted cache operation.
    #[derive(Debug, Clone)]
    enum Op {
        Insert(u16),
        Remove(u16),
        Take(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u16..200).prop_map(Op::Insert),
            (0u16..200).prop_map(Op::Remove),
            (0u64..300).prop_map(Op::Take),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn positions_strictly_increase_and_never_recur(
            capacity in 1usize..16,
            ops in prop::collection::vec(op_strategy(), 1..200),
        ) {
            let mut set = BoundedIndexSet::new(capacity);
            let mut highest_assigned: Option<u64> = None;

            for op in ops {
                match op {
                    Op::Insert(value) => {
                        let was_present = set.contains(&value);
                        let inserted = set.insert(value);
                        prop_assert_eq!(inserted, !was_present);
                        if inserted {
                            let pos = set.index_of(&value).expect("freshly inserted");
                            if let Some(prev) = highest_assigned {
                                prop_assert!(
                                    pos > prev,
                                    "position {} assigned after {}", pos, prev
                                );
                            }
                            highest_assigned = Some(pos);
                        }
                    }
                    Op::Remove(value) => {
                        let pos = set.index_of(&value);
                        let removed = set.remove(&value);
                        prop_assert_eq!(removed, pos.is_some());
                        if let Some(pos) = pos {
                            prop_assert!(set.get(pos).is_none());
                        }
                    }
                    Op::Take(pos) => {
                        if let Some(value) = set.take(pos) {
                            prop_assert!(!set.contains(&value));
                            prop_assert!(set.get(pos).is_none());
                        }
                    }
                }
                prop_assert!(set.len() <= capacity);
            }
        }

        #[test]
        fn eviction_is_fifo_and_survivors_keep_positions(
            capacity in 1usize..12,
            extra in 1usize..40,
        ) {
            let total = capacity + extra;
            let mut set = BoundedIndexSet::new(capacity);
            for value in 0..total as u32 {
                set.insert(value);
            }

            // Exactly the last `capacity` insertions survive, each at its
            // original position.
            for value in 0..total as u32 {
                let pos = u64::from(value);
                if (value as usize) < extra {
                    prop_assert!(!set.contains(&value));
                    prop_assert!(set.get(pos).is_none());
                } else {
                    prop_assert_eq!(set.index_of(&value), Some(pos));
                    prop_assert_eq!(set.get(pos), Some(&value));
                }
            }
            prop_assert_eq!(set.len(), capacity);
        }
    }
}
