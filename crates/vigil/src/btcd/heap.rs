//! Priority structure for pending multi-confirmation notifications.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::TxConfirmation;

use super::dispatcher::ConfSubscription;

/// A confirmation subscription waiting for its target depth, together with
/// the details captured when its transaction was first seen in a block.
#[derive(Debug)]
pub(crate) struct ConfEntry {
    /// Block height at which the subscription reaches its requested depth:
    /// `first_seen_height + num_confirmations - 1`.
    pub trigger_height: u32,
    pub details: TxConfirmation,
    pub sub: ConfSubscription,
}

impl PartialEq for ConfEntry {
    fn eq(&self, other: &Self) -> bool {
        self.trigger_height == other.trigger_height
    }
}

impl Eq for ConfEntry {}

impl PartialOrd for ConfEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConfEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap behaves as a min-heap on trigger height.
        other.trigger_height.cmp(&self.trigger_height)
    }
}

/// Min-heap of [`ConfEntry`] ordered by ascending trigger height. Entries
/// with equal trigger heights drain in an unspecified but consistent order.
#[derive(Debug, Default)]
pub(crate) struct ConfirmationHeap {
    entries: BinaryHeap<ConfEntry>,
}

impl ConfirmationHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, entry: ConfEntry) {
        self.entries.push(entry);
    }

    /// Trigger height of the earliest-firing entry, if any.
    pub(crate) fn peek_trigger_height(&self) -> Option<u32> {
        self.entries.peek().map(|entry| entry.trigger_height)
    }

    pub(crate) fn pop(&mut self) -> Option<ConfEntry> {
        self.entries.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;
    use tokio::sync::mpsc;

    use crate::test_util::{block_hash_from_byte, txid_from_byte};
    use crate::types::CONF_CHANNEL_CAPACITY;

    use super::*;

    fn entry(trigger_height: u32, txid: Txid) -> ConfEntry {
        let (conf_tx, _conf_rx) = mpsc::channel(CONF_CHANNEL_CAPACITY);
        let (negative_conf_tx, _negative_rx) = mpsc::channel(CONF_CHANNEL_CAPACITY);
        ConfEntry {
            trigger_height,
            details: TxConfirmation {
                block_hash: block_hash_from_byte(1),
                block_height: trigger_height,
                tx_index: 0,
            },
            sub: ConfSubscription {
                txid,
                num_confirmations: 1,
                initial_confirm_height: 0,
                conf_tx,
                negative_conf_tx,
            },
        }
    }

    #[test]
    fn pops_in_ascending_trigger_height_order() {
        let mut heap = ConfirmationHeap::new();
        heap.push(entry(300, txid_from_byte(1)));
        heap.push(entry(100, txid_from_byte(2)));
        heap.push(entry(200, txid_from_byte(3)));

        assert_eq!(heap.pop().unwrap().trigger_height, 100);
        assert_eq!(heap.pop().unwrap().trigger_height, 200);
        assert_eq!(heap.pop().unwrap().trigger_height, 300);
        assert!(heap.pop().is_none());
    }

    #[test]
    fn peek_matches_the_next_pop() {
        let mut heap = ConfirmationHeap::new();
        assert_eq!(heap.peek_trigger_height(), None);

        heap.push(entry(150, txid_from_byte(1)));
        heap.push(entry(120, txid_from_byte(2)));

        assert_eq!(heap.peek_trigger_height(), Some(120));
        assert_eq!(heap.pop().unwrap().trigger_height, 120);
        assert_eq!(heap.peek_trigger_height(), Some(150));
    }

    #[test]
    fn equal_trigger_heights_all_drain() {
        let mut heap = ConfirmationHeap::new();
        heap.push(entry(100, txid_from_byte(1)));
        heap.push(entry(100, txid_from_byte(2)));
        heap.push(entry(100, txid_from_byte(3)));
        assert_eq!(heap.len(), 3);

        let mut txids: Vec<Txid> = Vec::new();
        while let Some(popped) = heap.pop() {
            assert_eq!(popped.trigger_height, 100);
            txids.push(popped.sub.txid);
        }
        txids.sort_unstable_by_key(|txid| txid.to_byte_array());
        assert_eq!(
            txids,
            vec![txid_from_byte(1), txid_from_byte(2), txid_from_byte(3)]
        );
    }
}
