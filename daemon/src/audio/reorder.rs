//! Bounded reordering of sequenced packets
//!
//! UDP may deliver audio chunks out of order or not at all. The buffer holds
//! early packets until the gap before them fills, but never more than
//! `capacity` of them: once over capacity the oldest are dropped and the
//! cursor jumps forward to the oldest retained packet, so a lost packet
//! cannot stall playback. The cursor never moves backward.

use std::collections::BTreeMap;

use tracing::{debug, trace};

/// Packets collected after a clear before the cursor is placed
pub const ANCHOR_WINDOW: usize = 3;

/// Counters for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReorderStats {
    /// Packets handed to the delivery callback
    pub delivered: u64,
    /// Sequence numbers passed over when the cursor jumped
    pub skipped: u64,
    /// Held packets dropped to stay within capacity
    pub evicted: u64,
    /// Packets that arrived after their slot was already passed
    pub late: u64,
}

/// Reorder buffer keyed by sequence number
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    pending: BTreeMap<u32, T>,
    capacity: usize,
    /// Next sequence to deliver; `None` until anchored after a clear
    next_expected: Option<u32>,
    stats: ReorderStats,
}

impl<T> ReorderBuffer<T> {
    /// Create a buffer expecting sequence 0 first
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            capacity: capacity.max(1),
            next_expected: Some(0),
            stats: ReorderStats::default(),
        }
    }

    #[cfg(test)]
    pub fn next_expected(&self) -> Option<u32> {
        self.next_expected
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> ReorderStats {
        self.stats
    }

    /// Accept a packet and deliver every packet that is now in order
    pub fn on_packet<F>(&mut self, seq: u32, item: T, mut deliver: F)
    where
        F: FnMut(u32, T),
    {
        match self.next_expected {
            None => {
                self.pending.insert(seq, item);
                self.try_anchor(&mut deliver);
            }
            Some(next) if seq < next => {
                trace!(seq, next, "dropping late packet");
                self.stats.late += 1;
            }
            Some(_) => {
                self.pending.insert(seq, item);
                self.drain(&mut deliver);

                if self.pending.len() > self.capacity {
                    self.evict_oldest();
                    self.drain(&mut deliver);
                }
            }
        }
    }

    /// Discard all pending packets; the cursor is placed again once the
    /// next few packets have arrived
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            debug!(discarded = self.pending.len(), "clearing reorder buffer");
        }
        self.pending.clear();
        self.next_expected = None;
    }

    /// Place the cursor at the lowest held sequence once enough packets are
    /// in to tell which one starts the stream
    fn try_anchor<F>(&mut self, deliver: &mut F)
    where
        F: FnMut(u32, T),
    {
        if self.pending.len() < self.capacity.min(ANCHOR_WINDOW) {
            return;
        }
        let Some(&lowest) = self.pending.keys().next() else {
            return;
        };

        debug!(seq = lowest, "anchoring reorder cursor");
        self.next_expected = Some(lowest);
        self.drain(deliver);
    }

    fn drain<F>(&mut self, deliver: &mut F)
    where
        F: FnMut(u32, T),
    {
        let Some(mut next) = self.next_expected else {
            return;
        };

        while let Some(item) = self.pending.remove(&next) {
            deliver(next, item);
            self.stats.delivered += 1;
            next = next.wrapping_add(1);
        }

        self.next_expected = Some(next);
    }

    /// Drop the oldest held packets beyond capacity and move the cursor up
    /// to the oldest one retained
    fn evict_oldest(&mut self) {
        while self.pending.len() > self.capacity {
            if let Some((seq, _)) = self.pending.pop_first() {
                trace!(seq, "evicting held packet");
                self.stats.evicted += 1;
            }
        }

        let (Some(&lowest), Some(next)) = (self.pending.keys().next(), self.next_expected) else {
            return;
        };

        // Forward only.
        if lowest > next {
            let skipped = u64::from(lowest - next);
            debug!(from = next, to = lowest, skipped, "reorder cursor jumped past gap");
            self.stats.skipped += skipped;
            self.next_expected = Some(lowest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(buffer: &mut ReorderBuffer<u32>, seqs: &[u32]) -> Vec<u32> {
        let mut out = Vec::new();
        for &seq in seqs {
            buffer.on_packet(seq, seq, |s, item| {
                assert_eq!(s, item);
                out.push(s);
            });
        }
        out
    }

    #[test]
    fn test_in_order_delivery() {
        let mut buffer = ReorderBuffer::new(10);
        let seqs: Vec<u32> = (0..50).collect();
        assert_eq!(feed(&mut buffer, &seqs), seqs);
        assert!(buffer.is_empty());
        assert_eq!(buffer.next_expected(), Some(50));
    }

    #[test]
    fn test_out_of_order_is_restored() {
        let mut buffer = ReorderBuffer::new(10);
        assert_eq!(feed(&mut buffer, &[2, 0, 1]), vec![0, 1, 2]);
    }

    #[test]
    fn test_holds_until_gap_fills() {
        let mut buffer = ReorderBuffer::new(10);
        assert_eq!(feed(&mut buffer, &[1, 3, 2]), Vec::<u32>::new());
        assert_eq!(buffer.len(), 3);
        assert_eq!(feed(&mut buffer, &[0]), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_sixteen_in_order_never_stalls() {
        let mut buffer = ReorderBuffer::new(10);
        let seqs: Vec<u32> = (0..16).collect();
        assert_eq!(feed(&mut buffer, &seqs).len(), 16);
        assert!(buffer.next_expected().unwrap() >= 5);
    }

    #[test]
    fn test_lost_packet_is_skipped_at_capacity() {
        let mut buffer = ReorderBuffer::new(4);
        assert_eq!(feed(&mut buffer, &[0, 1]), vec![0, 1]);

        // Packet 2 never arrives.
        assert!(feed(&mut buffer, &[3, 4, 5, 6]).is_empty());
        assert_eq!(buffer.next_expected(), Some(2));

        // Fifth held packet evicts the oldest and forces the cursor past
        // the gap.
        assert_eq!(feed(&mut buffer, &[7]), vec![4, 5, 6, 7]);
        assert_eq!(buffer.next_expected(), Some(8));
        assert_eq!(buffer.stats().evicted, 1);
        assert_eq!(buffer.stats().skipped, 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_keeps_newest_window() {
        let mut buffer = ReorderBuffer::new(3);
        // 0..=2 never arrive.
        assert!(feed(&mut buffer, &[5, 4, 3]).is_empty());
        assert_eq!(feed(&mut buffer, &[6]), vec![4, 5, 6]);
        assert_eq!(buffer.next_expected(), Some(7));
        assert!(buffer.len() <= buffer.capacity());
    }

    #[test]
    fn test_overflow_with_several_gaps() {
        let mut buffer = ReorderBuffer::new(2);
        assert!(feed(&mut buffer, &[3, 5]).is_empty());
        // 3 is evicted, the cursor jumps to 5 and stops at the next gap.
        assert_eq!(feed(&mut buffer, &[7]), vec![5]);
        assert_eq!(buffer.next_expected(), Some(6));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_cursor_only_moves_forward() {
        let mut buffer = ReorderBuffer::new(2);
        feed(&mut buffer, &[0, 1, 2]);
        assert_eq!(buffer.next_expected(), Some(3));

        // Stale packet behind the cursor is ignored.
        assert!(feed(&mut buffer, &[1]).is_empty());
        assert_eq!(buffer.next_expected(), Some(3));
        assert_eq!(buffer.stats().late, 1);
    }

    #[test]
    fn test_far_behind_packet_does_not_rewind() {
        let mut buffer = ReorderBuffer::new(10);
        let seqs: Vec<u32> = (0..=30).collect();
        feed(&mut buffer, &seqs);

        // A delayed duplicate from long ago.
        assert!(feed(&mut buffer, &[5]).is_empty());
        assert_eq!(buffer.next_expected(), Some(31));

        assert_eq!(feed(&mut buffer, &[31, 32, 33, 34, 35]), vec![31, 32, 33, 34, 35]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.stats().late, 1);
    }

    #[test]
    fn test_duplicate_pending_is_replaced() {
        let mut buffer = ReorderBuffer::new(10);
        feed(&mut buffer, &[2, 2]);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_clear_empties_and_reanchors() {
        let mut buffer = ReorderBuffer::new(10);
        feed(&mut buffer, &[0, 1, 5, 6]);
        assert_eq!(buffer.len(), 2);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.next_expected(), None);

        // The stream resumes wherever the sender's counter is.
        assert_eq!(feed(&mut buffer, &[40, 41, 42, 43]), vec![40, 41, 42, 43]);
        assert_eq!(buffer.next_expected(), Some(44));
    }

    #[test]
    fn test_swapped_packets_after_clear() {
        let mut buffer = ReorderBuffer::new(10);
        feed(&mut buffer, &[0, 1, 2]);
        buffer.clear();

        assert_eq!(feed(&mut buffer, &[12, 10, 11]), vec![10, 11, 12]);
        assert_eq!(buffer.stats().late, 0);
    }

    #[test]
    fn test_small_capacity_anchors_at_once() {
        let mut buffer = ReorderBuffer::new(1);
        buffer.clear();
        assert_eq!(feed(&mut buffer, &[9]), vec![9]);
    }
}
