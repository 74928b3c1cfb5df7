//! Receive-side record of which ids have arrived

use crate::protocol::{constants::ACK_WINDOW, DatagramHeader, SeqNum};
use std::collections::BTreeSet;

/// Ids received from the peer within [`ACK_WINDOW`] of the highest one.
///
/// Ids older than the window are forgotten, so a very late duplicate is
/// accepted again as new.
#[derive(Debug, Clone, Default)]
pub struct AckWindow {
    high: Option<SeqNum>,
    seen: BTreeSet<SeqNum>,
}

impl AckWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest id received so far
    pub fn highest(&self) -> Option<SeqNum> {
        self.high
    }

    pub fn contains(&self, id: SeqNum) -> bool {
        self.seen.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Record `id`. Returns `false` if it was already in the window.
    pub fn record(&mut self, id: SeqNum) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        if self.high.map_or(true, |high| id > high) {
            self.high = Some(id);
        }
        self.prune();
        true
    }

    fn prune(&mut self) {
        if let Some(high) = self.high {
            let floor = high.saturating_sub(ACK_WINDOW);
            self.seen = self.seen.split_off(&floor);
        }
    }

    /// Bitmap of ids received below the highest one
    pub fn ack_bits(&self) -> u32 {
        let Some(high) = self.high else {
            return 0;
        };
        self.seen
            .range(..high)
            .map(|id| high - id - 1)
            .filter(|offset| *offset < ACK_WINDOW)
            .fold(0u32, |bits, offset| bits | (1u32 << offset))
    }

    /// Header for an outgoing datagram carrying `seq`
    pub fn header(&self, seq: SeqNum) -> DatagramHeader {
        DatagramHeader::new(seq, self.high, self.ack_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_acks_nothing() {
        let window = AckWindow::new();
        let header = window.header(0);
        assert_eq!(header.high_ack, None);
        assert_eq!(header.ack_bits, 0);
    }

    #[test]
    fn bitmap_marks_ids_below_highest() {
        let mut window = AckWindow::new();
        for id in [5, 8, 10] {
            assert!(window.record(id));
        }
        assert_eq!(window.highest(), Some(10));
        // 10 - 2 = 8 -> bit 1, 10 - 5 = 5 -> bit 4
        assert_eq!(window.ack_bits(), 0b1_0010);
    }

    #[test]
    fn out_of_order_arrival_keeps_highest() {
        let mut window = AckWindow::new();
        window.record(4);
        window.record(2);
        assert_eq!(window.highest(), Some(4));
        assert_eq!(window.ack_bits(), 0b10);
    }

    #[test]
    fn duplicates_are_reported() {
        let mut window = AckWindow::new();
        assert!(window.record(1));
        assert!(!window.record(1));
    }

    #[test]
    fn ids_past_the_window_are_forgotten() {
        let mut window = AckWindow::new();
        window.record(0);
        window.record(40);
        assert!(!window.contains(0));
        assert_eq!(window.len(), 1);
        // No longer checked, so it counts as new again.
        assert!(window.record(0));
        assert!(!window.contains(0));
    }

    #[test]
    fn full_bitmap() {
        let mut window = AckWindow::new();
        for id in 0..=32 {
            window.record(id);
        }
        assert_eq!(window.ack_bits(), u32::MAX);
    }
}
