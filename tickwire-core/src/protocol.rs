//! Wire types, constants, and counters for the datagram header

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

/// Protocol constants
pub mod constants {
    use std::time::Duration;

    pub const HEADER_SIZE: usize = 12; // seq + high ack + ack bits
    pub const ACK_WINDOW: u32 = 32; // ids covered by the ack bitmap
    pub const NO_ACK: i32 = -1; // high-ack sentinel before any receipt
    pub const RESEND_INTERVAL: Duration = Duration::from_secs(1);
    pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(250);
    pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Per-direction sequence id
pub type SeqNum = u32;

/// What a tracked send does when its acknowledgement is overdue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FailurePolicy {
    /// Fire and forget; never entered into the pending table
    #[default]
    Ignore,
    /// Retransmit until acknowledged
    Resend,
    /// Retransmit like `Resend` and report each overdue id to the owner
    Notify,
}

impl FailurePolicy {
    /// Whether sends under this policy wait for an acknowledgement
    pub fn is_tracked(self) -> bool {
        !matches!(self, FailurePolicy::Ignore)
    }
}

/// Fixed 12-byte header prefixed to every datagram.
///
/// Fields are written in host byte order, so both peers must share
/// endianness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub seq: SeqNum,
    /// Highest id the sender has received from us, if any
    pub high_ack: Option<SeqNum>,
    /// Bit `i` set means id `high_ack - i - 1` was also received
    pub ack_bits: u32,
}

impl DatagramHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = constants::HEADER_SIZE;

    pub fn new(seq: SeqNum, high_ack: Option<SeqNum>, ack_bits: u32) -> Self {
        Self {
            seq,
            high_ack,
            ack_bits,
        }
    }

    /// Encode header to bytes
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_ne(self.seq);
        // The wire field is signed; ids past i32::MAX travel as their bit pattern.
        let high_ack = match self.high_ack {
            Some(u32::MAX) => {
                debug!(seq = self.seq, "High ack u32::MAX collides with the no-ack sentinel");
                constants::NO_ACK
            }
            Some(id) => id as i32,
            None => constants::NO_ACK,
        };
        buf.put_i32_ne(high_ack);
        buf.put_u32_ne(self.ack_bits);
    }

    /// Decode header from bytes
    pub fn decode(buf: &mut Bytes) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }

        let seq = buf.get_u32_ne();
        let raw = buf.get_i32_ne();
        let high_ack = (raw != constants::NO_ACK).then_some(raw as u32);
        let ack_bits = buf.get_u32_ne();

        Some(Self {
            seq,
            high_ack,
            ack_bits,
        })
    }

    /// Every id this header acknowledges: `high_ack` first, then the bitmap.
    pub fn acked_ids(&self) -> impl Iterator<Item = SeqNum> + '_ {
        let high = self.high_ack;
        high.into_iter().chain(
            (0..constants::ACK_WINDOW)
                .filter(move |bit| self.ack_bits & (1u32 << *bit) != 0)
                .filter_map(move |bit| high.and_then(|h| h.checked_sub(bit + 1))),
        )
    }
}

/// Prefix `payload` with `header`.
pub fn encode_datagram(header: &DatagramHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(DatagramHeader::SIZE + payload.len());
    header.encode(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a datagram into header and payload; `None` when shorter than the header.
pub fn decode_datagram(mut datagram: Bytes) -> Option<(DatagramHeader, Bytes)> {
    let header = DatagramHeader::decode(&mut datagram)?;
    Some((header, datagram))
}

/// Counters kept by a single channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Payload bytes handed to `send`
    pub bytes_sent: u64,
    /// Payload bytes accepted from the peer
    pub bytes_received: u64,
    /// Datagrams produced, retransmissions and keepalives included
    pub packets_sent: u64,
    /// Datagrams accepted as new
    pub packets_received: u64,
    pub retransmissions: u64,
    pub keepalives_sent: u64,
    pub duplicates: u64,
    pub malformed: u64,
    /// Pending sends cleared by an acknowledgement
    pub acked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_twelve_bytes() {
        let header = DatagramHeader::new(7, Some(3), 0b101);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), 12);
        assert_eq!(&buf[0..4], &7u32.to_ne_bytes());
        assert_eq!(&buf[4..8], &3i32.to_ne_bytes());
        assert_eq!(&buf[8..12], &5u32.to_ne_bytes());
    }

    #[test]
    fn missing_high_ack_encodes_as_minus_one() {
        let header = DatagramHeader::new(0, None, 0);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(&buf[4..8], &(-1i32).to_ne_bytes());

        let decoded = DatagramHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded.high_ack, None);
    }

    #[test]
    fn high_ack_past_i32_max_survives_the_wire() {
        let frame = encode_datagram(&DatagramHeader::new(0, Some(0x8000_0005), 0b1), b"");
        let (header, _) = decode_datagram(frame).unwrap();
        assert_eq!(header.high_ack, Some(0x8000_0005));
        assert_eq!(header.acked_ids().collect::<Vec<_>>(), vec![0x8000_0005, 0x8000_0004]);

        // Only the sentinel's own bit pattern is lost.
        let frame = encode_datagram(&DatagramHeader::new(0, Some(u32::MAX), 0), b"");
        assert_eq!(decode_datagram(frame).unwrap().0.high_ack, None);
    }

    #[test]
    fn short_datagram_does_not_decode() {
        assert!(decode_datagram(Bytes::from_static(&[0u8; 11])).is_none());
        let (header, payload) = decode_datagram(Bytes::from_static(&[0u8; 12])).unwrap();
        assert_eq!(header.seq, 0);
        assert!(payload.is_empty());
    }

    #[test]
    fn payload_follows_header() {
        let frame = encode_datagram(&DatagramHeader::new(9, Some(8), 0), b"ping");
        let (header, payload) = decode_datagram(frame).unwrap();
        assert_eq!(header.seq, 9);
        assert_eq!(header.high_ack, Some(8));
        assert_eq!(&payload[..], b"ping");
    }

    #[test]
    fn acked_ids_walk_the_bitmap() {
        let header = DatagramHeader::new(0, Some(10), 0b1_0010);
        let ids: Vec<_> = header.acked_ids().collect();
        assert_eq!(ids, vec![10, 8, 5]);

        // Bits reaching below zero are ignored.
        let low = DatagramHeader::new(0, Some(1), 0b111);
        assert_eq!(low.acked_ids().collect::<Vec<_>>(), vec![1, 0]);

        let none = DatagramHeader::new(0, None, u32::MAX);
        assert_eq!(none.acked_ids().count(), 0);
    }
}
