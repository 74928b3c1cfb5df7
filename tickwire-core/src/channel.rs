//! Per-peer reliability state machine
//!
//! A [`ReliableChannel`] owns everything one side of a datagram connection
//! needs: the next outgoing id, the [`AckWindow`] of ids received, the
//! table of sends still waiting for an acknowledgement, and the send and
//! receive timestamps behind keepalives and liveness. Encoded datagrams are
//! queued internally and collected with [`ReliableChannel::drain_output`].

use crate::config::ChannelConfig;
use crate::error::{ChannelError, ChannelResult};
use crate::protocol::{decode_datagram, encode_datagram, ChannelStats, FailurePolicy, SeqNum};
use crate::window::AckWindow;
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;
use tracing::{debug, trace};

/// A tracked send waiting for its acknowledgement
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub seq: SeqNum,
    pub payload: Bytes,
    /// Time of the most recent transmission
    pub sent_at: Instant,
    pub policy: FailurePolicy,
    /// Transmissions so far, the first one included
    pub attempts: u32,
}

/// What an accepted datagram carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// New, non-empty payload
    Payload(Bytes),
    /// New datagram with an empty payload
    Keepalive,
    /// Id already in the receive window; acks applied, payload dropped
    Duplicate,
}

/// Sequence-id / ack-bitmap reliability for one peer.
#[derive(Debug)]
pub struct ReliableChannel {
    config: ChannelConfig,
    next_seq: SeqNum,
    window: AckWindow,
    pending: BTreeMap<SeqNum, PendingSend>,
    output: VecDeque<Bytes>,
    overdue: Vec<SeqNum>,
    last_recv: Option<Instant>,
    last_sent: Option<Instant>,
    stats: ChannelStats,
}

impl ReliableChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            next_seq: 0,
            window: AckWindow::new(),
            pending: BTreeMap::new(),
            output: VecDeque::new(),
            overdue: Vec::new(),
            last_recv: None,
            last_sent: None,
            stats: ChannelStats::default(),
        }
    }

    /// Queue `payload` under a fresh id and return that id.
    pub fn send(&mut self, payload: Bytes, policy: FailurePolicy, now: Instant) -> SeqNum {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.stats.bytes_sent += payload.len() as u64;
        self.transmit(seq, payload, policy, 1, now);
        seq
    }

    fn transmit(
        &mut self,
        seq: SeqNum,
        payload: Bytes,
        policy: FailurePolicy,
        attempts: u32,
        now: Instant,
    ) {
        let header = self.window.header(seq);
        self.output.push_back(encode_datagram(&header, &payload));
        self.stats.packets_sent += 1;
        self.last_sent = Some(now);

        trace!(
            seq,
            high_ack = ?header.high_ack,
            ack_bits = header.ack_bits,
            len = payload.len(),
            attempts,
            "Queued datagram"
        );

        if policy.is_tracked() {
            self.pending.insert(
                seq,
                PendingSend {
                    seq,
                    payload,
                    sent_at: now,
                    policy,
                    attempts,
                },
            );
        }
    }

    /// Process one datagram from the peer.
    ///
    /// Any well-formed datagram refreshes liveness and clears the pending
    /// sends it acknowledges, duplicates included.
    pub fn input(&mut self, datagram: Bytes, now: Instant) -> ChannelResult<Received> {
        let len = datagram.len();
        let Some((header, payload)) = decode_datagram(datagram) else {
            self.stats.malformed += 1;
            return Err(ChannelError::truncated(len));
        };

        self.last_recv = Some(now);

        for id in header.acked_ids() {
            if self.pending.remove(&id).is_some() {
                self.stats.acked += 1;
                trace!(seq = id, "Acknowledged");
            }
        }

        if !self.window.record(header.seq) {
            self.stats.duplicates += 1;
            trace!(seq = header.seq, "Duplicate datagram dropped");
            return Ok(Received::Duplicate);
        }

        self.stats.packets_received += 1;
        self.stats.bytes_received += payload.len() as u64;

        if payload.is_empty() {
            Ok(Received::Keepalive)
        } else {
            Ok(Received::Payload(payload))
        }
    }

    /// Retransmit overdue tracked sends and emit a keepalive after send silence.
    pub fn tick(&mut self, now: Instant) {
        let resend_after = self.config.resend_interval;
        let overdue: Vec<SeqNum> = self
            .pending
            .values()
            .filter(|p| now.saturating_duration_since(p.sent_at) >= resend_after)
            .map(|p| p.seq)
            .collect();

        for seq in overdue {
            let Some(pending) = self.pending.remove(&seq) else {
                continue;
            };
            // A resend keeps Notify so repeated losses keep reporting.
            let policy = match pending.policy {
                FailurePolicy::Notify => {
                    self.overdue.push(seq);
                    FailurePolicy::Notify
                }
                _ => FailurePolicy::Resend,
            };
            self.stats.retransmissions += 1;
            debug!(seq, attempts = pending.attempts + 1, "Retransmitting");
            self.transmit(seq, pending.payload, policy, pending.attempts + 1, now);
        }

        let silent = self
            .last_sent
            .map_or(true, |sent| now.saturating_duration_since(sent) >= self.config.keepalive_interval);
        if silent {
            self.stats.keepalives_sent += 1;
            self.send(Bytes::new(), FailurePolicy::Ignore, now);
        }
    }

    /// True once a receipt has happened and none followed within the liveness timeout.
    pub fn is_dead(&self, now: Instant) -> bool {
        self.last_recv.is_some_and(|recv| {
            now.saturating_duration_since(recv) >= self.config.liveness_timeout
        })
    }

    /// Take every encoded datagram queued since the last drain.
    pub fn drain_output(&mut self) -> Vec<Bytes> {
        self.output.drain(..).collect()
    }

    /// Take ids of `Notify` sends that went overdue since the last drain.
    pub fn drain_overdue(&mut self) -> Vec<SeqNum> {
        std::mem::take(&mut self.overdue)
    }

    pub fn is_pending(&self, seq: SeqNum) -> bool {
        self.pending.contains_key(&seq)
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingSend> {
        self.pending.values()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn next_seq(&self) -> SeqNum {
        self.next_seq
    }

    pub fn window(&self) -> &AckWindow {
        &self.window
    }

    pub fn last_received(&self) -> Option<Instant> {
        self.last_recv
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }
}

impl Default for ReliableChannel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DatagramHeader;
    use std::time::Duration;

    #[test]
    fn ids_start_at_zero_and_increase() {
        let now = Instant::now();
        let mut ch = ReliableChannel::default();
        assert_eq!(ch.send(Bytes::from_static(b"a"), FailurePolicy::Ignore, now), 0);
        assert_eq!(ch.send(Bytes::from_static(b"b"), FailurePolicy::Ignore, now), 1);
        assert_eq!(ch.next_seq(), 2);
        assert_eq!(ch.drain_output().len(), 2);
        assert!(ch.drain_output().is_empty());
    }

    #[test]
    fn only_tracked_policies_enter_pending() {
        let now = Instant::now();
        let mut ch = ReliableChannel::default();
        let ignored = ch.send(Bytes::from_static(b"x"), FailurePolicy::Ignore, now);
        let resent = ch.send(Bytes::from_static(b"y"), FailurePolicy::Resend, now);
        let notified = ch.send(Bytes::from_static(b"z"), FailurePolicy::Notify, now);
        assert!(!ch.is_pending(ignored));
        assert!(ch.is_pending(resent));
        assert!(ch.is_pending(notified));
    }

    #[test]
    fn outgoing_header_carries_receive_window() {
        let now = Instant::now();
        let mut ch = ReliableChannel::default();
        for seq in [0u32, 2, 3] {
            let frame = encode_datagram(&DatagramHeader::new(seq, None, 0), b"p");
            ch.input(frame, now).unwrap();
        }
        ch.send(Bytes::new(), FailurePolicy::Ignore, now);
        let frame = ch.drain_output().remove(0);
        let (header, _) = decode_datagram(frame).unwrap();
        assert_eq!(header.high_ack, Some(3));
        // 3 - 1 = 2 -> bit 0, 3 - 3 = 0 -> bit 2
        assert_eq!(header.ack_bits, 0b101);
    }

    #[test]
    fn keepalive_not_repeated_within_interval() {
        let t0 = Instant::now();
        let mut ch = ReliableChannel::default();
        ch.tick(t0);
        assert_eq!(ch.drain_output().len(), 1);
        ch.tick(t0 + Duration::from_millis(100));
        assert!(ch.drain_output().is_empty());
        ch.tick(t0 + Duration::from_millis(250));
        assert_eq!(ch.drain_output().len(), 1);
        assert_eq!(ch.stats().keepalives_sent, 2);
    }

    #[test]
    fn truncated_input_rejected() {
        let mut ch = ReliableChannel::default();
        let err = ch.input(Bytes::from_static(b"short"), Instant::now()).unwrap_err();
        assert_eq!(err, ChannelError::Truncated { len: 5 });
        assert_eq!(ch.stats().malformed, 1);
        assert!(ch.last_received().is_none());
    }
}
