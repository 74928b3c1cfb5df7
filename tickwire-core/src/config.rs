//! Timer configuration for the reliability layer

use crate::error::{ChannelError, ChannelResult};
use crate::protocol::constants;
use std::time::Duration;

/// Timers read by [`ReliableChannel`](crate::ReliableChannel).
///
/// Defaults match the wire protocol's conventional values: resend after one
/// second without an acknowledgement, keepalive after 250 ms of send
/// silence, and declare the peer dead after five seconds without a receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Age after which an unacknowledged tracked send is retransmitted
    pub resend_interval: Duration,
    /// Send silence after which an empty keepalive datagram goes out
    pub keepalive_interval: Duration,
    /// Receive silence after which the peer is considered dead
    pub liveness_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            resend_interval: constants::RESEND_INTERVAL,
            keepalive_interval: constants::KEEPALIVE_INTERVAL,
            liveness_timeout: constants::LIVENESS_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval = interval;
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    /// Reject timer combinations that would keep a healthy peer from ever
    /// looking alive.
    pub fn validate(&self) -> ChannelResult<()> {
        if self.resend_interval.is_zero() {
            return Err(ChannelError::config("resend_interval must be non-zero"));
        }
        if self.keepalive_interval.is_zero() {
            return Err(ChannelError::config("keepalive_interval must be non-zero"));
        }
        if self.liveness_timeout <= self.keepalive_interval {
            return Err(ChannelError::config(
                "liveness_timeout must exceed keepalive_interval",
            ));
        }
        Ok(())
    }
}
