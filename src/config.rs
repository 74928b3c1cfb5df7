//! Configuration for client and server connection managers

use crate::error::{Result, TransportError};
use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;
use std::time::Duration;
use tickwire_core::protocol::constants::HEADER_SIZE;
use tickwire_core::ChannelConfig;

/// Ports a client may connect to
pub const CLIENT_PORTS: RangeInclusive<u32> = 1..=65535;
/// Ports a server may listen on; privileged ports are refused
pub const SERVER_PORTS: RangeInclusive<u32> = 1024..=65535;

/// Which socket type a manager drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    /// Connection-oriented byte stream (TCP)
    #[default]
    Stream,
    /// Reliable datagrams over UDP
    Datagram,
}

/// Settings shared by [`ClientManager`](crate::ClientManager) and
/// [`ServerManager`](crate::ServerManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub transport: TransportKind,
    /// Upper bound on the readiness wait inside one tick
    pub poll_timeout: Duration,
    /// Line extraction scans across chunks and waits for a newline
    pub line_mode: bool,
    /// Timers for datagram connections
    pub channel: ChannelConfig,
    /// Size of the buffer each read lands in
    pub recv_buffer_size: usize,
    /// Local address servers bind to
    pub bind_ip: IpAddr,
    /// Datagrams drained from the socket after one readiness wake
    pub max_datagrams_per_tick: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Stream,
            poll_timeout: Duration::from_millis(1),
            line_mode: false,
            channel: ChannelConfig::default(),
            recv_buffer_size: 32768,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_datagrams_per_tick: 32,
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default settings over TCP
    pub fn stream() -> Self {
        Self::default().transport(TransportKind::Stream)
    }

    /// Default settings over reliable UDP
    pub fn datagram() -> Self {
        Self::default().transport(TransportKind::Datagram)
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn line_mode(mut self, enabled: bool) -> Self {
        self.line_mode = enabled;
        self
    }

    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn max_datagrams_per_tick(mut self, count: usize) -> Self {
        self.max_datagrams_per_tick = count;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.recv_buffer_size <= HEADER_SIZE || self.recv_buffer_size > 65536 {
            return Err(TransportError::config(format!(
                "recv_buffer_size must be between {} and 65536",
                HEADER_SIZE + 1
            )));
        }

        if self.max_datagrams_per_tick == 0 {
            return Err(TransportError::config(
                "max_datagrams_per_tick must be at least 1",
            ));
        }

        self.channel.validate()?;

        Ok(())
    }
}

/// Narrow a caller-supplied port, rejecting anything outside `range`.
pub(crate) fn check_port(port: u32, range: &RangeInclusive<u32>) -> Result<u16> {
    if !range.contains(&port) {
        return Err(TransportError::config(format!(
            "port {port} outside {}..={}",
            range.start(),
            range.end()
        )));
    }
    u16::try_from(port).map_err(|_| TransportError::config(format!("port {port} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ManagerConfig::default();
        assert_eq!(config.transport, TransportKind::Stream);
        assert_eq!(config.poll_timeout, Duration::from_millis(1));
        assert!(!config.line_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_sets_fields() {
        let config = ManagerConfig::datagram()
            .line_mode(true)
            .poll_timeout(Duration::from_millis(20))
            .max_datagrams_per_tick(4);
        assert_eq!(config.transport, TransportKind::Datagram);
        assert!(config.line_mode);
        assert_eq!(config.poll_timeout, Duration::from_millis(20));
        assert_eq!(config.max_datagrams_per_tick, 4);
    }

    #[test]
    fn invalid_buffer_size_rejected() {
        let config = ManagerConfig::default().recv_buffer_size(HEADER_SIZE);
        assert!(config.validate().unwrap_err().is_config());
    }

    #[test]
    fn invalid_channel_timers_rejected() {
        let config = ManagerConfig::datagram().channel(
            ChannelConfig::new()
                .keepalive_interval(Duration::from_secs(10))
                .liveness_timeout(Duration::from_secs(1)),
        );
        assert!(config.validate().unwrap_err().is_config());
    }

    #[test]
    fn port_ranges() {
        assert_eq!(check_port(80, &CLIENT_PORTS).unwrap(), 80);
        assert!(check_port(0, &CLIENT_PORTS).is_err());
        assert!(check_port(70000, &CLIENT_PORTS).is_err());
        assert!(check_port(80, &SERVER_PORTS).is_err());
        assert!(check_port(1023, &SERVER_PORTS).is_err());
        assert_eq!(check_port(1024, &SERVER_PORTS).unwrap(), 1024);
        assert_eq!(check_port(65535, &SERVER_PORTS).unwrap(), 65535);
    }
}
