//! Connecting side: one outbound connection driven by `tick`

use crate::config::{check_port, ManagerConfig, TransportKind, CLIENT_PORTS};
use crate::error::{Result, TransportError};
use crate::metrics::global_metrics;
use crate::net::connection::{Connection, StreamRead};
use crate::net::readiness::wait_for;
use bytes::Bytes;
use std::future::poll_fn;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tickwire_core::{FailurePolicy, SeqNum};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tracing::{debug, info};

/// Holds at most one connection to a server.
///
/// [`connect`](Self::connect) resolves the host and tries each address in
/// order; [`reconnect`](Self::reconnect) repeats that against the same
/// resolved list. Reads and datagram upkeep happen in [`tick`](Self::tick).
pub struct ClientManager<S = ()> {
    config: ManagerConfig,
    host: String,
    candidates: Vec<SocketAddr>,
    connection: Option<Arc<Connection<S>>>,
}

impl<S> ClientManager<S> {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            host: String::new(),
            candidates: Vec::new(),
            connection: None,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// The active connection, if any
    pub fn connection(&self) -> Option<Arc<Connection<S>>> {
        self.connection.clone()
    }

    /// Addresses the last successful resolution produced
    pub fn candidates(&self) -> &[SocketAddr] {
        &self.candidates
    }

    pub fn set_line_mode(&mut self, enabled: bool) {
        self.config.line_mode = enabled;
        if let Some(conn) = &self.connection {
            conn.set_line_mode(enabled);
        }
    }

    pub fn set_poll_timeout(&mut self, timeout: Duration) {
        self.config.poll_timeout = timeout;
    }

    /// Drop the active connection. A no-op when none is active.
    pub fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
            info!(conn = %conn.id(), peer = %conn.peer_addr(), "Client connection closed");
        }
    }

    fn active(&self) -> Result<&Arc<Connection<S>>> {
        self.connection.as_ref().ok_or(TransportError::NotConnected)
    }

    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        self.active()?.send(payload).await
    }

    /// Send one datagram under `policy`; stream connections reject this.
    pub async fn send_with(&self, payload: &[u8], policy: FailurePolicy) -> Result<SeqNum> {
        self.active()?.send_with(payload, policy).await
    }

    pub fn get_data(&self) -> Result<Bytes> {
        Ok(self.active()?.get_data())
    }

    pub fn get_line(&self) -> Result<Option<Bytes>> {
        Ok(self.active()?.get_line())
    }

    pub fn get_packet(&self) -> Result<Option<Bytes>> {
        Ok(self.active()?.get_packet())
    }

    fn teardown(&mut self, conn: &Arc<Connection<S>>, reason: &'static str) -> TransportError {
        self.connection = None;
        conn.close();
        info!(conn = %conn.id(), peer = %conn.peer_addr(), reason, "Server went away");
        TransportError::peer_closed(conn.peer_addr())
    }
}

impl<S: Default> ClientManager<S> {
    /// Resolve `host` and connect to the first address that accepts.
    pub async fn connect(&mut self, host: &str, port: u32) -> Result<()> {
        if self.connection.is_some() {
            return Err(TransportError::config("already connected; close first"));
        }
        let port = check_port(port, &CLIENT_PORTS)?;
        self.config.validate()?;

        let candidates: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|source| TransportError::Resolution {
                host: host.to_string(),
                source,
            })?
            .collect();
        if candidates.is_empty() {
            return Err(TransportError::Resolution {
                host: host.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
            });
        }
        debug!(host, port, candidates = candidates.len(), "Resolved host");

        self.host = host.to_string();
        self.candidates = candidates;
        self.establish().await
    }

    /// Connect again using the addresses resolved by the last `connect`.
    pub async fn reconnect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Err(TransportError::config("already connected; close first"));
        }
        if self.candidates.is_empty() {
            return Err(TransportError::config("reconnect requires a prior connect"));
        }
        self.establish().await
    }

    async fn establish(&mut self) -> Result<()> {
        let candidates = self.candidates.clone();
        let mut last_error = None;

        for addr in candidates.iter().copied() {
            match self.open(addr).await {
                Ok(conn) => {
                    info!(
                        conn = %conn.id(),
                        peer = %addr,
                        transport = ?self.config.transport,
                        "Connected"
                    );
                    self.connection = Some(Arc::new(conn));
                    return Ok(());
                }
                Err(e) => {
                    debug!(peer = %addr, error = %e, "Candidate refused");
                    last_error = Some(e);
                }
            }
        }

        Err(TransportError::ConnectFailure {
            host: self.host.clone(),
            attempts: candidates.len(),
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no candidates")),
        })
    }

    async fn open(&self, addr: SocketAddr) -> io::Result<Connection<S>> {
        match self.config.transport {
            TransportKind::Stream => {
                let stream = TcpStream::connect(addr).await?;
                Ok(Connection::stream(stream, addr, self.config.line_mode))
            }
            TransportKind::Datagram => {
                let local = if addr.is_ipv4() {
                    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
                };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(addr).await?;
                Ok(Connection::datagram(
                    Arc::new(socket),
                    addr,
                    true,
                    self.config.channel.clone(),
                    self.config.line_mode,
                ))
            }
        }
    }

    /// Wait up to the poll timeout for data, read it, and run datagram upkeep.
    ///
    /// Returns [`TransportError::PeerClosed`] once the server is gone; the
    /// connection is dropped before the error is returned.
    pub async fn tick(&mut self) -> Result<()> {
        let conn = self.active()?.clone();

        let ready = wait_for(self.config.poll_timeout, poll_fn(|cx| conn.poll_read_ready(cx))).await;
        let readable = match ready {
            Some(result) => {
                result?;
                true
            }
            None => false,
        };

        let now = Instant::now();
        match conn.transport() {
            TransportKind::Stream => {
                if readable && conn.read_stream(self.config.recv_buffer_size)? == StreamRead::Closed {
                    return Err(self.teardown(&conn, "peer closed"));
                }
            }
            TransportKind::Datagram => {
                if readable {
                    for _ in 0..self.config.max_datagrams_per_tick {
                        if conn.read_datagram(self.config.recv_buffer_size, now)?.is_none() {
                            break;
                        }
                    }
                }
                if conn.is_dead(now) {
                    global_metrics().liveness_timeout();
                    return Err(self.teardown(&conn, "liveness timeout"));
                }
                conn.service(now).await?;
            }
        }
        Ok(())
    }
}

impl<S> Drop for ClientManager<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn port_checked_before_resolution() {
        let mut client: ClientManager = ClientManager::new(ManagerConfig::stream());
        // An unresolvable host would yield Resolution if lookup ran first.
        let err = client.connect("host.invalid", 0).await.unwrap_err();
        assert!(err.is_config());
        let err = client.connect("host.invalid", 70000).await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn operations_need_a_connection() {
        let mut client: ClientManager = ClientManager::new(ManagerConfig::datagram());
        assert!(matches!(client.tick().await, Err(TransportError::NotConnected)));
        assert!(matches!(client.send(b"x").await, Err(TransportError::NotConnected)));
        assert!(matches!(client.get_data(), Err(TransportError::NotConnected)));
        assert!(client.reconnect().await.unwrap_err().is_config());
        client.close();
    }
}
