//! Listening side: accepts peers and services every connection per tick

use crate::buffer_pool;
use crate::config::{check_port, ManagerConfig, TransportKind, SERVER_PORTS};
use crate::error::{Result, TransportError};
use crate::metrics::global_metrics;
use crate::net::connection::{Connection, ConnectionId, Demux, StreamRead};
use crate::net::readiness::wait_for;
use crate::net::registry::{ClosedConnection, Registry};
use bytes::Bytes;
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::task::Poll;
use std::time::{Duration, Instant};
use tickwire_core::DatagramHeader;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, trace, warn};

enum Listener {
    Stream(TcpListener),
    /// Shared with every datagram connection for sending
    Datagram(Arc<UdpSocket>),
}

/// What one stream readiness wait observed
#[derive(Default)]
struct StreamEvents {
    accepted: Option<io::Result<(TcpStream, SocketAddr)>>,
    readable: Vec<usize>,
}

impl StreamEvents {
    fn is_empty(&self) -> bool {
        self.accepted.is_none() && self.readable.is_empty()
    }
}

/// Accepts connections on one port and drives them from [`tick`](Self::tick).
///
/// Nothing runs in the background: accepting, reading, liveness checks,
/// retransmission, and keepalives all happen inside `tick`. The owner
/// polls [`drain_new`](Self::drain_new) and
/// [`drain_closed`](Self::drain_closed) between ticks to learn about
/// arrivals and departures.
pub struct ServerManager<S = ()> {
    config: ManagerConfig,
    listener: Option<Listener>,
    registry: Registry<S>,
}

impl<S> ServerManager<S> {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            listener: None,
            registry: Registry::new(),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn transport(&self) -> TransportKind {
        self.config.transport
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.listener.as_ref()? {
            Listener::Stream(listener) => listener.local_addr().ok(),
            Listener::Datagram(socket) => socket.local_addr().ok(),
        }
    }

    pub fn line_mode(&self) -> bool {
        self.config.line_mode
    }

    /// Switch line mode here and on every live connection.
    pub fn set_line_mode(&mut self, enabled: bool) {
        self.config.line_mode = enabled;
        for conn in self.registry.snapshot() {
            conn.set_line_mode(enabled);
        }
    }

    pub fn set_poll_timeout(&mut self, timeout: Duration) {
        self.config.poll_timeout = timeout;
    }

    /// Connections that appeared since the last call.
    pub fn drain_new(&self) -> Vec<Weak<Connection<S>>> {
        self.registry.drain_new()
    }

    /// Connections the server removed since the last call.
    pub fn drain_closed(&self) -> Vec<ClosedConnection> {
        self.registry.drain_closed()
    }

    pub fn connections(&self) -> Vec<Arc<Connection<S>>> {
        self.registry.snapshot()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn connection_at(&self, index: usize) -> Option<Arc<Connection<S>>> {
        self.registry.get(index)
    }

    pub fn connection_by_id(&self, id: ConnectionId) -> Option<Arc<Connection<S>>> {
        self.registry.find_by_id(id)
    }

    pub fn connection_by_port(&self, port: u16) -> Option<Arc<Connection<S>>> {
        self.registry.find_by_port(port)
    }

    /// Close a connection on the owner's initiative.
    ///
    /// It leaves the live set immediately and is not reported by
    /// [`drain_closed`](Self::drain_closed).
    pub fn close_connection(&self, conn: &Arc<Connection<S>>) -> bool {
        let removed = self.registry.remove(conn);
        conn.close();
        if removed {
            info!(conn = %conn.id(), peer = %conn.peer_addr(), "Connection closed by owner");
        }
        removed
    }

    /// Stop listening and close every connection.
    pub fn shutdown(&mut self) {
        if self.listener.take().is_some() {
            info!(transport = ?self.config.transport, "Server shut down");
        }
        for conn in self.registry.clear() {
            conn.close();
        }
    }

    fn retire(&self, conn: &Arc<Connection<S>>, reason: &'static str) {
        if self.registry.retire(conn) {
            conn.close();
            info!(conn = %conn.id(), peer = %conn.peer_addr(), reason, "Connection removed");
        }
    }

    /// Retire a connection whose own I/O failed; the tick carries on.
    fn retire_failed(&self, conn: &Arc<Connection<S>>, error: &TransportError) {
        warn!(conn = %conn.id(), peer = %conn.peer_addr(), error = %error, "Connection I/O failed");
        self.retire(conn, "i/o failure");
    }
}

impl<S: Default> ServerManager<S> {
    /// Bind and start listening on `port`.
    ///
    /// `blocking` selects blocking accepts on the listening socket. tokio
    /// listeners never block the caller, and every tick waits at most the
    /// poll timeout either way, so the flag is accepted and logged only.
    pub async fn listen(&mut self, port: u32, blocking: bool) -> Result<()> {
        if self.listener.is_some() {
            return Err(TransportError::config("server is already listening"));
        }
        let port = check_port(port, &SERVER_PORTS)?;
        self.config.validate()?;

        let addr = SocketAddr::new(self.config.bind_ip, port);
        let listener = match self.config.transport {
            TransportKind::Stream => Listener::Stream(TcpListener::bind(addr).await?),
            TransportKind::Datagram => Listener::Datagram(Arc::new(UdpSocket::bind(addr).await?)),
        };

        if blocking {
            debug!("Blocking accept requested; ticks stay bounded by the poll timeout");
        }
        self.listener = Some(listener);

        info!(
            addr = %addr,
            transport = ?self.config.transport,
            poll_timeout = ?self.config.poll_timeout,
            "Server listening"
        );
        Ok(())
    }

    /// Run one bounded round of accepting, reading, and connection upkeep.
    pub async fn tick(&self) -> Result<()> {
        match &self.listener {
            None => Err(TransportError::config("tick called before listen")),
            Some(Listener::Stream(listener)) => self.tick_stream(listener).await,
            Some(Listener::Datagram(socket)) => self.tick_datagram(socket).await,
        }
    }

    async fn tick_stream(&self, listener: &TcpListener) -> Result<()> {
        let live = self.registry.snapshot();
        let events = wait_for(
            self.config.poll_timeout,
            poll_fn(|cx| {
                let mut events = StreamEvents::default();
                if let Poll::Ready(accepted) = listener.poll_accept(cx) {
                    events.accepted = Some(accepted);
                }
                for (index, conn) in live.iter().enumerate() {
                    // Readiness errors surface from the read itself.
                    if conn.poll_read_ready(cx).is_ready() {
                        events.readable.push(index);
                    }
                }
                if events.is_empty() {
                    Poll::Pending
                } else {
                    Poll::Ready(events)
                }
            }),
        )
        .await;

        let Some(events) = events else {
            return Ok(());
        };

        match events.accepted {
            Some(Ok((stream, peer))) => {
                let conn = Arc::new(Connection::stream(stream, peer, self.config.line_mode));
                info!(conn = %conn.id(), peer = %peer, "Accepted stream connection");
                self.registry.register(conn);
            }
            // Accept errors belong to one peer; the reads below still run.
            Some(Err(e)) => warn!(error = %e, "Accept failed"),
            None => {}
        }

        for index in events.readable {
            let conn = &live[index];
            match conn.read_stream(self.config.recv_buffer_size) {
                Ok(StreamRead::Closed) => self.retire(conn, "peer closed"),
                Ok(StreamRead::Data(_) | StreamRead::WouldBlock) => {}
                Err(e) => self.retire_failed(conn, &e),
            }
        }
        Ok(())
    }

    async fn tick_datagram(&self, socket: &Arc<UdpSocket>) -> Result<()> {
        let ready = wait_for(self.config.poll_timeout, poll_fn(|cx| socket.poll_recv_ready(cx))).await;

        let now = Instant::now();
        if let Some(ready) = ready {
            ready?;
            let mut buf = buffer_pool::recv_buffer(self.config.recv_buffer_size);
            let received = self.receive_datagrams(socket, &mut buf, now);
            buffer_pool::recycle(buf);
            received?;
        }

        for conn in self.registry.snapshot() {
            if conn.is_dead(now) {
                global_metrics().liveness_timeout();
                self.retire(&conn, "liveness timeout");
                continue;
            }
            if let Err(e) = conn.service(now).await {
                self.retire_failed(&conn, &e);
            }
        }
        Ok(())
    }

    fn receive_datagrams(&self, socket: &Arc<UdpSocket>, buf: &mut [u8], now: Instant) -> Result<()> {
        for _ in 0..self.config.max_datagrams_per_tick {
            let (len, from) = match socket.try_recv_from(buf) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // Some platforms report an earlier ICMP unreachable on the shared socket.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    trace!(error = %e, "Ignoring unreachable report");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.route(socket, Bytes::copy_from_slice(&buf[..len]), from, now);
        }
        Ok(())
    }

    /// Hand a datagram to the connection owning `from`, creating one for a new peer.
    fn route(&self, socket: &Arc<UdpSocket>, datagram: Bytes, from: SocketAddr, now: Instant) {
        for conn in self.registry.snapshot() {
            if !matches!(conn.offer(from, &datagram, now), Demux::Foreign) {
                return;
            }
        }

        if datagram.len() < DatagramHeader::SIZE {
            warn!(peer = %from, len = datagram.len(), "Dropping malformed datagram from unknown peer");
            global_metrics().datagram_dropped();
            return;
        }

        let conn = Arc::new(Connection::datagram(
            socket.clone(),
            from,
            false,
            self.config.channel.clone(),
            self.config.line_mode,
        ));
        info!(conn = %conn.id(), peer = %from, "New datagram peer");
        conn.offer(from, &datagram, now);
        self.registry.register(conn);
    }
}

impl<S> Drop for ServerManager<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tickwire_core::ChannelConfig;

    #[tokio::test]
    async fn privileged_port_rejected() {
        let mut server: ServerManager = ServerManager::new(ManagerConfig::stream());
        let err = server.listen(80, false).await.unwrap_err();
        assert!(err.is_config());
        assert!(!server.is_listening());
    }

    fn loopback_config(transport: TransportKind) -> ManagerConfig {
        ManagerConfig::new()
            .transport(transport)
            .bind_ip(Ipv4Addr::LOCALHOST.into())
            .channel(
                ChannelConfig::new()
                    .resend_interval(Duration::from_millis(100))
                    .keepalive_interval(Duration::from_millis(50)),
            )
    }

    fn free_udp_port() -> u32 {
        let socket = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        socket.local_addr().unwrap().port() as u32
    }

    #[tokio::test]
    async fn blocking_listen_keeps_ticks_bounded() {
        let mut server: ServerManager = ServerManager::new(
            loopback_config(TransportKind::Stream).poll_timeout(Duration::from_millis(1)),
        );
        let port = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port() as u32;
        server.listen(port, true).await.unwrap();

        let ticked = tokio::time::timeout(Duration::from_millis(500), server.tick()).await;
        assert!(matches!(ticked, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn failing_peer_does_not_stall_the_sweep() {
        let config = loopback_config(TransportKind::Datagram);
        let mut server: ServerManager = ServerManager::new(config.clone());
        let port = free_udp_port();
        server.listen(port, false).await.unwrap();

        // A loopback-bound socket cannot reach the broadcast address.
        let Some(Listener::Datagram(socket)) = &server.listener else {
            panic!("datagram listener expected");
        };
        let unreachable = Arc::new(Connection::datagram(
            socket.clone(),
            SocketAddr::from((Ipv4Addr::BROADCAST, 9)),
            false,
            config.channel.clone(),
            false,
        ));
        let unreachable_id = unreachable.id();
        server.registry.register(unreachable);

        let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let frame = tickwire_core::encode_datagram(&DatagramHeader::new(0, None, 0), b"hi");
        peer.send_to(&frame, (Ipv4Addr::LOCALHOST, port as u16)).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut buf = [0u8; 64];
        loop {
            assert!(Instant::now() < deadline, "healthy peer never heard from the server");
            server.tick().await.unwrap();
            if peer.try_recv_from(&mut buf).is_ok() {
                break;
            }
        }

        let closed = server.drain_closed();
        assert!(closed.iter().any(|c| c.id == unreachable_id));
        assert_eq!(server.connection_count(), 1);
        assert_eq!(server.connection_at(0).unwrap().get_data(), Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn tick_before_listen_is_config_error() {
        let server: ServerManager = ServerManager::new(ManagerConfig::datagram());
        assert!(server.tick().await.unwrap_err().is_config());
    }
}
