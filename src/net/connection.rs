//! One established peer: a TCP stream or a reliable-datagram channel
//!
//! Both transports share the same receive side: each read lands as one
//! chunk in an [`Inbox`], and the owner pulls it out as raw data, single
//! packets, or lines. Datagram connections additionally own a
//! [`ReliableChannel`] that headers, tracks, and retransmits their sends.

use crate::buffer_pool;
use crate::config::TransportKind;
use crate::error::{is_disconnect, Result, TransportError};
use crate::metrics::global_metrics;
use crate::net::inbox::Inbox;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tickwire_core::{ChannelConfig, ChannelStats, FailurePolicy, Received, ReliableChannel, SeqNum};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace, warn};

/// Process-unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of offering a datagram to a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Demux {
    /// Sent by some other peer; left for the next connection
    Foreign,
    /// From this peer and processed
    Accepted(Received),
    /// From this peer but malformed; dropped
    Rejected,
}

/// Outcome of one non-blocking stream read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamRead {
    Data(usize),
    Closed,
    WouldBlock,
}

enum Link {
    /// `None` once closed; clones of the `Arc` keep in-flight writes valid
    Stream(Mutex<Option<Arc<TcpStream>>>),
    Datagram(DatagramLink),
}

struct DatagramLink {
    socket: Arc<UdpSocket>,
    /// Client sockets are `connect`ed; server connections share the listen socket
    connected: bool,
    channel: Mutex<ReliableChannel>,
}

/// An established connection with optional user state `S`.
pub struct Connection<S = ()> {
    id: ConnectionId,
    peer_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    link: Link,
    inbox: Mutex<Inbox>,
    line_mode: AtomicBool,
    closed: AtomicBool,
    state: Mutex<S>,
}

impl<S: Default> Connection<S> {
    pub(crate) fn stream(stream: TcpStream, peer_addr: SocketAddr, line_mode: bool) -> Self {
        let local_addr = stream.local_addr().ok();
        Self::with_link(
            Link::Stream(Mutex::new(Some(Arc::new(stream)))),
            peer_addr,
            local_addr,
            line_mode,
        )
    }

    pub(crate) fn datagram(
        socket: Arc<UdpSocket>,
        peer_addr: SocketAddr,
        connected: bool,
        channel: ChannelConfig,
        line_mode: bool,
    ) -> Self {
        let local_addr = socket.local_addr().ok();
        Self::with_link(
            Link::Datagram(DatagramLink {
                socket,
                connected,
                channel: Mutex::new(ReliableChannel::new(channel)),
            }),
            peer_addr,
            local_addr,
            line_mode,
        )
    }

    fn with_link(
        link: Link,
        peer_addr: SocketAddr,
        local_addr: Option<SocketAddr>,
        line_mode: bool,
    ) -> Self {
        global_metrics().connection_created();
        Self {
            id: ConnectionId::next(),
            peer_addr,
            local_addr,
            link,
            inbox: Mutex::new(Inbox::new()),
            line_mode: AtomicBool::new(line_mode),
            closed: AtomicBool::new(false),
            state: Mutex::new(S::default()),
        }
    }
}

impl<S> Connection<S> {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Numeric host of the peer
    pub fn hostname(&self) -> String {
        self.peer_addr.ip().to_string()
    }

    /// Port of the peer
    pub fn port(&self) -> u16 {
        self.peer_addr.port()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn transport(&self) -> TransportKind {
        match self.link {
            Link::Stream(_) => TransportKind::Stream,
            Link::Datagram(_) => TransportKind::Datagram,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn line_mode(&self) -> bool {
        self.line_mode.load(Ordering::Relaxed)
    }

    pub fn set_line_mode(&self, enabled: bool) {
        self.line_mode.store(enabled, Ordering::Relaxed);
    }

    /// True if data arrived since the last call.
    pub fn take_data_ready(&self) -> bool {
        self.inbox.lock().take_data_ready()
    }

    /// Everything buffered, concatenated; empty when nothing is buffered.
    pub fn get_data(&self) -> Bytes {
        self.inbox.lock().take_all()
    }

    /// One line, or `None` when no complete line is available.
    pub fn get_line(&self) -> Option<Bytes> {
        let line_mode = self.line_mode();
        self.inbox.lock().take_line(line_mode)
    }

    /// The oldest chunk as received, boundaries intact.
    pub fn get_packet(&self) -> Option<Bytes> {
        self.inbox.lock().pop_chunk()
    }

    pub fn buffered_chunks(&self) -> usize {
        self.inbox.lock().len()
    }

    pub fn set_state(&self, state: S) {
        *self.state.lock() = state;
    }

    /// Run `f` against the user state in place.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = self.state.lock();
        f(&mut *state)
    }

    /// Counters of the reliability layer; `None` for stream connections.
    pub fn stats(&self) -> Option<ChannelStats> {
        match &self.link {
            Link::Stream(_) => None,
            Link::Datagram(link) => Some(link.channel.lock().stats().clone()),
        }
    }

    /// Ids of `Notify` sends found overdue since the last call.
    pub fn drain_overdue(&self) -> Vec<SeqNum> {
        match &self.link {
            Link::Stream(_) => Vec::new(),
            Link::Datagram(link) => link.channel.lock().drain_overdue(),
        }
    }

    /// Tracked sends still waiting for an acknowledgement.
    pub fn pending_sends(&self) -> usize {
        match &self.link {
            Link::Stream(_) => 0,
            Link::Datagram(link) => link.channel.lock().pending_count(),
        }
    }

    /// Send `payload`. Datagram sends go out untracked.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        match &self.link {
            Link::Stream(_) => self.write_stream(payload).await,
            Link::Datagram(link) => self
                .send_datagram(link, payload, FailurePolicy::Ignore)
                .await
                .map(|_| ()),
        }
    }

    /// Send one datagram under `policy` and return its sequence id.
    pub async fn send_with(&self, payload: &[u8], policy: FailurePolicy) -> Result<SeqNum> {
        match &self.link {
            Link::Stream(_) => Err(TransportError::unsupported(
                "failure policies apply to datagram connections only",
            )),
            Link::Datagram(link) => self.send_datagram(link, payload, policy).await,
        }
    }

    async fn send_datagram(
        &self,
        link: &DatagramLink,
        payload: &[u8],
        policy: FailurePolicy,
    ) -> Result<SeqNum> {
        if self.is_closed() {
            return Err(TransportError::NotConnected);
        }
        let (seq, frames) = {
            let mut channel = link.channel.lock();
            let seq = channel.send(Bytes::copy_from_slice(payload), policy, Instant::now());
            (seq, channel.drain_output())
        };
        self.transmit(link, frames).await?;
        Ok(seq)
    }

    async fn transmit(&self, link: &DatagramLink, frames: Vec<Bytes>) -> Result<()> {
        for frame in frames {
            let sent = if link.connected {
                link.socket.send(&frame).await
            } else {
                link.socket.send_to(&frame, self.peer_addr).await
            };
            match sent {
                Ok(_) => {}
                // A connected socket reports an earlier ICMP unreachable on the next call.
                Err(e) if link.connected && e.kind() == io::ErrorKind::ConnectionRefused => {
                    trace!(peer = %self.peer_addr, "Datagram peer unreachable");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn stream_handle(&self) -> Option<Arc<TcpStream>> {
        match &self.link {
            Link::Stream(slot) => slot.lock().clone(),
            Link::Datagram(_) => None,
        }
    }

    async fn write_stream(&self, mut data: &[u8]) -> Result<()> {
        let stream = self.stream_handle().ok_or(TransportError::NotConnected)?;
        while !data.is_empty() {
            stream.writable().await?;
            match stream.try_write(data) {
                Ok(0) => return Err(TransportError::peer_closed(self.peer_addr)),
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if is_disconnect(&e) => {
                    return Err(TransportError::peer_closed(self.peer_addr))
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Poll whether the underlying socket has something to read.
    ///
    /// A closed connection never becomes ready.
    pub(crate) fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &self.link {
            Link::Stream(_) => match self.stream_handle() {
                Some(stream) => stream.poll_read_ready(cx),
                None => Poll::Pending,
            },
            Link::Datagram(link) => link.socket.poll_recv_ready(cx),
        }
    }

    /// Read whatever one non-blocking read yields into the inbox.
    pub(crate) fn read_stream(&self, buffer_size: usize) -> Result<StreamRead> {
        let Some(stream) = self.stream_handle() else {
            return Ok(StreamRead::Closed);
        };
        let mut buf = buffer_pool::recv_buffer(buffer_size);
        let result = stream.try_read(&mut buf);
        let outcome = match result {
            Ok(0) => Ok(StreamRead::Closed),
            Ok(n) => {
                self.inbox.lock().push(Bytes::copy_from_slice(&buf[..n]));
                trace!(conn = %self.id, peer = %self.peer_addr, len = n, "Stream chunk");
                Ok(StreamRead::Data(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(StreamRead::WouldBlock),
            Err(e) if is_disconnect(&e) => {
                debug!(conn = %self.id, peer = %self.peer_addr, error = %e, "Stream reset");
                Ok(StreamRead::Closed)
            }
            Err(e) => Err(e.into()),
        };
        buffer_pool::recycle(buf);
        outcome
    }

    /// Read one datagram from a client's connected socket and process it.
    ///
    /// `Ok(None)` when nothing was waiting.
    pub(crate) fn read_datagram(&self, buffer_size: usize, now: Instant) -> Result<Option<Demux>> {
        let Link::Datagram(link) = &self.link else {
            return Ok(None);
        };
        let mut buf = buffer_pool::recv_buffer(buffer_size);
        let result = link.socket.try_recv_from(&mut buf);
        let outcome = match result {
            Ok((n, from)) => Ok(Some(self.offer(from, &Bytes::copy_from_slice(&buf[..n]), now))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                trace!(peer = %self.peer_addr, "Datagram peer unreachable");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        };
        buffer_pool::recycle(buf);
        outcome
    }

    /// Claim `datagram` if it came from this connection's peer.
    pub(crate) fn offer(&self, from: SocketAddr, datagram: &Bytes, now: Instant) -> Demux {
        let Link::Datagram(link) = &self.link else {
            return Demux::Foreign;
        };
        if from != self.peer_addr {
            return Demux::Foreign;
        }

        let result = link.channel.lock().input(datagram.clone(), now);
        match result {
            Ok(Received::Payload(payload)) => {
                trace!(conn = %self.id, peer = %from, len = payload.len(), "Datagram payload");
                self.inbox.lock().push(payload.clone());
                Demux::Accepted(Received::Payload(payload))
            }
            Ok(other) => Demux::Accepted(other),
            Err(e) => {
                warn!(conn = %self.id, peer = %from, error = %e, "Dropping malformed datagram");
                global_metrics().datagram_dropped();
                Demux::Rejected
            }
        }
    }

    /// Whether the datagram peer has gone silent past the liveness timeout.
    pub(crate) fn is_dead(&self, now: Instant) -> bool {
        match &self.link {
            Link::Stream(_) => false,
            Link::Datagram(link) => link.channel.lock().is_dead(now),
        }
    }

    /// Run retransmission and keepalive for a datagram connection.
    pub(crate) async fn service(&self, now: Instant) -> Result<()> {
        let Link::Datagram(link) = &self.link else {
            return Ok(());
        };
        if self.is_closed() {
            return Ok(());
        }
        let frames = {
            let mut channel = link.channel.lock();
            channel.tick(now);
            channel.drain_output()
        };
        self.transmit(link, frames).await
    }

    /// Mark closed and release the socket. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.link {
            Link::Stream(slot) => {
                slot.lock().take();
            }
            Link::Datagram(link) => {
                global_metrics().absorb(link.channel.lock().stats());
            }
        }
        global_metrics().connection_closed();
        debug!(conn = %self.id, peer = %self.peer_addr, "Connection closed");
    }
}

impl<S: Clone> Connection<S> {
    /// Copy of the user state
    pub fn get_state(&self) -> S {
        self.state.lock().clone()
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("transport", &self.transport())
            .field("closed", &self.is_closed())
            .finish()
    }
}
