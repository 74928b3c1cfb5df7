//! Shared test helpers for loopback manager tests
#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tickwire::tickwire_core::ReliableChannel;
use tickwire::{ClientManager, Connection, ManagerConfig, ServerManager};
use tokio::time::Instant;

/// How long a helper keeps ticking before giving up
pub const DEADLINE: Duration = Duration::from_secs(5);

/// A TCP port nobody is listening on right now.
pub fn free_tcp_port() -> u32 {
    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    listener.local_addr().unwrap().port() as u32
}

/// A UDP port nobody is bound to right now.
pub fn free_udp_port() -> u32 {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    socket.local_addr().unwrap().port() as u32
}

/// Loopback-only server config
pub fn server_config(config: ManagerConfig) -> ManagerConfig {
    config.bind_ip(Ipv4Addr::LOCALHOST.into())
}

/// A listening server plus a client connected to it.
pub async fn connected_pair<S: Default>(
    config: ManagerConfig,
) -> (ServerManager<S>, ClientManager<S>, u32) {
    let port = match config.transport {
        tickwire::TransportKind::Stream => free_tcp_port(),
        tickwire::TransportKind::Datagram => free_udp_port(),
    };
    let mut server = ServerManager::new(server_config(config.clone()));
    server.listen(port, false).await.unwrap();

    let mut client = ClientManager::new(config);
    client.connect("127.0.0.1", port).await.unwrap();
    (server, client, port)
}

/// Tick both sides until `done` holds; panics at the deadline.
pub async fn tick_until<S: Default>(
    server: &ServerManager<S>,
    client: &mut ClientManager<S>,
    mut done: impl FnMut() -> bool,
) {
    let deadline = Instant::now() + DEADLINE;
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached before deadline");
        server.tick().await.unwrap();
        client.tick().await.unwrap();
    }
}

/// Tick until the server reports its first new connection.
pub async fn accept_one<S: Default>(
    server: &ServerManager<S>,
    client: &mut ClientManager<S>,
) -> Arc<Connection<S>> {
    let deadline = Instant::now() + DEADLINE;
    loop {
        assert!(Instant::now() < deadline, "no connection accepted");
        server.tick().await.unwrap();
        client.tick().await.unwrap();
        if let Some(conn) = server.drain_new().into_iter().find_map(|w| w.upgrade()) {
            return conn;
        }
    }
}

/// Tick the client alone until it fails, returning the error.
pub async fn client_error<S: Default>(client: &mut ClientManager<S>) -> tickwire::TransportError {
    let deadline = Instant::now() + DEADLINE;
    loop {
        assert!(Instant::now() < deadline, "client never failed");
        if let Err(e) = client.tick().await {
            return e;
        }
    }
}

/// Deliver all queued output from one channel into another.
pub fn transfer(src: &mut ReliableChannel, dst: &mut ReliableChannel, now: std::time::Instant) {
    for datagram in src.drain_output() {
        let _ = dst.input(datagram, now);
    }
}

pub fn loopback(port: u32) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port as u16))
}
