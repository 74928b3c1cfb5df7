//! # tickwire
//!
//! Connection-oriented networking over TCP streams and reliable UDP
//! datagrams, driven entirely by the caller. There are no background
//! tasks: each call to `tick()` performs one bounded readiness wait, reads
//! what arrived, and runs datagram upkeep (retransmission, keepalive,
//! liveness).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tickwire::{ClientManager, ManagerConfig, ServerManager};
//!
//! #[tokio::main]
//! async fn main() -> tickwire::Result<()> {
//!     let mut server: ServerManager = ServerManager::new(ManagerConfig::datagram());
//!     server.listen(7777, false).await?;
//!
//!     let mut client: ClientManager = ClientManager::new(ManagerConfig::datagram());
//!     client.connect("127.0.0.1", 7777).await?;
//!     client.send(b"hello\n").await?;
//!
//!     loop {
//!         server.tick().await?;
//!         client.tick().await?;
//!         for conn in server.drain_new().iter().filter_map(|w| w.upgrade()) {
//!             println!("new peer {}", conn.peer_addr());
//!         }
//!         for conn in server.connections() {
//!             while let Some(line) = conn.get_line() {
//!                 conn.send(&line).await?;
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────┐
//! │   Managers              │  ClientManager, ServerManager
//! ├─────────────────────────┤
//! │   Connections           │  Connection, Inbox, Registry
//! ├─────────────────────────┤
//! │   Reliability (core)    │  ReliableChannel, AckWindow
//! ├─────────────────────────┤
//! │   Sockets               │  tokio TcpStream / UdpSocket
//! └─────────────────────────┘
//! ```

pub mod buffer_pool;
pub mod config;
pub mod error;
pub mod metrics;
pub mod net;

pub use config::{ManagerConfig, TransportKind};
pub use error::{Result, TransportError};
pub use net::{ClientManager, ClosedConnection, Connection, ConnectionId, ServerManager};

// Protocol core
pub use tickwire_core;
pub use tickwire_core::{ChannelConfig, ChannelStats, FailurePolicy, SeqNum};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_VERSION: u32 = 1;
