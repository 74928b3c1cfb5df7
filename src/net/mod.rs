//! Tick-driven connection managers over TCP and reliable UDP

pub mod client;
pub mod connection;
pub mod inbox;
mod readiness;
pub mod registry;
pub mod server;

pub use client::ClientManager;
pub use connection::{Connection, ConnectionId, Demux};
pub use inbox::Inbox;
pub use registry::{ClosedConnection, Registry};
pub use server::ServerManager;
