//! Pure synchronous reliability layer for datagram connections.
//!
//! This crate holds the per-peer state machine used by tickwire's datagram
//! transport: sequence-id assignment, the 32-id acknowledgement bitmap,
//! the pending-send table with timed retransmission, keepalives, and
//! liveness tracking. It performs no I/O and never reads the clock; callers
//! pass `Instant`s in and move encoded datagrams out via `drain_output()`.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  tickwire-core               │
//! │                              │
//! │  protocol  ← header, stats   │
//! │  window    ← ack bitmap      │
//! │  config    ← timers          │
//! │  error     ← channel errors  │
//! │  channel   ← state machine   │
//! └──────────────────────────────┘
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod protocol;
pub mod window;

pub use channel::{PendingSend, Received, ReliableChannel};
pub use config::ChannelConfig;
pub use error::{ChannelError, ChannelResult};
pub use protocol::*;
pub use window::AckWindow;
