//! Error types for the reliability layer

use std::fmt;

/// Result type for channel operations
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// Errors produced by [`ReliableChannel`](crate::ReliableChannel) and
/// [`ChannelConfig`](crate::ChannelConfig) validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Datagram shorter than the fixed header
    Truncated { len: usize },
    /// Timer settings that cannot drive the channel
    Config { message: String },
}

impl ChannelError {
    /// Create a truncation error for a datagram of `len` bytes
    pub fn truncated(len: usize) -> Self {
        ChannelError::Truncated { len }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        ChannelError::Config {
            message: message.into(),
        }
    }

    /// Malformed input only affects the datagram it arrived in
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChannelError::Truncated { .. })
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Truncated { len } => write!(
                f,
                "Datagram truncated: {len} bytes, header needs {}",
                crate::protocol::constants::HEADER_SIZE
            ),
            ChannelError::Config { message } => write!(f, "Channel configuration error: {message}"),
        }
    }
}

impl std::error::Error for ChannelError {}
