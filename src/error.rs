//! Error types for tickwire connection managers

use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tickwire_core::ChannelError;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors surfaced by connection managers and connections
#[derive(Error, Debug)]
pub enum TransportError {
    /// Bad arguments or misuse of manager state
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Host name did not resolve to any address
    #[error("Failed to resolve {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Every resolved candidate refused the connection
    #[error("Failed to connect to {host} after {attempts} attempt(s): {source}")]
    ConnectFailure {
        host: String,
        attempts: usize,
        #[source]
        source: io::Error,
    },

    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation not available on this transport
    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    /// The peer went away: orderly close, reset, or liveness timeout
    #[error("Connection closed by peer {peer}")]
    PeerClosed { peer: SocketAddr },

    #[error("No active connection")]
    NotConnected,

    /// Malformed datagram reported by the reliability layer
    #[error("Protocol error: {0}")]
    Protocol(ChannelError),
}

impl From<ChannelError> for TransportError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Config { message } => TransportError::Config { message },
            other => TransportError::Protocol(other),
        }
    }
}

impl TransportError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        TransportError::Config {
            message: message.into(),
        }
    }

    /// Create an unsupported-operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        TransportError::Unsupported {
            message: message.into(),
        }
    }

    pub fn peer_closed(peer: SocketAddr) -> Self {
        TransportError::PeerClosed { peer }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, TransportError::Config { .. })
    }

    /// Check if this error indicates the peer is gone
    pub fn is_peer_closed(&self) -> bool {
        match self {
            TransportError::PeerClosed { .. } => true,
            TransportError::Io(e) => is_disconnect(e),
            _ => false,
        }
    }

    /// Check if a later tick may succeed without intervention
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ),
            TransportError::Protocol(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

/// I/O error kinds that mean the stream peer is gone rather than the tick failing
pub(crate) fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_config_errors_map_to_config() {
        let err: TransportError = ChannelError::config("bad timers").into();
        assert!(err.is_config());

        let err: TransportError = ChannelError::truncated(3).into();
        assert!(matches!(err, TransportError::Protocol(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn reset_counts_as_peer_closed() {
        let err = TransportError::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(err.is_peer_closed());
        assert!(!err.is_recoverable());

        let err = TransportError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_peer_closed());
    }

    #[test]
    fn display_names_the_peer() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(
            TransportError::peer_closed(peer).to_string(),
            "Connection closed by peer 127.0.0.1:4000"
        );
    }
}
