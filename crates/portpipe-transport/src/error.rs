use std::io;
use thiserror::Error;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Stream closed")]
    StreamClosed,

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl TransportError {
    /// Whether this error is the peer going away rather than a fault
    ///
    /// A keepalive that goes unanswered surfaces as `TimedOut`: the peer has
    /// stopped responding, which ends the tunnel like a disconnect does.
    pub fn is_orderly_shutdown(&self) -> bool {
        match self {
            TransportError::StreamClosed => true,
            TransportError::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that prevent a session from becoming usable
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session configuration: {0}")]
    Transport(#[from] TransportError),

    #[error("Peer did not respond to {attempts} readiness pings: {last_error}")]
    PeerUnresponsive {
        attempts: u32,
        #[source]
        last_error: TransportError,
    },
}
