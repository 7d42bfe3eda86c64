use crate::connection::LocalConnection;
use portpipe_proto::{Handshake, HandshakeDecoder, ProtoError, ACK};
use portpipe_transport::HalfClose;
use std::io::{self, Cursor};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Errors that end a single forwarded stream
#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("Failed to decode first stream message from client: {0}")]
    Handshake(#[from] ProtoError),

    #[error("Failed to connect to {address}: {source}")]
    ConnectionFailed {
        address: String,
        source: io::Error,
    },

    #[error("Failed to send OK to client: {0}")]
    Acknowledge(#[source] io::Error),
}

/// Bytes moved in each direction over a forwarded stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub bytes_to_local: u64,
    pub bytes_to_peer: u64,
}

/// Forwards peer-opened streams to local TCP ports and Unix sockets
#[derive(Debug, Clone, Default)]
pub struct StreamForwarder;

impl StreamForwarder {
    pub fn new() -> Self {
        Self
    }

    /// Serve one inbound stream to completion
    ///
    /// Never fails outward: every error ends this stream only and is logged.
    /// The stream (and the local connection, once dialed) is closed when this
    /// returns.
    pub async fn handle<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + HalfClose + Unpin + Send,
    {
        match self.forward(stream).await {
            Ok(stats) => {
                tracing::info!(
                    bytes_to_local = stats.bytes_to_local,
                    bytes_to_peer = stats.bytes_to_peer,
                    "Stream closed"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Stream forwarding failed");
            }
        }
    }

    /// Handshake, dial, acknowledge, then copy until both directions finish
    ///
    /// The acknowledgement is fully written before any payload byte moves in
    /// either direction.
    pub async fn forward<S>(&self, mut stream: S) -> Result<ForwardStats, ForwarderError>
    where
        S: AsyncRead + AsyncWrite + HalfClose + Unpin + Send,
    {
        let Handshake { target, trailing } = HandshakeDecoder::new().decode(&mut stream).await?;

        tracing::info!(target = %target, "Connecting to {}", target.address());

        let connection = LocalConnection::connect(&target).await.map_err(|e| {
            ForwarderError::ConnectionFailed {
                address: target.address(),
                source: e,
            }
        })?;

        stream
            .write_all(ACK)
            .await
            .map_err(ForwarderError::Acknowledge)?;
        stream.flush().await.map_err(ForwarderError::Acknowledge)?;

        tracing::debug!(target = %target, "Connected, forwarding");

        Ok(copy_bidirectional(stream, connection, trailing).await)
    }
}

/// Run both copy directions concurrently and wait for both
///
/// `pending` holds bytes already read from the stream that belong to the
/// local side; they are written before anything else read from the stream.
async fn copy_bidirectional<S, C>(stream: S, connection: C, pending: Vec<u8>) -> ForwardStats
where
    S: AsyncRead + AsyncWrite + HalfClose + Unpin,
    C: AsyncRead + AsyncWrite + HalfClose + Unpin,
{
    let stream_half_close = stream.supports_half_close();
    let connection_half_close = connection.supports_half_close();

    let (stream_read, stream_write) = tokio::io::split(stream);
    let (connection_read, connection_write) = tokio::io::split(connection);

    let to_local = copy_one_way(
        "peer->local",
        Cursor::new(pending).chain(stream_read),
        connection_write,
        connection_half_close,
    );
    let to_peer = copy_one_way(
        "local->peer",
        connection_read,
        stream_write,
        stream_half_close,
    );

    let (bytes_to_local, bytes_to_peer) = tokio::join!(to_local, to_peer);

    ForwardStats {
        bytes_to_local,
        bytes_to_peer,
    }
}

/// Copy until EOF or error, then half-close `dst` if it supports it
///
/// Errors are logged and end this direction only.
async fn copy_one_way<R, W>(direction: &'static str, mut src: R, mut dst: W, half_close: bool) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total_bytes = 0u64;

    let result: io::Result<()> = loop {
        let n = match src.read(&mut buffer).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(e),
        };

        if let Err(e) = dst.write_all(&buffer[..n]).await {
            break Err(e);
        }
        if let Err(e) = dst.flush().await {
            break Err(e);
        }
        total_bytes += n as u64;
    };

    match result {
        Ok(()) => tracing::debug!(direction, total_bytes, "Copy finished"),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            tracing::debug!(direction, total_bytes, "Copy finished at EOF")
        }
        Err(e) => tracing::error!(direction, error = %e, "Copy error"),
    }

    // Only the write side: the other direction may still be flowing
    if half_close {
        if let Err(e) = dst.shutdown().await {
            tracing::debug!(direction, error = %e, "Half-close failed");
        }
    }

    total_bytes
}
