//! Multiplexed session over the duplex pipe
//!
//! [`MuxSession`] is the contract the tunnel needs from a multiplexer:
//! accept peer-opened streams, open streams towards the peer and close.
//! [`YamuxSession`] provides it with `tokio-yamux` in server mode. Readiness
//! is checked on the pipe before the session exists (see [`crate::readiness`]).

use crate::config::SessionConfig;
use crate::error::{TransportError, TransportResult};
use crate::half_close::HalfClose;
use crate::pipe::DuplexPipe;
use async_trait::async_trait;
use futures::StreamExt;
use std::fmt::Debug;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, Mutex};
use tokio_yamux::{Control, Session, StreamHandle};
use tracing::{debug, trace, warn};

/// Upper bound on waiting for the yamux driver to acknowledge a close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// One logical duplex channel inside a session
pub trait MuxStream: AsyncRead + AsyncWrite + HalfClose + Unpin + Send + Debug + 'static {
    /// Stream identifier, unique within the session
    fn stream_id(&self) -> u32;
}

/// A multiplexed session carrying many independent streams
#[async_trait]
pub trait MuxSession: Send + Sync + Debug {
    /// The stream type carried by this session
    type Stream: MuxStream;

    /// Accept the next stream opened by the peer
    ///
    /// Returns `None` once the session has ended and no more streams will arrive.
    async fn accept_stream(&self) -> TransportResult<Option<Self::Stream>>;

    /// Open a new stream towards the peer
    async fn open_stream(&self) -> TransportResult<Self::Stream>;

    /// Close the session, terminating every stream still open
    async fn close(&self);

    /// Check if the session has ended
    fn is_closed(&self) -> bool;
}

/// A yamux stream
pub struct YamuxStream {
    id: u32,
    inner: StreamHandle,
}

impl YamuxStream {
    fn new(inner: StreamHandle) -> Self {
        Self {
            id: inner.id(),
            inner,
        }
    }
}

impl Debug for YamuxStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YamuxStream").field("id", &self.id).finish()
    }
}

impl MuxStream for YamuxStream {
    fn stream_id(&self) -> u32 {
        self.id
    }
}

// yamux sends FIN on shutdown and keeps receiving until the peer does the same
impl HalfClose for YamuxStream {
    fn supports_half_close(&self) -> bool {
        true
    }
}

impl AsyncRead for YamuxStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for YamuxStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Server-side yamux session
pub struct YamuxSession {
    session_id: String,
    control: Control,
    /// Streams accepted by the driver task
    accept_rx: Mutex<mpsc::UnboundedReceiver<io::Result<StreamHandle>>>,
    closed: Arc<AtomicBool>,
}

impl Debug for YamuxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YamuxSession")
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl YamuxSession {
    /// Start a server-mode session over `pipe`
    ///
    /// Must be called from within a tokio runtime: the session is driven by a
    /// spawned task that lives until the pipe fails or the session is closed.
    pub fn new<R, W>(pipe: DuplexPipe<R, W>, config: &SessionConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let session_id = format!("yamux-server-{}", uuid::Uuid::new_v4());

        let mut session = Session::new_server(pipe, config.yamux_config());
        let control = session.control();

        // Accepted streams are queued without bound so the driver never stops
        // polling the session while the coordinator is busy.
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let closed_clone = closed.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            loop {
                match session.next().await {
                    Some(Ok(stream)) => {
                        trace!("[{}] Accepted yamux stream {}", id, stream.id());
                        if accept_tx.send(Ok(stream)).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("[{}] Yamux session error: {}", id, e);
                        let _ = accept_tx.send(Err(e));
                        break;
                    }
                    None => {
                        debug!("[{}] Yamux session closed", id);
                        break;
                    }
                }
            }
            closed_clone.store(true, Ordering::SeqCst);
        });

        Self {
            session_id,
            control,
            accept_rx: Mutex::new(accept_rx),
            closed,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[async_trait]
impl MuxSession for YamuxSession {
    type Stream = YamuxStream;

    async fn accept_stream(&self) -> TransportResult<Option<Self::Stream>> {
        let mut accept_rx = self.accept_rx.lock().await;

        match accept_rx.recv().await {
            Some(Ok(handle)) => Ok(Some(YamuxStream::new(handle))),
            Some(Err(e)) => Err(TransportError::IoError(e)),
            None => Ok(None),
        }
    }

    async fn open_stream(&self) -> TransportResult<Self::Stream> {
        if self.is_closed() {
            return Err(TransportError::ConnectionError(
                "Session closed".to_string(),
            ));
        }

        let mut control = self.control.clone();
        let handle = control.open_stream().await.map_err(|e| {
            TransportError::ConnectionError(format!("Failed to open stream: {:?}", e))
        })?;

        Ok(YamuxStream::new(handle))
    }

    async fn close(&self) {
        debug!("[{}] Closing session", self.session_id);
        let mut control = self.control.clone();
        if tokio::time::timeout(CLOSE_TIMEOUT, control.close())
            .await
            .is_err()
        {
            warn!("[{}] Session close timed out", self.session_id);
        }
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
