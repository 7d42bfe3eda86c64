//! Duplex pipe adapter
//!
//! Joins a reader and a writer (normally the process's stdin and stdout)
//! into the single byte channel the multiplexer runs over. Before the
//! multiplexer starts, the pipe also runs the readiness ping (see
//! [`crate::readiness`]). Inbound bytes read while waiting for an answer are kept
//! and handed to the multiplexer first.

use crate::error::{TransportError, TransportResult};
use crate::readiness::{ping_request, PongFilter, ReadinessCheck};
use async_trait::async_trait;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, Stdin, Stdout};
use tokio::time::Instant;
use tracing::trace;

const READ_CHUNK: usize = 8 * 1024;

pub struct DuplexPipe<R, W> {
    reader: R,
    writer: W,
    inbound: PongFilter,
    /// Filtered inbound bytes not yet handed out
    pending: Vec<u8>,
    pending_pos: usize,
    eof: bool,
}

impl<R, W> std::fmt::Debug for DuplexPipe<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexPipe")
            .field("pending", &(self.pending.len() - self.pending_pos))
            .field("pings_answered", &self.inbound.answered())
            .field("eof", &self.eof)
            .finish()
    }
}

impl DuplexPipe<Stdin, Stdout> {
    /// The process's standard input and output as one channel
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> DuplexPipe<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            inbound: PongFilter::default(),
            pending: Vec::new(),
            pending_pos: 0,
            eof: false,
        }
    }
}

impl<R, W> DuplexPipe<R, W>
where
    R: AsyncRead + Unpin,
{
    /// Read one chunk from the peer into `pending`
    ///
    /// Returns the number of raw bytes read, 0 at EOF. Nothing is lost if
    /// the caller stops polling between calls.
    fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut buf = ReadBuf::new(&mut chunk);
        ready!(Pin::new(&mut self.reader).poll_read(cx, &mut buf))?;

        let n = buf.filled().len();
        if n == 0 {
            self.eof = true;
            self.inbound.finish(&mut self.pending);
        } else {
            self.inbound.filter(buf.filled(), &mut self.pending);
        }
        Poll::Ready(Ok(n))
    }
}

impl<R, W> AsyncRead for DuplexPipe<R, W>
where
    R: AsyncRead + Unpin,
    W: Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.pending_pos < this.pending.len() {
                let available = &this.pending[this.pending_pos..];
                let n = available.len().min(buf.remaining());
                buf.put_slice(&available[..n]);
                this.pending_pos += n;
                if this.pending_pos == this.pending.len() {
                    this.pending.clear();
                    this.pending_pos = 0;
                }
                return Poll::Ready(Ok(()));
            }

            if this.eof {
                return Poll::Ready(Ok(()));
            }

            // A chunk may be swallowed whole by the filter; keep reading
            ready!(this.poll_fill(cx))?;
        }
    }
}

impl<R, W> AsyncWrite for DuplexPipe<R, W>
where
    R: Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    // stdout stays open for the life of the process; shutdown only flushes
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }
}

#[async_trait]
impl<R, W> ReadinessCheck for DuplexPipe<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Write a ping request and read until any readiness answer arrives
    ///
    /// Must only be used before the multiplexer owns the pipe. The request is
    /// always written whole, so a timeout never leaves a torn frame behind.
    async fn check(&mut self, wait: Duration) -> TransportResult<()> {
        let deadline = Instant::now() + wait;
        let answered = self.inbound.answered();
        let id = self.inbound.next_id();

        self.writer.write_all(&ping_request(id)).await?;
        self.writer.flush().await?;
        trace!(id, "Sent readiness ping");

        while self.inbound.answered() == answered {
            if self.eof {
                return Err(TransportError::ConnectionError(
                    "Peer closed the pipe".to_string(),
                ));
            }
            match tokio::time::timeout_at(deadline, poll_fn(|cx| self.poll_fill(cx))).await {
                Ok(result) => {
                    result?;
                }
                Err(_) => return Err(TransportError::Timeout),
            }
        }

        Ok(())
    }
}
