//! Event loop of a running tunnel
//!
//! Waits on three sources at once: streams opened by the peer, ports reported
//! by the watcher and the shutdown signal. Every stream and every notification
//! gets its own task, so one slow stream never holds up the loop.

use crate::forwarder::StreamForwarder;
use crate::notifier::PortNotifier;
use portpipe_transport::{MuxSession, MuxStream, TransportError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Why [`Coordinator::run`] returned
///
/// None of these is fatal: the tunnel has simply ended.
#[derive(Debug)]
pub enum ShutdownReason {
    /// The process was asked to stop
    Signal(String),
    /// The peer closed the session or went away
    PeerClosed,
    /// The session broke for some other reason
    TransportFailed(TransportError),
}

impl ShutdownReason {
    /// Classify the error that ended the accept loop
    fn from_accept_error(e: TransportError) -> Self {
        if e.is_orderly_shutdown() {
            tracing::info!(error = %e, "Client disconnected, shutting down");
            ShutdownReason::PeerClosed
        } else {
            tracing::error!(error = %e, "Error accepting stream, shutting down");
            ShutdownReason::TransportFailed(e)
        }
    }
}

pub struct Coordinator<M> {
    session: Arc<M>,
    forwarder: StreamForwarder,
    notifier: PortNotifier<M>,
    port_events: Option<mpsc::Receiver<u16>>,
}

impl<M: MuxSession + 'static> Coordinator<M> {
    pub fn new(session: Arc<M>) -> Self {
        Self {
            notifier: PortNotifier::new(session.clone()),
            session,
            forwarder: StreamForwarder::new(),
            port_events: None,
        }
    }

    /// Forward ports received on `events` to the peer
    pub fn with_port_events(mut self, events: mpsc::Receiver<u16>) -> Self {
        self.port_events = Some(events);
        self
    }

    /// Run until `shutdown` resolves or the session ends
    ///
    /// `shutdown` yields the name of the signal that fired. Tasks already
    /// spawned are not waited for.
    pub async fn run<F>(mut self, shutdown: F) -> ShutdownReason
    where
        F: Future<Output = String>,
    {
        tokio::pin!(shutdown);
        let mut port_events = self.port_events.take();

        tracing::debug!("Event loop started, waiting for streams");

        loop {
            tokio::select! {
                accepted = self.session.accept_stream() => match accepted {
                    Ok(Some(stream)) => self.spawn_forward(stream),
                    Ok(None) => {
                        tracing::info!("Client closed the session, shutting down");
                        return ShutdownReason::PeerClosed;
                    }
                    Err(e) => return ShutdownReason::from_accept_error(e),
                },
                event = next_port(&mut port_events) => match event {
                    Some(port) => self.spawn_notify(port),
                    None => {
                        tracing::debug!("Port watcher stopped");
                        port_events = None;
                    }
                },
                signal = &mut shutdown => {
                    tracing::info!(signal = %signal, "Received signal, shutting down");
                    return ShutdownReason::Signal(signal);
                }
            }
        }
    }

    fn spawn_forward(&self, stream: M::Stream) {
        let stream_id = stream.stream_id();
        tracing::info!(stream_id, "Stream accepted, starting handler");

        let forwarder = self.forwarder.clone();
        tokio::spawn(
            async move { forwarder.handle(stream).await }
                .instrument(tracing::info_span!("stream", stream_id)),
        );
    }

    fn spawn_notify(&self, port: u16) {
        let notifier = self.notifier.clone();
        tokio::spawn(
            async move { notifier.notify(port).await }
                .instrument(tracing::info_span!("notify", port)),
        );
    }
}

/// Next port event, or never if there is no watcher
async fn next_port(events: &mut Option<mpsc::Receiver<u16>>) -> Option<u16> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;

    fn io_error(kind: io::ErrorKind) -> TransportError {
        TransportError::IoError(io::Error::new(kind, "accept failed"))
    }

    #[test]
    fn test_peer_gone_ends_as_peer_closed() {
        for kind in [
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::TimedOut,
        ] {
            let reason = ShutdownReason::from_accept_error(io_error(kind));
            assert!(
                matches!(reason, ShutdownReason::PeerClosed),
                "{:?} gave {:?}",
                kind,
                reason
            );
        }
        assert!(matches!(
            ShutdownReason::from_accept_error(TransportError::StreamClosed),
            ShutdownReason::PeerClosed
        ));
    }

    #[test]
    fn test_other_accept_errors_end_as_transport_failed() {
        let reason = ShutdownReason::from_accept_error(io_error(io::ErrorKind::InvalidData));
        assert!(matches!(
            reason,
            ShutdownReason::TransportFailed(TransportError::IoError(ref e))
                if e.kind() == io::ErrorKind::InvalidData
        ));
    }
}
