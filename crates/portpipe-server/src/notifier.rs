use portpipe_proto::{PortNotification, ProtoError};
use portpipe_transport::{MuxSession, TransportError};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to open stream: {0}")]
    Open(#[from] TransportError),

    #[error("Failed to encode notification: {0}")]
    Encode(#[from] ProtoError),

    #[error("Failed to write notification: {0}")]
    Write(#[from] io::Error),
}

/// Tells the peer about newly listening ports, one stream per port
pub struct PortNotifier<M> {
    session: Arc<M>,
}

impl<M> Clone for PortNotifier<M> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

impl<M: MuxSession> PortNotifier<M> {
    pub fn new(session: Arc<M>) -> Self {
        Self { session }
    }

    /// Deliver one notification; failures are logged and dropped
    pub async fn notify(&self, port: u16) {
        match self.try_notify(port).await {
            Ok(()) => tracing::info!(port, "Notified client about new port"),
            Err(e) => tracing::error!(port, error = %e, "Failed to notify client about port"),
        }
    }

    /// Open a stream, write `{"port":N}\n` and close it
    pub async fn try_notify(&self, port: u16) -> Result<(), NotifyError> {
        let mut stream = self.session.open_stream().await?;
        let message = PortNotification::new(port).encode()?;

        stream.write_all(&message).await?;
        stream.shutdown().await?;

        Ok(())
    }
}
