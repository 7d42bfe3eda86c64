//! Protocol message types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while decoding or encoding protocol messages
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Unknown target type: {0}")]
    UnknownKind(String),

    #[error("Missing port for tcp target")]
    MissingPort,

    #[error("Port out of range: {0}")]
    PortOutOfRange(i64),

    #[error("Missing path for unix target")]
    MissingPath,

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Handshake exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Stream closed before handshake completed")]
    UnexpectedEof,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// First message on every inbound stream, exactly as it appears on the wire
///
/// ```json
/// {"type": "tcp", "port": 8080}
/// {"type": "unix", "path": "/run/app.sock"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMessage {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Validated forwarding target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// TCP service on the loopback interface
    Tcp { port: u16 },
    /// Unix domain socket at the given path
    Unix { path: PathBuf },
}

impl Target {
    /// Wire name of this target kind
    pub fn kind(&self) -> &'static str {
        match self {
            Target::Tcp { .. } => "tcp",
            Target::Unix { .. } => "unix",
        }
    }

    /// Address to dial: `127.0.0.1:<port>` for TCP, the socket path for Unix
    pub fn address(&self) -> String {
        match self {
            Target::Tcp { port } => format!("127.0.0.1:{}", port),
            Target::Unix { path } => path.display().to_string(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind(), self.address())
    }
}

impl TryFrom<TargetMessage> for Target {
    type Error = ProtoError;

    fn try_from(message: TargetMessage) -> Result<Self, Self::Error> {
        match message.kind.as_str() {
            "tcp" => {
                let port = message.port.ok_or(ProtoError::MissingPort)?;
                let port = u16::try_from(port).map_err(|_| ProtoError::PortOutOfRange(port))?;
                Ok(Target::Tcp { port })
            }
            "unix" => match message.path {
                Some(path) if !path.is_empty() => Ok(Target::Unix {
                    path: PathBuf::from(path),
                }),
                _ => Err(ProtoError::MissingPath),
            },
            other => Err(ProtoError::UnknownKind(other.to_string())),
        }
    }
}

/// Sole content of a stream opened towards the peer when a listening port shows up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortNotification {
    pub port: u16,
}

impl PortNotification {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Encode as a single newline-terminated JSON document
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}
