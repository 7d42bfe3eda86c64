//! Incremental decoder for the first message of an inbound stream
//!
//! The handshake has no length prefix: the JSON document is its own framing.
//! Bytes are pulled from the stream until one complete value parses. The peer
//! waits for [`crate::ACK`] before sending payload, so normally nothing
//! follows the document; anything that does is handed back as `trailing`.

use crate::messages::{ProtoError, Target, TargetMessage};
use crate::MAX_HANDSHAKE_SIZE;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 1024;

/// A decoded handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub target: Target,
    /// Bytes received after the end of the JSON document
    pub trailing: Vec<u8>,
}

#[derive(Debug)]
pub struct HandshakeDecoder {
    buf: Vec<u8>,
    limit: usize,
}

impl Default for HandshakeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeDecoder {
    pub fn new() -> Self {
        Self::with_limit(MAX_HANDSHAKE_SIZE)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    /// Read from `reader` until a complete handshake has been decoded
    pub async fn decode<R>(mut self, reader: &mut R) -> Result<Handshake, ProtoError>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(handshake) = self.try_parse()? {
                return Ok(handshake);
            }

            let room = self.limit.saturating_sub(self.buf.len());
            if room == 0 {
                return Err(ProtoError::TooLarge { limit: self.limit });
            }

            let n = reader.read(&mut chunk[..room.min(READ_CHUNK)]).await?;
            if n == 0 {
                return Err(ProtoError::UnexpectedEof);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// `Ok(None)` means the buffer holds an incomplete document
    fn try_parse(&self) -> Result<Option<Handshake>, ProtoError> {
        let mut values =
            serde_json::Deserializer::from_slice(&self.buf).into_iter::<TargetMessage>();

        match values.next() {
            None => Ok(None),
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(ProtoError::Malformed(e)),
            Some(Ok(message)) => {
                let consumed = values.byte_offset();
                tracing::trace!(
                    consumed,
                    trailing = self.buf.len() - consumed,
                    "Decoded handshake message"
                );
                let target = Target::try_from(message)?;
                Ok(Some(Handshake {
                    target,
                    trailing: self.buf[consumed..].to_vec(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_decode_complete_message() {
        let mut input: &[u8] = br#"{"type":"tcp","port":8080}"#;
        let handshake = HandshakeDecoder::new().decode(&mut input).await.unwrap();

        assert_eq!(handshake.target, Target::Tcp { port: 8080 });
        assert!(handshake.trailing.is_empty());
    }

    #[tokio::test]
    async fn test_decode_fragmented_message() {
        let (mut client, mut server) = tokio::io::duplex(4);

        let writer = tokio::spawn(async move {
            for piece in [r#"{"ty"#, r#"pe":"un"#, r#"ix","path":"/tmp"#, r#"/a.sock"}"#] {
                client.write_all(piece.as_bytes()).await.unwrap();
            }
            client
        });

        let handshake = HandshakeDecoder::new().decode(&mut server).await.unwrap();
        assert_eq!(
            handshake.target,
            Target::Unix {
                path: PathBuf::from("/tmp/a.sock")
            }
        );
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_decode_keeps_trailing_bytes() {
        let mut input: &[u8] = b"{\"type\":\"tcp\",\"port\":22}\nSSH-2.0";
        let handshake = HandshakeDecoder::new().decode(&mut input).await.unwrap();

        assert_eq!(handshake.target, Target::Tcp { port: 22 });
        assert_eq!(handshake.trailing, b"\nSSH-2.0");
    }

    #[tokio::test]
    async fn test_decode_eof_before_complete() {
        let mut input: &[u8] = br#"{"type":"tcp","#;
        let err = HandshakeDecoder::new().decode(&mut input).await.unwrap_err();
        assert!(matches!(err, ProtoError::UnexpectedEof));

        let mut empty: &[u8] = b"";
        let err = HandshakeDecoder::new().decode(&mut empty).await.unwrap_err();
        assert!(matches!(err, ProtoError::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_decode_malformed_json() {
        let mut input: &[u8] = b"not json at all";
        let err = HandshakeDecoder::new().decode(&mut input).await.unwrap_err();
        assert!(matches!(err, ProtoError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_decode_unknown_kind() {
        let mut input: &[u8] = br#"{"type":"sctp","port":1}"#;
        let err = HandshakeDecoder::new().decode(&mut input).await.unwrap_err();
        assert!(matches!(err, ProtoError::UnknownKind(kind) if kind == "sctp"));
    }

    #[tokio::test]
    async fn test_decode_size_limit() {
        let padding = " ".repeat(64);
        let json = format!(r#"{{"type":"tcp",{}"port":1}}"#, padding);
        let mut input = json.as_bytes();

        let err = HandshakeDecoder::with_limit(32)
            .decode(&mut input)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtoError::TooLarge { limit: 32 }));
    }
}
