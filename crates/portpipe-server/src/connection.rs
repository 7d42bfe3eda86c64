//! Connection to the local service a stream is forwarded to

use portpipe_proto::Target;
use portpipe_transport::HalfClose;
use std::io;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

#[cfg(unix)]
use tokio::net::UnixStream;

/// A dialed TCP or Unix domain socket connection
#[derive(Debug)]
pub enum LocalConnection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl LocalConnection {
    /// Dial `target` with the matching socket type
    ///
    /// TCP targets are always dialed on the IPv4 loopback address.
    pub async fn connect(target: &Target) -> io::Result<Self> {
        match target {
            Target::Tcp { port } => {
                let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, *port)).await?;
                Ok(LocalConnection::Tcp(stream))
            }
            #[cfg(unix)]
            Target::Unix { path } => {
                let stream = UnixStream::connect(path).await?;
                Ok(LocalConnection::Unix(stream))
            }
            #[cfg(not(unix))]
            Target::Unix { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix domain sockets are not supported on this platform",
            )),
        }
    }
}

impl HalfClose for LocalConnection {
    fn supports_half_close(&self) -> bool {
        match self {
            LocalConnection::Tcp(stream) => stream.supports_half_close(),
            #[cfg(unix)]
            LocalConnection::Unix(stream) => stream.supports_half_close(),
        }
    }
}

impl AsyncRead for LocalConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            LocalConnection::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            LocalConnection::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for LocalConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            LocalConnection::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            LocalConnection::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            LocalConnection::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            LocalConnection::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            LocalConnection::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            LocalConnection::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_tcp_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hello").await.unwrap();
        });

        let mut conn = LocalConnection::connect(&Target::Tcp { port }).await.unwrap();
        assert!(matches!(conn, LocalConnection::Tcp(_)));
        assert!(conn.supports_half_close());

        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        accept.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut conn = LocalConnection::connect(&Target::Unix { path }).await.unwrap();
        conn.write_all(b"ping").await.unwrap();

        assert_eq!(&accept.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_connect_missing_unix_socket_fails() {
        let target = Target::Unix {
            path: "/tmp/portpipe-definitely-missing.sock".into(),
        };
        assert!(LocalConnection::connect(&target).await.is_err());
    }
}
