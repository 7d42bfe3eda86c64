//! Session tests against a real yamux client on the other end of the pipe

use futures::StreamExt;
use portpipe_transport::{
    create_session, DuplexPipe, HalfClose, MuxSession, MuxStream, SessionConfig, SessionError,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_yamux::{Config, Control, Session, StreamHandle};

type ServerPipe = DuplexPipe<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

fn server_pipe(io: DuplexStream) -> ServerPipe {
    let (read_half, write_half) = tokio::io::split(io);
    DuplexPipe::new(read_half, write_half)
}

struct Client {
    control: Control,
    incoming: mpsc::UnboundedReceiver<StreamHandle>,
    driver: JoinHandle<()>,
}

fn spawn_client(io: DuplexStream) -> Client {
    let mut session = Session::new_client(io, Config::default());
    let control = session.control();
    let (tx, incoming) = mpsc::unbounded_channel();

    let driver = tokio::spawn(async move {
        while let Some(Ok(stream)) = session.next().await {
            if tx.send(stream).is_err() {
                break;
            }
        }
    });

    Client {
        control,
        incoming,
        driver,
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig::default().with_readiness(100, Duration::from_millis(20))
}

#[tokio::test]
async fn test_session_ready_with_passive_client() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    // The client only drives its session; it never opens or writes anything
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let mut client = spawn_client(client_io);

    let server = tokio::time::timeout(
        Duration::from_secs(5),
        create_session(server_pipe(server_io), &SessionConfig::default()),
    )
    .await
    .expect("readiness check should not use the whole budget")
    .expect("passive client should answer the readiness ping");
    assert!(!server.is_closed());

    let mut outbound = server.open_stream().await.unwrap();
    outbound.write_all(b"hello").await.unwrap();
    outbound.shutdown().await.unwrap();

    let mut inbound = tokio::time::timeout(Duration::from_secs(5), client.incoming.recv())
        .await
        .expect("client never saw the stream")
        .unwrap();

    let mut received = Vec::new();
    inbound.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"hello");
}

#[tokio::test]
async fn test_stream_opened_before_ready_is_accepted() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let mut client = spawn_client(client_io);

    // Frames sent before the session exists are replayed to it
    let mut stream = client.control.open_stream().await.unwrap();
    stream.write_all(b"hi").await.unwrap();

    let server = create_session(server_pipe(server_io), &fast_config())
        .await
        .expect("session should become ready");

    let mut accepted = tokio::time::timeout(Duration::from_secs(5), server.accept_stream())
        .await
        .expect("accept timed out")
        .unwrap()
        .expect("session ended unexpectedly");

    let mut buf = [0u8; 2];
    accepted.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hi");
    assert!(accepted.supports_half_close());
    let _ = accepted.stream_id();
}

#[tokio::test(start_paused = true)]
async fn test_session_fails_when_peer_silent() {
    let (_silent_peer, server_io) = tokio::io::duplex(64 * 1024);
    let config = SessionConfig::default().with_readiness(5, Duration::from_millis(20));

    let started = tokio::time::Instant::now();
    let err = create_session(server_pipe(server_io), &config)
        .await
        .unwrap_err();

    match err {
        SessionError::PeerUnresponsive { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("expected PeerUnresponsive, got {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_session_fails_when_peer_gone() {
    let (peer, server_io) = tokio::io::duplex(64 * 1024);
    drop(peer);
    let config = SessionConfig::default().with_readiness(3, Duration::from_millis(5));

    let err = create_session(server_pipe(server_io), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::PeerUnresponsive { attempts: 3, .. }));
}

#[tokio::test]
async fn test_accept_ends_when_peer_disconnects() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let client = spawn_client(client_io);

    let server = create_session(server_pipe(server_io), &fast_config())
        .await
        .unwrap();

    client.driver.abort();
    let _ = client.driver.await;
    drop(client.control);

    let result = tokio::time::timeout(Duration::from_secs(5), server.accept_stream())
        .await
        .expect("accept should return after the peer goes away");

    match result {
        Ok(None) => {}
        Err(e) => assert!(e.is_orderly_shutdown(), "unexpected error: {}", e),
        Ok(Some(stream)) => panic!("unexpected stream {:?}", stream),
    }
}

#[tokio::test]
async fn test_close_marks_session_closed() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let _client = spawn_client(client_io);

    let server = create_session(server_pipe(server_io), &fast_config())
        .await
        .unwrap();

    server.close().await;
    assert!(server.is_closed());
    assert!(server.open_stream().await.is_err());
}
