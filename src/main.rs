//! Portpipe - tunnel endpoint over stdin/stdout
//!
//! Speaks the server side of a yamux session on its standard streams. The
//! peer opens streams naming a local TCP port or Unix socket to reach, and is
//! told about every local port that starts listening.
//!
//! Standard output belongs to the session: all logging goes to stderr or to
//! the file given with `--log-file`.

use anyhow::{Context, Result};
use clap::Parser;
use portpipe_server::{Coordinator, PortWatcher, ProcNetTcp, ShutdownReason, WatcherConfig};
use portpipe_transport::{create_session, DuplexPipe, MuxSession, SessionConfig};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn, Instrument};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Portpipe - forward multiplexed streams from stdin/stdout to local services
#[derive(Parser, Debug)]
#[command(name = "portpipe")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
#[command(long_about = r#"
Portpipe runs at the far end of a byte pipe (typically an SSH session or
`kubectl exec`) and serves a yamux session on stdin/stdout.

Each stream the client opens starts with a JSON message naming the target:
  {"type":"tcp","port":8080}
  {"type":"unix","path":"/run/app.sock"}
Portpipe connects to it, answers "OK" and relays bytes both ways.

Every TCP port that starts listening on this host is announced to the
client on a fresh stream as {"port":N}.

ENVIRONMENT VARIABLES:
  PORTPIPE_LOG_FILE       Write logs to this file instead of stderr
  PORTPIPE_LOG_LEVEL      Log filter (trace, debug, info, warn, error)
  PORTPIPE_NO_PORT_WATCH  Disable listening-port announcements
"#)]
struct Args {
    /// Append logs to this file instead of writing them to stderr
    #[arg(long, env = "PORTPIPE_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PORTPIPE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Interval between session keepalives, in seconds
    #[arg(long, env = "PORTPIPE_KEEPALIVE_INTERVAL_SECS", default_value_t = 30)]
    keepalive_interval_secs: u64,

    /// Write timeout on the pipe before the session is considered dead, in seconds
    #[arg(long, env = "PORTPIPE_WRITE_TIMEOUT_SECS", default_value_t = 60)]
    write_timeout_secs: u64,

    /// Readiness pings before giving up on the client
    #[arg(long, env = "PORTPIPE_PING_ATTEMPTS", default_value_t = 100)]
    ping_attempts: u32,

    /// Delay before each readiness ping, in milliseconds
    #[arg(long, env = "PORTPIPE_PING_INTERVAL_MS", default_value_t = 20)]
    ping_interval_ms: u64,

    /// Seconds between listening-port scans
    #[arg(
        long,
        env = "PORTPIPE_SCAN_INTERVAL_SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    scan_interval_secs: u64,

    /// Do not watch for newly listening ports
    #[arg(long, env = "PORTPIPE_NO_PORT_WATCH")]
    no_port_watch: bool,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_keep_alive(Duration::from_secs(self.keepalive_interval_secs))
            .with_write_timeout(Duration::from_secs(self.write_timeout_secs))
            .with_readiness(
                self.ping_attempts,
                Duration::from_millis(self.ping_interval_ms),
            )
    }

    fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig::default().with_scan_interval(Duration::from_secs(self.scan_interval_secs))
    }
}

/// Setup logging to stderr, or to `log_file` when given
fn setup_logging(log_level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;

            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false)
                        .with_target(true),
                )
                .with(filter)
                .init();

            eprintln!("portpipe: logging to {}", path.display());
        }
        None => {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(false),
                )
                .with(filter)
                .init();
        }
    }

    Ok(())
}

/// Resolves with the name of the first termination signal received
async fn shutdown_signal() -> String {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = wait_for_ctrl_c() => "SIGINT".to_string(),
                    _ = sigterm.recv() => "SIGTERM".to_string(),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                wait_for_ctrl_c().await;
                "SIGINT".to_string()
            }
        }
    }

    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
        "SIGINT".to_string()
    }
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level, args.log_file.as_ref())?;

    info!("Portpipe {} starting", env!("GIT_TAG"));

    let session_config = args.session_config();
    let session = create_session(DuplexPipe::stdio(), &session_config)
        .await
        .context("Failed to establish session with client")?;
    let session = Arc::new(session);

    info!(session_id = %session.session_id(), "Session established");

    let mut coordinator = Coordinator::new(session.clone());

    if args.no_port_watch {
        info!("Port watching disabled");
    } else {
        let (watcher, port_events) =
            PortWatcher::new(ProcNetTcp::default(), &args.watcher_config())
                .context("Failed to start port watcher")?;
        tokio::spawn(watcher.run().instrument(tracing::info_span!("port_watcher")));
        coordinator = coordinator.with_port_events(port_events);
    }

    let reason = coordinator.run(shutdown_signal()).await;

    session.close().await;

    // Every way the loop can end is a normal end of the tunnel
    match reason {
        ShutdownReason::Signal(signal) => {
            info!(signal = %signal, "Portpipe stopped");
        }
        ShutdownReason::PeerClosed => {
            info!("Portpipe stopped, client disconnected");
        }
        ShutdownReason::TransportFailed(e) => {
            error!("Portpipe stopped, session failed: {}", e);
        }
    }

    Ok(())
}
