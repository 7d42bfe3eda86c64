//! Session creation and readiness
//!
//! The pipe gives no out-of-band "peer attached" signal, so the peer is
//! pinged until it answers. Nothing may use the session before that: the
//! peer could still be wiring up its end.

use crate::config::SessionConfig;
use crate::error::{SessionError, TransportError};
use crate::pipe::DuplexPipe;
use crate::readiness::ReadinessCheck;
use crate::session::YamuxSession;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Wait until the peer answers over `pipe`, then start the server session
pub async fn create_session<R, W>(
    mut pipe: DuplexPipe<R, W>,
    config: &SessionConfig,
) -> Result<YamuxSession, SessionError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    config.validate()?;

    debug!(
        keep_alive_interval = ?config.keep_alive_interval,
        connection_write_timeout = ?config.connection_write_timeout,
        "Yamux config initialized"
    );

    trace!("Verifying client readiness");
    wait_until_ready(&mut pipe, config.ping_attempts, config.ping_interval).await?;

    let session = YamuxSession::new(pipe, config);
    debug!(session_id = session.session_id(), "Yamux session created");

    Ok(session)
}

/// Ping up to `attempts` times, giving each ping `interval` to be answered
///
/// Every attempt takes at least `interval`, so giving up takes
/// `attempts * interval`. Returns the number of attempts it took.
pub async fn wait_until_ready<P>(
    check: &mut P,
    attempts: u32,
    interval: Duration,
) -> Result<u32, SessionError>
where
    P: ReadinessCheck + ?Sized,
{
    let mut last_error = TransportError::Timeout;

    for attempt in 1..=attempts {
        let started = Instant::now();

        match check.check(interval).await {
            Ok(()) => {
                debug!(attempts = attempt, "Successfully pinged the client");
                return Ok(attempt);
            }
            Err(e) => {
                trace!(attempt, error = %e, "Readiness ping failed");
                last_error = e;
                tokio::time::sleep_until(started + interval).await;
            }
        }
    }

    Err(SessionError::PeerUnresponsive {
        attempts,
        last_error,
    })
}
