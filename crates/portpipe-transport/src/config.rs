//! Session configuration

use crate::error::{TransportError, TransportResult};
use std::time::Duration;

/// Multiplexed session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Keep-alive interval (yamux PING frames)
    pub keep_alive_interval: Duration,

    /// How long a frame write may block before the session is torn down.
    /// Pipes can stall under backpressure, so this is far above the yamux default.
    pub connection_write_timeout: Duration,

    /// Readiness pings attempted before giving up on the peer
    pub ping_attempts: u32,

    /// Delay before each readiness ping
    pub ping_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(30),
            connection_write_timeout: Duration::from_secs(60),
            ping_attempts: 100,
            ping_interval: Duration::from_millis(20),
        }
    }
}

impl SessionConfig {
    /// Set custom keep-alive interval
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set custom connection write timeout
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.connection_write_timeout = timeout;
        self
    }

    /// Set the readiness ping ceiling and spacing
    pub fn with_readiness(mut self, attempts: u32, interval: Duration) -> Self {
        self.ping_attempts = attempts;
        self.ping_interval = interval;
        self
    }

    pub fn validate(&self) -> TransportResult<()> {
        if self.keep_alive_interval.is_zero() {
            return Err(TransportError::ConfigurationError(
                "keep-alive interval must be greater than zero".to_string(),
            ));
        }
        if self.connection_write_timeout.is_zero() {
            return Err(TransportError::ConfigurationError(
                "connection write timeout must be greater than zero".to_string(),
            ));
        }
        if self.ping_attempts == 0 {
            return Err(TransportError::ConfigurationError(
                "at least one readiness ping is required".to_string(),
            ));
        }
        if self.ping_interval.is_zero() {
            return Err(TransportError::ConfigurationError(
                "readiness ping interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Server-mode yamux configuration
    pub(crate) fn yamux_config(&self) -> tokio_yamux::Config {
        tokio_yamux::Config {
            enable_keepalive: true,
            keepalive_interval: self.keep_alive_interval,
            connection_write_timeout: self.connection_write_timeout,
            ..tokio_yamux::Config::default()
        }
    }
}
