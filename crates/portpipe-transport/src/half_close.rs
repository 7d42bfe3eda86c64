//! Half-close capability
//!
//! After one copy direction reaches EOF the forwarder shuts down the write
//! side of the destination so the far end sees EOF while the other direction
//! keeps flowing. Only types that implement this capability with `true` get
//! that shutdown; everything else is left open until the forwarder exits.

use tokio::io::DuplexStream;
use tokio::net::TcpStream;

pub trait HalfClose {
    /// Whether shutting down the write side leaves the read side usable
    fn supports_half_close(&self) -> bool {
        false
    }
}

impl HalfClose for TcpStream {
    fn supports_half_close(&self) -> bool {
        true
    }
}

#[cfg(unix)]
impl HalfClose for tokio::net::UnixStream {
    fn supports_half_close(&self) -> bool {
        true
    }
}

impl HalfClose for DuplexStream {
    fn supports_half_close(&self) -> bool {
        true
    }
}
