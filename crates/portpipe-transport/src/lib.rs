//! Transport layer for the portpipe tunnel endpoint
//!
//! The whole tunnel rides on one duplex byte pipe (the process's stdin and
//! stdout). This crate turns that pipe into a multiplexed session:
//!
//! ```text
//!   peer ──▶ stdin ─┐                         ┌─▶ inbound streams (accept)
//!                   ├─ DuplexPipe ─ yamux ────┤
//!   peer ◀── stdout ┘                         └─◀ outbound streams (open)
//! ```
//!
//! The rest of the system only sees the [`MuxSession`] and [`MuxStream`]
//! traits, so the forwarding logic does not depend on the multiplexer.

pub mod config;
pub mod error;
pub mod half_close;
pub mod manager;
pub mod pipe;
pub mod readiness;
pub mod session;

pub use config::SessionConfig;
pub use error::{SessionError, TransportError, TransportResult};
pub use half_close::HalfClose;
pub use manager::{create_session, wait_until_ready};
pub use pipe::DuplexPipe;
pub use readiness::ReadinessCheck;
pub use session::{MuxSession, MuxStream, YamuxSession, YamuxStream};
