//! Portpipe Protocol Definitions
//!
//! Wire types shared by both ends of the tunnel. Every inbound stream starts
//! with a JSON [`TargetMessage`] naming the local endpoint to dial, answered
//! by the two-byte [`ACK`] once the dial succeeded. Every outbound stream
//! carries exactly one [`PortNotification`].

pub mod handshake;
pub mod messages;

pub use handshake::{Handshake, HandshakeDecoder};
pub use messages::*;

/// Acknowledgement written on an inbound stream once the target is dialed.
///
/// The peer must not send payload bytes before it has read this.
pub const ACK: &[u8; 2] = b"OK";

/// Upper bound for the handshake message (64KB)
pub const MAX_HANDSHAKE_SIZE: usize = 64 * 1024;
