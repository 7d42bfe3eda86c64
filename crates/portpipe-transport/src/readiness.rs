//! Readiness ping on the raw pipe
//!
//! tokio-yamux answers a peer's pings but cannot send one on request. Every
//! yamux stack replies to a Ping frame with the SYN flag by echoing its id
//! with the ACK flag, without involving the application. So the check
//! writes that frame on the pipe before the multiplexer takes it over. The
//! inbound side tracks frame boundaries and removes the answers. Everything
//! else the peer sends passes through untouched.
//!
//! Frame header layout (all integers big-endian):
//!
//! ```text
//! | version: u8 | type: u8 | flags: u16 | stream id: u32 | length: u32 |
//! ```
//!
//! Only Data frames carry a payload (`length` bytes). For Ping frames
//! `length` is the opaque ping id.

use crate::error::TransportResult;
use async_trait::async_trait;
use std::time::Duration;

pub const HEADER_SIZE: usize = 12;

const PROTOCOL_VERSION: u8 = 0;
const TYPE_DATA: u8 = 0x0;
const TYPE_PING: u8 = 0x2;
const FLAG_SYN: u16 = 0x1;
const FLAG_ACK: u16 = 0x2;
const SESSION_STREAM_ID: u32 = 0;

/// Readiness ping ids sit far above the ids of the session's own keepalive pings,
/// which count up from 1 every keepalive interval
pub const READINESS_ID_BASE: u32 = 0x7070_0000;

/// Something that can check the peer is attached and answering
#[async_trait]
pub trait ReadinessCheck: Send {
    /// Send one ping and wait up to `wait` for its answer
    async fn check(&mut self, wait: Duration) -> TransportResult<()>;
}

/// Ping request frame carrying `id`
pub fn ping_request(id: u32) -> [u8; HEADER_SIZE] {
    encode_header(TYPE_PING, FLAG_SYN, SESSION_STREAM_ID, id)
}

/// Ping answer frame echoing `id`
pub fn ping_answer(id: u32) -> [u8; HEADER_SIZE] {
    encode_header(TYPE_PING, FLAG_ACK, SESSION_STREAM_ID, id)
}

/// Data frame header for a payload of `len` bytes on `stream_id`
pub fn data_header(stream_id: u32, len: u32) -> [u8; HEADER_SIZE] {
    encode_header(TYPE_DATA, 0, stream_id, len)
}

fn encode_header(ty: u8, flags: u16, stream_id: u32, length: u32) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0] = PROTOCOL_VERSION;
    header[1] = ty;
    header[2..4].copy_from_slice(&flags.to_be_bytes());
    header[4..8].copy_from_slice(&stream_id.to_be_bytes());
    header[8..12].copy_from_slice(&length.to_be_bytes());
    header
}

/// Follows frame boundaries in the inbound byte stream and drops answers to
/// readiness pings this side has issued
#[derive(Debug, Default)]
pub struct PongFilter {
    header: [u8; HEADER_SIZE],
    header_len: usize,
    payload_left: usize,
    issued: u32,
    answered: u32,
}

impl PongFilter {
    /// Allocate the id for the next readiness ping
    pub fn next_id(&mut self) -> u32 {
        self.issued += 1;
        READINESS_ID_BASE + self.issued
    }

    /// Number of readiness answers seen so far
    pub fn answered(&self) -> u32 {
        self.answered
    }

    /// Append `input` to `out`, leaving out readiness answers
    ///
    /// A header split across calls is held back until it is complete.
    pub fn filter(&mut self, mut input: &[u8], out: &mut Vec<u8>) {
        while !input.is_empty() {
            if self.payload_left > 0 {
                let n = self.payload_left.min(input.len());
                out.extend_from_slice(&input[..n]);
                self.payload_left -= n;
                input = &input[n..];
                continue;
            }

            let n = (HEADER_SIZE - self.header_len).min(input.len());
            self.header[self.header_len..self.header_len + n].copy_from_slice(&input[..n]);
            self.header_len += n;
            input = &input[n..];

            if self.header_len < HEADER_SIZE {
                break;
            }
            self.header_len = 0;

            if self.is_readiness_answer() {
                self.answered += 1;
                continue;
            }

            out.extend_from_slice(&self.header);
            if self.header[1] == TYPE_DATA {
                self.payload_left = self.length() as usize;
            }
        }
    }

    /// Release a header left incomplete when the pipe hit EOF
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header[..self.header_len]);
        self.header_len = 0;
    }

    fn length(&self) -> u32 {
        u32::from_be_bytes([
            self.header[8],
            self.header[9],
            self.header[10],
            self.header[11],
        ])
    }

    fn is_readiness_answer(&self) -> bool {
        let flags = u16::from_be_bytes([self.header[2], self.header[3]]);
        let stream_id = u32::from_be_bytes([
            self.header[4],
            self.header[5],
            self.header[6],
            self.header[7],
        ]);
        let id = self.length();

        self.header[0] == PROTOCOL_VERSION
            && self.header[1] == TYPE_PING
            && flags & FLAG_ACK != 0
            && stream_id == SESSION_STREAM_ID
            && id > READINESS_ID_BASE
            && id <= READINESS_ID_BASE + self.issued
    }
}
