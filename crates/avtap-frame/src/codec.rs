use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Magic token size in bytes.
pub const TOKEN_SIZE: usize = 4;

/// Length prefix size in bytes.
pub const LENGTH_SIZE: usize = 4;

/// Frame header: magic (4) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = TOKEN_SIZE + LENGTH_SIZE;

/// Timeout used while hunting for the magic token.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_millis(100);

/// Timeout used while reading a declared payload.
pub const DEFAULT_PAYLOAD_TIMEOUT: Duration = Duration::from_millis(1000);

/// What to do with the payload of a frame whose length exceeds the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OversizePolicy {
    /// Leave the declared payload on the channel. The next scan may start
    /// mid-payload and has to find its way back to a magic token.
    #[default]
    Leave,
    /// Read and throw away the declared payload so the channel stays aligned.
    Drain,
}

/// Per-stream framing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Token that starts every frame of this stream.
    pub magic: [u8; TOKEN_SIZE],
    /// Largest payload accepted, in bytes.
    pub max_frame_size: usize,
    /// Transport timeout while scanning for the magic token.
    pub scan_timeout: Duration,
    /// Transport timeout while reading a payload.
    pub payload_timeout: Duration,
    /// Handling of frames longer than `max_frame_size`.
    pub oversize_policy: OversizePolicy,
}

impl FrameConfig {
    /// Configuration with default timeouts and policy.
    pub fn new(magic: [u8; TOKEN_SIZE], max_frame_size: usize) -> Self {
        Self {
            magic,
            max_frame_size,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            payload_timeout: DEFAULT_PAYLOAD_TIMEOUT,
            oversize_policy: OversizePolicy::default(),
        }
    }

    /// Whether a declared length is a deliverable, non-empty frame.
    pub fn accepts(&self, length: usize) -> bool {
        length > 0 && length <= self.max_frame_size
    }
}

/// Encode a frame into the wire format.
///
/// ```text
/// ┌──────────────┬───────────┬─────────────────┐
/// │ Magic (4B)   │ Length    │ Payload         │
/// │ per stream   │ (4B LE)   │ (Length bytes)  │
/// └──────────────┴───────────┴─────────────────┘
/// ```
pub fn encode_frame(magic: [u8; TOKEN_SIZE], payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&magic);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Interpret a length prefix.
pub fn parse_length(bytes: [u8; LENGTH_SIZE]) -> u32 {
    bytes.as_slice().get_u32_le()
}
