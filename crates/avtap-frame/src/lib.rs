//! Magic-delimited, length-prefixed framing over a device channel.
//!
//! Every frame on the wire is:
//! - a 4-byte magic token identifying the stream
//! - a 4-byte little-endian payload length
//! - the payload itself
//!
//! [`FrameReader`] scans for the magic token, validates the length and fills
//! a buffer rented from a shared [`BufferPool`]. Scanning is cooperative with
//! a [`CancelToken`] so a reader parked on an idle device can be stopped.

pub mod cancel;
pub mod codec;
pub mod error;
pub mod pool;
pub mod reader;

pub use cancel::CancelToken;
pub use codec::{
    encode_frame, parse_length, FrameConfig, OversizePolicy, DEFAULT_PAYLOAD_TIMEOUT,
    DEFAULT_SCAN_TIMEOUT, HEADER_SIZE, LENGTH_SIZE, TOKEN_SIZE,
};
pub use error::{FrameError, Result};
pub use pool::{BufferPool, PoolConfig, PoolStats};
pub use reader::{Frame, FrameReader, ReadOutcome};
