//! Per-stream decode sessions.
//!
//! A [`Session`] owns one device channel and one [`OutputTarget`]. Once
//! spawned it runs on its own thread: handshake, read a frame, forward or
//! discard it, watch the byte rate for stalls, repeat until cancelled. Video
//! and audio each get their own session and never share mutable state.

pub mod config;
pub mod desync;
pub mod error;
pub mod kind;
pub mod session;
pub mod target;

pub use config::{SessionConfig, SessionTimings, TruncatedPolicy};
pub use desync::{DesyncDetector, DesyncEvent, DesyncThresholds};
pub use error::{Result, SessionError};
pub use kind::{
    StreamKind, AUDIO_MAGIC, AUDIO_MAX_FRAME_SIZE, VIDEO_MAGIC, VIDEO_MAX_FRAME_SIZE,
    VIDEO_PPS, VIDEO_SPS,
};
pub use session::{PrimingHook, Session, SessionHandle, SessionReport, DEFAULT_STOP_TIMEOUT};
pub use target::{OutputTarget, WriterTarget};
