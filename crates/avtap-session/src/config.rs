use std::time::Duration;

use avtap_frame::FrameConfig;
use bytes::Bytes;

use crate::desync::DesyncThresholds;
use crate::kind::{StreamKind, VIDEO_PPS, VIDEO_SPS};

/// What to do with a payload that arrived shorter than its header declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TruncatedPolicy {
    /// Deliver the bytes that did arrive.
    #[default]
    Forward,
    /// Treat it like an invalid frame: back off, flush, drop it.
    Discard,
}

/// Backoff periods used by the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// Pause after a short handshake write, before flushing and retrying.
    pub handshake_backoff: Duration,
    /// Pause after discarding a frame, before flushing.
    pub discard_backoff: Duration,
    /// Pause before flushing when recovering from a stall.
    pub desync_pause: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            handshake_backoff: Duration::from_secs(1),
            discard_backoff: Duration::from_millis(500),
            desync_pause: Duration::from_millis(600),
        }
    }
}

/// Everything a session needs to know about its stream.
///
/// Built once and handed to [`Session::new`](crate::Session::new); the
/// session never changes it.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub kind: StreamKind,
    /// Magic token, size limit, read timeouts, oversize handling.
    pub frame: FrameConfig,
    /// Blocks forwarded once, in order, before the first frame.
    pub priming: Vec<Bytes>,
    pub truncated_policy: TruncatedPolicy,
    pub timings: SessionTimings,
    pub desync: DesyncThresholds,
}

impl SessionConfig {
    /// Video stream: `0xAAAAAAAA` magic, 200 KiB frames, SPS/PPS priming.
    pub fn video() -> Self {
        Self {
            priming: vec![
                Bytes::from_static(&VIDEO_SPS),
                Bytes::from_static(&VIDEO_PPS),
            ],
            ..Self::bare(StreamKind::Video)
        }
    }

    /// Audio stream: `0xBBBBBBBB` magic, 48 KiB frames, no priming.
    pub fn audio() -> Self {
        Self::bare(StreamKind::Audio)
    }

    pub fn for_kind(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Video => Self::video(),
            StreamKind::Audio => Self::audio(),
        }
    }

    fn bare(kind: StreamKind) -> Self {
        Self {
            kind,
            frame: FrameConfig::new(kind.magic(), kind.max_frame_size()),
            priming: Vec::new(),
            truncated_policy: TruncatedPolicy::default(),
            timings: SessionTimings::default(),
            desync: DesyncThresholds::default(),
        }
    }

    pub fn magic(&self) -> [u8; 4] {
        self.frame.magic
    }

    pub fn max_frame_size(&self) -> usize {
        self.frame.max_frame_size
    }
}
