use std::fmt;

use serde::Serialize;

/// Magic token of the video stream.
pub const VIDEO_MAGIC: [u8; 4] = 0xAAAA_AAAAu32.to_ne_bytes();

/// Magic token of the audio stream.
pub const AUDIO_MAGIC: [u8; 4] = 0xBBBB_BBBBu32.to_ne_bytes();

/// Largest video frame accepted (200 KiB).
pub const VIDEO_MAX_FRAME_SIZE: usize = 0x32000;

/// Largest audio frame accepted (48 KiB).
pub const AUDIO_MAX_FRAME_SIZE: usize = 0x1000 * 12;

/// H.264 sequence parameter set (Annex-B) the device only sends once per
/// capture. Replayed to the sink so a decoder can start mid-stream.
pub const VIDEO_SPS: [u8; 20] = [
    0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x01, 0x40, 0x16, 0xE8, 0x40, 0x00,
    0x00, 0x03, 0x00, 0x40, 0x00,
];

/// H.264 picture parameter set (Annex-B) paired with [`VIDEO_SPS`].
pub const VIDEO_PPS: [u8; 8] = [0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80];

/// The two elementary streams carried over the device channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn magic(self) -> [u8; 4] {
        match self {
            StreamKind::Video => VIDEO_MAGIC,
            StreamKind::Audio => AUDIO_MAGIC,
        }
    }

    pub fn max_frame_size(self) -> usize {
        match self {
            StreamKind::Video => VIDEO_MAX_FRAME_SIZE,
            StreamKind::Audio => AUDIO_MAX_FRAME_SIZE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
