use avtap_transport::TransportError;

/// Errors that can occur while reading or encoding frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The device channel failed underneath the reader.
    #[error("frame transport error: {0}")]
    Transport(#[from] TransportError),

    /// The payload cannot be described by a 32-bit length prefix.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
