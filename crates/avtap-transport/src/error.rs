use std::path::PathBuf;

/// Errors that can occur on a device channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the device bridge.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An I/O error occurred on the device channel.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The device side closed the channel.
    #[error("device channel closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
