use std::time::Duration;

use crate::kind::StreamKind;

/// Errors that end a session worker.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Frame-level failure, usually the channel going away mid-read.
    #[error("frame error: {0}")]
    Frame(#[from] avtap_frame::FrameError),

    /// Transport failure during handshake or flush.
    #[error("transport error: {0}")]
    Transport(#[from] avtap_transport::TransportError),

    /// The output target rejected a payload.
    #[error("output target error: {0}")]
    Sink(#[source] std::io::Error),

    /// The worker thread could not be started.
    #[error("failed to spawn {kind} session worker: {source}")]
    Spawn {
        kind: StreamKind,
        source: std::io::Error,
    },

    /// The worker thread panicked.
    #[error("{0} session worker panicked")]
    Panicked(StreamKind),

    /// The worker did not stop within the allowed time.
    #[error("{kind} session did not stop within {timeout:?}")]
    StopTimeout { kind: StreamKind, timeout: Duration },
}

pub type Result<T> = std::result::Result<T, SessionError>;
