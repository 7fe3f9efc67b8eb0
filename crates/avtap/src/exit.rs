use std::fmt;
use std::io;

use avtap::frame::FrameError;
use avtap::session::SessionError;
use avtap::transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } => io_error(context, source),
        TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Transport(err) | SessionError::Frame(FrameError::Transport(err)) => {
            transport_error(context, err)
        }
        SessionError::Frame(err @ FrameError::PayloadTooLarge { .. }) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        SessionError::Sink(source) => io_error(context, source),
        SessionError::StopTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use avtap::session::StreamKind;

    use super::*;

    #[test]
    fn closed_channel_maps_to_transport_code() {
        let err = session_error(
            "video",
            SessionError::Frame(FrameError::Transport(TransportError::Closed)),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("video: "));
    }

    #[test]
    fn stop_timeout_maps_to_timeout_code() {
        let err = session_error(
            "audio",
            SessionError::StopTimeout {
                kind: StreamKind::Audio,
                timeout: Duration::from_secs(3),
            },
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn sink_permission_error_maps_to_permission_code() {
        let err = session_error(
            "video",
            SessionError::Sink(io::Error::from(io::ErrorKind::PermissionDenied)),
        );
        assert_eq!(err.code, PERMISSION_DENIED);
    }

    #[test]
    fn missing_socket_maps_to_transport_code() {
        let err = transport_error(
            "connect",
            TransportError::Connect {
                path: "/nope".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}
