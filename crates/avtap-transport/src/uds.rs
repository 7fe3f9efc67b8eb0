use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::{DeviceTransport, DEFAULT_TIMEOUT};

const FLUSH_CHUNK_SIZE: usize = 4 * 1024;

/// Device channel exposed by a bridge process on a Unix domain socket.
///
/// Reads follow bulk-transfer semantics: a call keeps collecting bytes until
/// the buffer is full or the timeout elapses, so a short count always means
/// the device had nothing more to give within the window.
pub struct UnixDeviceTransport {
    stream: UnixStream,
    path: Option<PathBuf>,
    timeout: Duration,
}

impl UnixDeviceTransport {
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Connect to a device bridge listening at `path` (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path: path.to_path_buf(),
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to device bridge");

        let mut transport = Self::from_stream(stream)?;
        transport.path = Some(path.to_path_buf());
        Ok(transport)
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: UnixStream) -> Result<Self> {
        let mut transport = Self {
            stream,
            path: None,
            timeout: DEFAULT_TIMEOUT,
        };
        transport.set_timeout(DEFAULT_TIMEOUT)?;
        Ok(transport)
    }

    /// The bridge path this transport connected to, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Open an independent handle to the same channel.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            stream: self.stream.try_clone()?,
            path: self.path.clone(),
            timeout: self.timeout,
        })
    }
}

fn remaining(deadline: Instant) -> Option<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    (!left.is_zero()).then_some(left)
}

impl DeviceTransport for UnixDeviceTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let deadline = Instant::now() + self.timeout;
        let mut filled = 0usize;

        while filled < buf.len() {
            let Some(left) = remaining(deadline) else {
                break;
            };
            self.stream.set_read_timeout(Some(left))?;

            match self.stream.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Err(TransportError::Closed),
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    break
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        Ok(filled)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let deadline = Instant::now() + self.timeout;
        let mut written = 0usize;

        while written < buf.len() {
            let Some(left) = remaining(deadline) else {
                break;
            };
            self.stream.set_write_timeout(Some(left))?;

            match self.stream.write(&buf[written..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    break
                }
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    return Err(TransportError::Closed)
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        Ok(written)
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;

        // Throw away whatever the bridge has already queued for us.
        self.stream.set_nonblocking(true)?;
        let mut scratch = [0u8; FLUSH_CHUNK_SIZE];
        let mut discarded = 0usize;
        let outcome = loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(n) => discarded += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(err) => break Err(TransportError::Io(err)),
            }
        };
        self.stream.set_nonblocking(false)?;

        trace!(discarded, "flushed device channel");
        outcome
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        // A zero socket timeout is rejected by the OS.
        let effective = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(effective))?;
        self.stream.set_write_timeout(Some(effective))?;
        self.timeout = effective;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn transport_name(&self) -> &'static str {
        "unix-device-bridge"
    }
}

impl std::fmt::Debug for UnixDeviceTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixDeviceTransport")
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (UnixDeviceTransport, UnixStream) {
        let (left, right) = UnixStream::pair().unwrap();
        (UnixDeviceTransport::from_stream(left).unwrap(), right)
    }

    #[test]
    fn read_collects_until_buffer_full() {
        let (mut transport, mut device) = pair();
        transport.set_timeout(Duration::from_millis(500)).unwrap();

        let writer = std::thread::spawn(move || {
            device.write_all(&[1, 2]).unwrap();
            std::thread::sleep(Duration::from_millis(20));
            device.write_all(&[3, 4]).unwrap();
            device
        });

        let mut buf = [0u8; 4];
        let n = transport.read(&mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        let _device = writer.join().unwrap();
    }

    #[test]
    fn read_timeout_is_a_short_read() {
        let (mut transport, _device) = pair();
        transport.set_timeout(Duration::from_millis(20)).unwrap();

        let start = Instant::now();
        let mut buf = [0u8; 4];
        let n = transport.read(&mut buf).unwrap();
        assert_eq!(n, 0);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn read_partial_when_device_goes_quiet() {
        let (mut transport, mut device) = pair();
        transport.set_timeout(Duration::from_millis(30)).unwrap();
        device.write_all(&[9, 9]).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(transport.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[9, 9]);
    }

    #[test]
    fn read_reports_closed_device() {
        let (mut transport, device) = pair();
        drop(device);

        let mut buf = [0u8; 4];
        let err = transport.read(&mut buf).unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn write_reaches_device() {
        let (mut transport, mut device) = pair();
        assert_eq!(transport.write(&[0xAA; 4]).unwrap(), 4);

        let mut buf = [0u8; 4];
        device.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xAA; 4]);
    }

    #[test]
    fn flush_discards_queued_bytes() {
        let (mut transport, mut device) = pair();
        device.write_all(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        transport.flush().unwrap();

        transport.set_timeout(Duration::from_millis(20)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn set_timeout_clamps_zero() {
        let (mut transport, _device) = pair();
        transport.set_timeout(Duration::ZERO).unwrap();
        assert_eq!(transport.timeout(), Duration::from_millis(1));
    }

    #[test]
    fn connect_rejects_long_path() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixDeviceTransport::connect(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn connect_to_missing_bridge_fails() {
        let path = std::env::temp_dir().join(format!("avtap-missing-{}.sock", std::process::id()));
        let result = UnixDeviceTransport::connect(&path);
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn connect_to_listening_bridge() {
        let dir = std::env::temp_dir().join(format!("avtap-uds-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sock_path = dir.join("bridge.sock");
        let _ = std::fs::remove_file(&sock_path);
        let listener = std::os::unix::net::UnixListener::bind(&sock_path).unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"ping").unwrap();
            stream
        });

        let mut transport = UnixDeviceTransport::connect(&sock_path).unwrap();
        assert_eq!(transport.path(), Some(sock_path.as_path()));
        transport.set_timeout(Duration::from_millis(500)).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(transport.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"ping");

        let _stream = server.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
