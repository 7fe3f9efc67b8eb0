use std::time::Duration;

use crate::error::Result;

/// Per-call timeout applied until a caller switches it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// A byte-oriented, half-duplex device channel.
///
/// Reads and writes are bounded by [`timeout`](DeviceTransport::timeout).
/// Running out of time is not an error: the call simply returns fewer bytes
/// than requested, possibly zero. Errors are reserved for faults the caller
/// cannot retry through, such as the device going away.
pub trait DeviceTransport: Send {
    /// Read up to `buf.len()` bytes, waiting at most one timeout period.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf`, returning how many bytes the device accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Discard any buffered or in-flight channel state.
    fn flush(&mut self) -> Result<()>;

    /// Change the timeout used by subsequent reads and writes.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// The timeout currently in effect.
    fn timeout(&self) -> Duration;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str {
        "device"
    }
}

impl<T: DeviceTransport + ?Sized> DeviceTransport for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}
