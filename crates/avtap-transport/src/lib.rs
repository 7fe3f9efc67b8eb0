//! Half-duplex device channel abstraction.
//!
//! The stream decoders only need four things from a device channel: a
//! timeout-bounded read, a possibly-partial write, a flush that throws away
//! in-flight state, and a per-call timeout that can be switched between
//! operations. [`DeviceTransport`] captures exactly that.
//!
//! Two implementations ship here:
//! - [`UnixDeviceTransport`] talks to a device bridge over a Unix domain socket
//! - [`MemoryTransport`] replays bytes from memory (tests, capture replay)

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::MemoryTransport;
pub use traits::{DeviceTransport, DEFAULT_TIMEOUT};

#[cfg(unix)]
pub use uds::UnixDeviceTransport;
