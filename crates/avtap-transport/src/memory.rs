use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};

use crate::error::{Result, TransportError};
use crate::traits::{DeviceTransport, DEFAULT_TIMEOUT};

/// In-memory device channel.
///
/// Clones share the same channel, so a test (or a replay driver) can keep a
/// handle for feeding bytes and inspecting writes while a session owns
/// another. Reads follow the same bulk semantics as the socket bridge: they
/// block for up to the timeout until the buffer can be filled, so a short
/// count means nothing more arrived in time. An empty
/// channel that has not been [`close`](MemoryTransport::close)d behaves like
/// an idle device.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    ready: Condvar,
}

struct State {
    inbound: BytesMut,
    written: Vec<u8>,
    write_limits: VecDeque<usize>,
    flushes: usize,
    discard_on_flush: bool,
    closed: bool,
    timeout: Duration,
}

impl Default for State {
    fn default() -> Self {
        Self {
            inbound: BytesMut::new(),
            written: Vec::new(),
            write_limits: VecDeque::new(),
            flushes: 0,
            discard_on_flush: false,
            closed: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl MemoryTransport {
    /// Create an empty, open channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a channel preloaded with `bytes`.
    pub fn with_bytes(bytes: &[u8]) -> Self {
        let transport = Self::new();
        transport.feed(bytes);
        transport
    }

    /// Make `flush` drop every queued inbound byte, like a device reset.
    pub fn discard_on_flush(self, enabled: bool) -> Self {
        self.lock().discard_on_flush = enabled;
        self
    }

    /// Queue bytes for the reading side.
    pub fn feed(&self, bytes: &[u8]) {
        self.lock().inbound.extend_from_slice(bytes);
        self.shared.ready.notify_all();
    }

    /// Mark the channel as closed once queued bytes are consumed.
    pub fn close(&self) {
        self.lock().closed = true;
        self.shared.ready.notify_all();
    }

    /// Cap the size of the next writes, one entry per write call.
    pub fn limit_next_writes(&self, limits: impl IntoIterator<Item = usize>) {
        self.lock().write_limits.extend(limits);
    }

    /// Everything written to the channel so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Number of `flush` calls observed.
    pub fn flush_count(&self) -> usize {
        self.lock().flushes
    }

    /// Inbound bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.lock().inbound.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceTransport for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.lock();
        let deadline = Instant::now() + state.timeout;

        // Collect until the buffer fills or the deadline passes. A closed
        // channel hands back whatever is left.
        while state.inbound.len() < buf.len() && !state.closed {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            state = self
                .shared
                .ready
                .wait_timeout(state, left)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        if state.inbound.is_empty() {
            return if state.closed {
                Err(TransportError::Closed)
            } else {
                Ok(0)
            };
        }

        let n = buf.len().min(state.inbound.len());
        buf[..n].copy_from_slice(&state.inbound[..n]);
        state.inbound.advance(n);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }

        let n = match state.write_limits.pop_front() {
            Some(limit) => limit.min(buf.len()),
            None => buf.len(),
        };
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.flushes += 1;
        if state.discard_on_flush {
            state.inbound.clear();
        }
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.lock().timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.lock().timeout
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryTransport")
            .field("remaining", &state.inbound.len())
            .field("written", &state.written.len())
            .field("closed", &state.closed)
            .finish()
    }
}
