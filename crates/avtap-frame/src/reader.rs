use std::sync::Arc;

use avtap_transport::DeviceTransport;
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::codec::{parse_length, FrameConfig, OversizePolicy, TOKEN_SIZE};
use crate::error::Result;
use crate::pool::BufferPool;

const DRAIN_CHUNK_SIZE: usize = 16 * 1024;

/// One payload pulled off the channel.
///
/// The buffer comes from the reader's [`BufferPool`]; hand it back with
/// [`into_buffer`](Frame::into_buffer) once the payload has been delivered.
#[derive(Debug)]
pub struct Frame {
    buf: Vec<u8>,
    declared: usize,
}

impl Frame {
    /// Payload bytes actually received.
    pub fn payload(&self) -> &[u8] {
        &self.buf
    }

    /// Number of payload bytes actually received.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Length announced by the frame header.
    pub fn declared_len(&self) -> usize {
        self.declared
    }

    /// Whether the channel delivered fewer bytes than the header announced.
    pub fn is_truncated(&self) -> bool {
        self.buf.len() < self.declared
    }

    /// Release the payload buffer.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buf
    }
}

/// Result of one [`FrameReader::read_frame`] call.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A non-empty payload, possibly truncated.
    Frame(Frame),
    /// A frame that declared a zero length.
    Empty,
    /// A frame whose declared length exceeds the configured maximum.
    Oversized { declared: u32 },
    /// Cancellation was observed before a frame was found.
    Cancelled,
}

/// Reads magic-delimited frames from a device channel.
///
/// The magic scan consumes the channel in fixed 4-byte steps rather than
/// sliding one byte at a time. That matches a channel which is already frame
/// aligned, at the cost of never finding a token that straddles two steps.
pub struct FrameReader<T> {
    inner: T,
    config: FrameConfig,
    pool: Arc<BufferPool>,
    cancel: CancelToken,
}

enum Header {
    Length(u32),
    Cancelled,
}

impl<T: DeviceTransport> FrameReader<T> {
    pub fn new(inner: T, config: FrameConfig, pool: Arc<BufferPool>, cancel: CancelToken) -> Self {
        Self {
            inner,
            config,
            pool,
            cancel,
        }
    }

    /// Read the next frame (blocking).
    ///
    /// Returns an error only when the channel itself fails.
    pub fn read_frame(&mut self) -> Result<ReadOutcome> {
        if self.cancel.is_cancelled() {
            return Ok(ReadOutcome::Cancelled);
        }

        self.inner.set_timeout(self.config.scan_timeout)?;
        let declared = match self.read_header()? {
            Header::Length(len) => len,
            Header::Cancelled => return Ok(ReadOutcome::Cancelled),
        };

        let size = declared as usize;
        if size > self.config.max_frame_size {
            if self.config.oversize_policy == OversizePolicy::Drain {
                self.inner.set_timeout(self.config.payload_timeout)?;
                let drained = self.drain(size)?;
                debug!(declared = size, drained, "drained oversized payload");
            }
            return Ok(ReadOutcome::Oversized { declared });
        }

        if size == 0 {
            return Ok(ReadOutcome::Empty);
        }

        self.inner.set_timeout(self.config.payload_timeout)?;
        let frame = self.read_payload(size)?;
        Ok(ReadOutcome::Frame(frame))
    }

    fn read_header(&mut self) -> Result<Header> {
        loop {
            let Some(token) = self.read_word()? else {
                if self.cancel.is_cancelled() {
                    return Ok(Header::Cancelled);
                }
                continue;
            };

            if token != self.config.magic {
                trace!(?token, "skipping non-magic word");
                if self.cancel.is_cancelled() {
                    return Ok(Header::Cancelled);
                }
                continue;
            }

            match self.read_word()? {
                Some(len) => return Ok(Header::Length(parse_length(len))),
                None => {
                    debug!("length prefix cut short; rescanning");
                    if self.cancel.is_cancelled() {
                        return Ok(Header::Cancelled);
                    }
                }
            }
        }
    }

    /// Read one 4-byte word, or `None` on a short read.
    fn read_word(&mut self) -> Result<Option<[u8; TOKEN_SIZE]>> {
        let mut word = [0u8; TOKEN_SIZE];
        let n = self.inner.read(&mut word)?;
        Ok((n == word.len()).then_some(word))
    }

    fn read_payload(&mut self, size: usize) -> Result<Frame> {
        let mut buf = self.pool.rent(size);

        // One bulk read. A short count means the payload timeout ran out;
        // reading again could swallow the header of the next frame.
        let filled = self.inner.read(&mut buf)?;

        if filled < size {
            warn!(declared = size, received = filled, "payload shorter than declared length");
            buf.truncate(filled);
        }

        Ok(Frame {
            buf,
            declared: size,
        })
    }

    fn drain(&mut self, size: usize) -> Result<usize> {
        let mut scratch = self.pool.rent(size.min(DRAIN_CHUNK_SIZE));
        let mut drained = 0usize;

        while drained < size {
            let want = (size - drained).min(scratch.len());
            let n = self.inner.read(&mut scratch[..want])?;
            drained += n;
            if n < want {
                break;
            }
        }

        self.pool.give_back(scratch);
        Ok(drained)
    }

    /// Borrow the underlying channel.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying channel.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner channel.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Pool payload buffers are rented from.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}
