use std::io::{self, Write};

/// Downstream consumer of decoded payloads.
///
/// `send_data` receives one complete payload per call and should return
/// quickly; the session does not interrupt it. `dispose` is called exactly
/// once, when the session worker exits.
pub trait OutputTarget: Send {
    fn send_data(&mut self, data: &[u8]) -> io::Result<()>;

    fn dispose(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<O: OutputTarget + ?Sized> OutputTarget for Box<O> {
    fn send_data(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).send_data(data)
    }

    fn dispose(&mut self) -> io::Result<()> {
        (**self).dispose()
    }
}

/// Appends every payload to a writer; flushes it on dispose.
#[derive(Debug)]
pub struct WriterTarget<W> {
    inner: W,
}

impl<W: Write + Send> WriterTarget<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> OutputTarget for WriterTarget<W> {
    fn send_data(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data)
    }

    fn dispose(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
