use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use avtap_frame::{BufferPool, CancelToken, FrameReader, ReadOutcome};
use avtap_transport::DeviceTransport;
use serde::Serialize;
use tracing::{debug, error, info, info_span, trace, warn};

use crate::config::{SessionConfig, TruncatedPolicy};
use crate::desync::{DesyncDetector, DesyncEvent};
use crate::error::{Result, SessionError};
use crate::kind::StreamKind;
use crate::target::OutputTarget;

/// How long dropping a [`SessionHandle`] waits for its worker.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(3);

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One-time action run against the output target before the first frame.
pub type PrimingHook = Box<dyn FnOnce(&mut dyn OutputTarget) -> io::Result<()> + Send>;

/// Lifetime totals of one session worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub kind: StreamKind,
    /// Frames forwarded, empty frames included.
    pub frames: u64,
    pub empty_frames: u64,
    /// Payload bytes forwarded.
    pub bytes: u64,
    pub discarded: u64,
    /// Frames whose payload arrived short, forwarded or not.
    pub truncated: u64,
    pub handshake_retries: u64,
    pub stalls: u64,
    pub recoveries: u64,
}

impl SessionReport {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            frames: 0,
            empty_frames: 0,
            bytes: 0,
            discarded: 0,
            truncated: 0,
            handshake_retries: 0,
            stalls: 0,
            recoveries: 0,
        }
    }
}

/// A decode session for one stream kind.
///
/// Construct with [`Session::new`], adjust with the `with_*` methods, then
/// either [`run`](Session::run) it on the current thread or
/// [`spawn`](Session::spawn) a dedicated worker.
pub struct Session<T, O> {
    config: SessionConfig,
    transport: T,
    target: O,
    pool: Arc<BufferPool>,
    cancel: CancelToken,
    priming: Option<PrimingHook>,
}

impl<T: DeviceTransport, O: OutputTarget> Session<T, O> {
    pub fn new(config: SessionConfig, transport: T, target: O) -> Self {
        Self {
            config,
            transport,
            target,
            pool: Arc::new(BufferPool::new()),
            cancel: CancelToken::new(),
            priming: None,
        }
    }

    /// Rent payload buffers from a shared pool.
    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Observe an externally owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the default priming (forwarding `config.priming` in order).
    pub fn with_priming<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut dyn OutputTarget) -> io::Result<()> + Send + 'static,
    {
        self.priming = Some(Box::new(hook));
        self
    }

    pub fn kind(&self) -> StreamKind {
        self.config.kind
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the session loop on the calling thread until cancelled or faulted.
    ///
    /// The output target is disposed exactly once before this returns.
    pub fn run(self) -> Result<SessionReport> {
        let Session {
            config,
            transport,
            mut target,
            pool,
            cancel,
            priming,
        } = self;

        let span = info_span!("session", kind = %config.kind);
        let _enter = span.enter();
        info!(
            transport = transport.transport_name(),
            max_frame_size = config.max_frame_size(),
            "session started"
        );

        let mut engine = Engine {
            reader: FrameReader::new(transport, config.frame.clone(), pool, cancel.clone()),
            desync: DesyncDetector::new(config.desync, Instant::now()),
            report: SessionReport::new(config.kind),
            in_flight: None,
            cancel,
            config: &config,
        };

        let outcome = engine
            .prime(&mut target, priming)
            .and_then(|()| engine.run_loop(&mut target));
        engine.release_in_flight();
        let report = engine.report;

        if let Err(err) = target.dispose() {
            warn!(error = %err, "output target dispose failed");
        }

        match outcome {
            Ok(()) => {
                info!(
                    frames = report.frames,
                    bytes = report.bytes,
                    discarded = report.discarded,
                    "session stopped"
                );
                Ok(report)
            }
            Err(err) => {
                error!(error = %err, frames = report.frames, "session terminated by fault");
                Err(err)
            }
        }
    }
}

impl<T, O> Session<T, O>
where
    T: DeviceTransport + 'static,
    O: OutputTarget + 'static,
{
    /// Start the session on a dedicated, named worker thread.
    pub fn spawn(self) -> Result<SessionHandle> {
        let kind = self.config.kind;
        let cancel = self.cancel.clone();

        let worker = thread::Builder::new()
            .name(format!("avtap-{kind}"))
            .spawn(move || self.run())
            .map_err(|source| SessionError::Spawn { kind, source })?;

        Ok(SessionHandle {
            kind,
            cancel,
            worker: Some(worker),
        })
    }
}

struct Engine<'a, T> {
    config: &'a SessionConfig,
    reader: FrameReader<T>,
    desync: DesyncDetector,
    report: SessionReport,
    in_flight: Option<Vec<u8>>,
    cancel: CancelToken,
}

impl<T: DeviceTransport> Engine<'_, T> {
    fn prime<O: OutputTarget>(&mut self, target: &mut O, hook: Option<PrimingHook>) -> Result<()> {
        if let Some(hook) = hook {
            debug!("running priming hook");
            return hook(target).map_err(SessionError::Sink);
        }

        if self.config.priming.is_empty() {
            return Ok(());
        }

        info!(blocks = self.config.priming.len(), "emitting priming payloads");
        for block in &self.config.priming {
            target.send_data(block).map_err(SessionError::Sink)?;
        }
        Ok(())
    }

    fn run_loop<O: OutputTarget>(&mut self, target: &mut O) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            if !self.handshake()? {
                return Ok(());
            }

            self.release_in_flight();

            match self.reader.read_frame()? {
                ReadOutcome::Cancelled => return Ok(()),
                ReadOutcome::Oversized { declared } => {
                    self.discard(declared as usize, "length exceeds maximum")?;
                }
                ReadOutcome::Empty => self.forward(target, &[])?,
                ReadOutcome::Frame(frame) => {
                    if frame.is_truncated() {
                        self.report.truncated += 1;
                        if self.config.truncated_policy == TruncatedPolicy::Discard {
                            let declared = frame.declared_len();
                            self.in_flight = Some(frame.into_buffer());
                            self.discard(declared, "payload truncated")?;
                            continue;
                        }
                    }

                    let outcome = self.forward(target, frame.payload());
                    self.in_flight = Some(frame.into_buffer());
                    outcome?;
                }
            }
        }
    }

    /// Write the magic token until the device takes all of it.
    ///
    /// Returns `false` if cancelled while backing off.
    fn handshake(&mut self) -> Result<bool> {
        let token = self.config.magic();
        loop {
            let written = self.reader.get_mut().write(&token)?;
            if written == token.len() {
                return Ok(true);
            }

            self.report.handshake_retries += 1;
            warn!(written, expected = token.len(), "short handshake write; backing off");
            if self.cancel.sleep(self.config.timings.handshake_backoff) {
                return Ok(false);
            }
            self.reader.get_mut().flush()?;
        }
    }

    fn forward<O: OutputTarget>(&mut self, target: &mut O, payload: &[u8]) -> Result<()> {
        target.send_data(payload).map_err(SessionError::Sink)?;
        trace!(size = payload.len(), "forwarded frame");

        self.report.frames += 1;
        self.report.bytes += payload.len() as u64;
        if payload.is_empty() {
            self.report.empty_frames += 1;
        }

        self.desync.record(payload.len());
        match self.desync.poll(Instant::now()) {
            Some(DesyncEvent::Stalled { rate, transfers }) => {
                self.report.stalls += 1;
                warn!(rate, transfers, "throughput collapsed; stream flagged as stalled");
            }
            Some(DesyncEvent::Recover { rate }) => {
                self.report.recoveries += 1;
                warn!(rate, "throughput recovered; pausing and flushing channel");
                if !self.cancel.sleep(self.config.timings.desync_pause) {
                    self.reader.get_mut().flush()?;
                }
            }
            None => {}
        }
        Ok(())
    }

    fn discard(&mut self, size: usize, reason: &'static str) -> Result<()> {
        self.report.discarded += 1;
        warn!(
            kind = %self.config.kind,
            size,
            max = self.config.max_frame_size(),
            reason,
            "discarding frame"
        );

        if self.cancel.sleep(self.config.timings.discard_backoff) {
            return Ok(());
        }
        self.reader.get_mut().flush()?;
        Ok(())
    }

    fn release_in_flight(&mut self) {
        if let Some(buf) = self.in_flight.take() {
            self.reader.pool().give_back(buf);
        }
    }
}

/// Owner's view of a spawned session worker.
///
/// Dropping the handle cancels the worker and waits up to
/// [`DEFAULT_STOP_TIMEOUT`] for it to exit.
#[derive(Debug)]
pub struct SessionHandle {
    kind: StreamKind,
    cancel: CancelToken,
    worker: Option<JoinHandle<Result<SessionReport>>>,
}

impl SessionHandle {
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Ask the worker to stop; returns immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Whether the worker has exited, cleanly or by fault.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Block until the worker exits on its own (or was cancelled elsewhere).
    pub fn join(mut self) -> Result<SessionReport> {
        let kind = self.kind;
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| SessionError::Panicked(kind))?,
            // Only `Drop` empties the slot, and it never runs before `join`.
            None => Err(SessionError::Panicked(kind)),
        }
    }

    /// Cancel the worker and wait at most `timeout` for it to exit.
    ///
    /// On timeout the worker is detached; it still exits once it observes
    /// the cancellation.
    pub fn stop(mut self, timeout: Duration) -> Result<SessionReport> {
        self.cancel.cancel();
        let kind = self.kind;
        let Some(worker) = self.worker.take() else {
            return Err(SessionError::Panicked(kind));
        };

        if !wait_finished(&worker, timeout) {
            warn!(%kind, ?timeout, "session worker did not stop in time; detaching");
            return Err(SessionError::StopTimeout { kind, timeout });
        }
        worker.join().map_err(|_| SessionError::Panicked(kind))?
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.cancel.cancel();
        if wait_finished(&worker, DEFAULT_STOP_TIMEOUT) {
            let _ = worker.join();
        } else {
            warn!(kind = %self.kind, "session worker still running on drop; detaching");
        }
    }
}

fn wait_finished<R>(worker: &JoinHandle<R>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !worker.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    true
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use avtap_transport::MemoryTransport;

    use super::*;
    use crate::config::SessionTimings;

    #[derive(Clone, Default)]
    struct Recorder {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        disposed: Arc<AtomicUsize>,
    }

    impl OutputTarget for Recorder {
        fn send_data(&mut self, data: &[u8]) -> io::Result<()> {
            self.frames.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        fn dispose(&mut self) -> io::Result<()> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn quick_audio() -> SessionConfig {
        let mut config = SessionConfig::audio();
        config.frame.scan_timeout = Duration::from_millis(10);
        config.frame.payload_timeout = Duration::from_millis(20);
        config.timings = SessionTimings {
            handshake_backoff: Duration::from_millis(10),
            discard_backoff: Duration::from_millis(10),
            desync_pause: Duration::from_millis(10),
        };
        config
    }

    #[test]
    fn run_returns_when_cancelled_up_front() {
        let recorder = Recorder::default();
        let session = Session::new(quick_audio(), MemoryTransport::new(), recorder.clone());
        session.cancel_token().cancel();

        let report = session.run().unwrap();
        assert_eq!(report.frames, 0);
        assert_eq!(recorder.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn video_priming_reaches_target_first() {
        let recorder = Recorder::default();
        let mut config = SessionConfig::video();
        config.frame.scan_timeout = Duration::from_millis(10);
        let handle = Session::new(config, MemoryTransport::new(), recorder.clone())
            .spawn()
            .unwrap();

        std::thread::sleep(Duration::from_millis(30));
        handle.stop(Duration::from_secs(2)).unwrap();

        let frames = recorder.frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 20);
        assert_eq!(frames[1].len(), 8);
    }

    #[test]
    fn custom_priming_hook_replaces_default() {
        let recorder = Recorder::default();
        let session = Session::new(SessionConfig::video(), MemoryTransport::new(), recorder.clone())
            .with_priming(|target| target.send_data(b"init"));
        session.cancel_token().cancel();
        session.run().unwrap();

        assert_eq!(*recorder.frames.lock().unwrap(), vec![b"init".to_vec()]);
    }

    #[test]
    fn handle_reports_kind_and_finish_state() {
        let handle = Session::new(quick_audio(), MemoryTransport::new(), Recorder::default())
            .spawn()
            .unwrap();
        assert_eq!(handle.kind(), StreamKind::Audio);
        assert!(!handle.is_finished());

        handle.cancel();
        let report = handle.join().unwrap();
        assert_eq!(report.kind, StreamKind::Audio);
    }

    #[test]
    fn dropping_handle_stops_worker_and_disposes_once() {
        let recorder = Recorder::default();
        let handle = Session::new(quick_audio(), MemoryTransport::new(), recorder.clone())
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        drop(handle);

        assert_eq!(recorder.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handshake_writes_magic_each_iteration() {
        let transport = MemoryTransport::new();
        let probe = transport.clone();
        let handle = Session::new(quick_audio(), transport, Recorder::default())
            .spawn()
            .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        handle.stop(Duration::from_secs(2)).unwrap();

        let written = probe.written();
        assert!(written.len() >= 8);
        assert_eq!(written.len() % 4, 0);
        assert!(written.iter().all(|&b| b == 0xBB));
    }

    #[test]
    fn report_serializes_with_lowercase_kind() {
        let report = SessionReport::new(StreamKind::Video);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["kind"], "video");
        assert_eq!(value["frames"], 0);
    }
}
