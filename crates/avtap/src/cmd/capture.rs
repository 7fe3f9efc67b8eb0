use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use avtap::frame::BufferPool;
use avtap::session::{Session, SessionConfig, SessionHandle, StreamKind, DEFAULT_STOP_TIMEOUT};
use avtap::transport::UnixDeviceTransport;
use tracing::{info, warn};

use crate::cmd::{open_target, parse_duration, CaptureArgs, PolicyArgs};
use crate::exit::{session_error, transport_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_sessions, OutputFormat, SessionRow};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const RESTART_DELAY: Duration = Duration::from_secs(1);

struct StreamSource {
    kind: StreamKind,
    socket: PathBuf,
    out: Option<PathBuf>,
}

struct Slot {
    source: StreamSource,
    handle: Option<SessionHandle>,
    restart_at: Option<Instant>,
}

pub fn run(args: CaptureArgs, format: OutputFormat) -> CliResult<i32> {
    let sources = stream_sources(&args)?;
    let deadline = args
        .duration
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|duration| Instant::now() + duration);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    // Both sessions rent payload buffers from one pool.
    let pool = Arc::new(BufferPool::new());
    let mut slots = Vec::with_capacity(sources.len());
    for source in sources {
        let handle = start(&source, args.policy, &pool, false)?;
        slots.push(Slot {
            source,
            handle: Some(handle),
            restart_at: None,
        });
    }

    let mut rows = Vec::new();
    while running.load(Ordering::SeqCst) && deadline.is_none_or(|at| Instant::now() < at) {
        for slot in &mut slots {
            reap(slot, &mut rows, args.restart);
            if slot.restart_at.is_some_and(|at| Instant::now() >= at) {
                restart(slot, args.policy, &pool);
            }
        }

        if slots
            .iter()
            .all(|slot| slot.handle.is_none() && slot.restart_at.is_none())
        {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    for slot in &mut slots {
        if let Some(handle) = slot.handle.take() {
            let kind = handle.kind();
            rows.push(SessionRow::from_result(
                kind,
                handle.stop(DEFAULT_STOP_TIMEOUT),
            ));
        }
    }

    print_sessions(&rows, format);

    let faulted = rows.iter().any(SessionRow::is_faulted);
    Ok(if faulted && !args.restart {
        FAILURE
    } else {
        SUCCESS
    })
}

fn stream_sources(args: &CaptureArgs) -> CliResult<Vec<StreamSource>> {
    let mut sources = Vec::new();
    if let Some(socket) = &args.video_socket {
        sources.push(StreamSource {
            kind: StreamKind::Video,
            socket: socket.clone(),
            out: args.video_out.clone(),
        });
    }
    if let Some(socket) = &args.audio_socket {
        sources.push(StreamSource {
            kind: StreamKind::Audio,
            socket: socket.clone(),
            out: args.audio_out.clone(),
        });
    }

    if sources.is_empty() {
        return Err(CliError::new(
            USAGE,
            "at least one of --video-socket or --audio-socket is required",
        ));
    }
    Ok(sources)
}

fn start(
    source: &StreamSource,
    policy: PolicyArgs,
    pool: &Arc<BufferPool>,
    append: bool,
) -> CliResult<SessionHandle> {
    let transport = UnixDeviceTransport::connect(&source.socket)
        .map_err(|err| transport_error(&format!("{} connect failed", source.kind), err))?;
    let target = open_target(source.out.as_deref(), append)?;

    let mut config = SessionConfig::for_kind(source.kind);
    policy.apply(&mut config);

    info!(kind = %source.kind, socket = %source.socket.display(), "starting session");
    Session::new(config, transport, target)
        .with_pool(Arc::clone(pool))
        .spawn()
        .map_err(|err| session_error(&format!("{} session start failed", source.kind), err))
}

/// Collect a worker that exited on its own and schedule its restart.
fn reap(slot: &mut Slot, rows: &mut Vec<SessionRow>, restart: bool) {
    if !slot
        .handle
        .as_ref()
        .is_some_and(SessionHandle::is_finished)
    {
        return;
    }
    let Some(handle) = slot.handle.take() else {
        return;
    };

    let row = SessionRow::from_result(slot.source.kind, handle.join());
    if row.is_faulted() && restart {
        warn!(
            kind = %slot.source.kind,
            error = row.error.as_deref().unwrap_or("unknown"),
            "session faulted; restarting"
        );
        slot.restart_at = Some(Instant::now() + RESTART_DELAY);
    }
    rows.push(row);
}

fn restart(slot: &mut Slot, policy: PolicyArgs, pool: &Arc<BufferPool>) {
    match start(&slot.source, policy, pool, true) {
        Ok(handle) => {
            slot.handle = Some(handle);
            slot.restart_at = None;
        }
        Err(err) => {
            warn!(kind = %slot.source.kind, error = %err, "restart failed");
            slot.restart_at = Some(Instant::now() + RESTART_DELAY);
        }
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
