use std::thread;
use std::time::Duration;

use avtap::session::{Session, SessionConfig, StreamKind, DEFAULT_STOP_TIMEOUT};
use avtap::transport::MemoryTransport;
use tracing::info;

use crate::cmd::{open_target, ReplayArgs};
use crate::exit::{io_error, session_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_sessions, OutputFormat, SessionRow};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Decode a raw channel dump as if it had arrived from the device.
///
/// The session is stopped once every byte of the dump has been consumed.
/// Cancellation is only observed between frames, so the frame being read
/// when the dump runs out is still delivered.
pub fn run(args: ReplayArgs, format: OutputFormat) -> CliResult<i32> {
    let kind = StreamKind::from(args.kind);
    let bytes = std::fs::read(&args.capture).map_err(|err| {
        io_error(
            &format!("failed reading {}", args.capture.display()),
            err,
        )
    })?;

    let transport = MemoryTransport::with_bytes(&bytes);
    let probe = transport.clone();
    let target = open_target(args.out.as_deref(), false)?;

    let mut config = SessionConfig::for_kind(kind);
    args.policy.apply(&mut config);

    info!(kind = %kind, bytes = bytes.len(), "replaying capture");
    let handle = Session::new(config, transport, target)
        .spawn()
        .map_err(|err| session_error("session start failed", err))?;

    while probe.remaining() > 0 && !handle.is_finished() {
        thread::sleep(DRAIN_POLL_INTERVAL);
    }

    let row = SessionRow::from_result(kind, handle.stop(DEFAULT_STOP_TIMEOUT));
    let code = if row.is_faulted() { FAILURE } else { SUCCESS };
    print_sessions(&[row], format);
    Ok(code)
}
