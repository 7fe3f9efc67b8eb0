use std::fs::OpenOptions;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use avtap::frame::OversizePolicy;
use avtap::session::{OutputTarget, SessionConfig, StreamKind, TruncatedPolicy, WriterTarget};
use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod capture;
pub mod replay;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode live streams from device socket bridges.
    Capture(CaptureArgs),
    /// Decode a recorded raw channel dump.
    Replay(ReplayArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Capture(args) => capture::run(args, format),
        Command::Replay(args) => replay::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum KindArg {
    Video,
    Audio,
}

impl From<KindArg> for StreamKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Video => StreamKind::Video,
            KindArg::Audio => StreamKind::Audio,
        }
    }
}

/// Frame handling overrides shared by `capture` and `replay`.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct PolicyArgs {
    /// Consume the payload of oversized frames instead of rescanning from
    /// the byte after the header.
    #[arg(long)]
    pub drain_oversized: bool,
    /// Drop frames whose payload arrived short instead of forwarding them.
    #[arg(long)]
    pub discard_truncated: bool,
}

impl PolicyArgs {
    pub fn apply(self, config: &mut SessionConfig) {
        if self.drain_oversized {
            config.frame.oversize_policy = OversizePolicy::Drain;
        }
        if self.discard_truncated {
            config.truncated_policy = TruncatedPolicy::Discard;
        }
    }
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Socket bridging the device's video channel.
    #[arg(long, value_name = "PATH", env = "AVTAP_VIDEO_SOCKET")]
    pub video_socket: Option<PathBuf>,
    /// Socket bridging the device's audio channel.
    #[arg(long, value_name = "PATH", env = "AVTAP_AUDIO_SOCKET")]
    pub audio_socket: Option<PathBuf>,
    /// Write the decoded video elementary stream here. Discarded if unset.
    #[arg(long, value_name = "FILE")]
    pub video_out: Option<PathBuf>,
    /// Write the decoded audio stream here. Discarded if unset.
    #[arg(long, value_name = "FILE")]
    pub audio_out: Option<PathBuf>,
    /// Stop after this long (e.g. 30s, 500ms). Runs until Ctrl-C if unset.
    #[arg(long)]
    pub duration: Option<String>,
    /// Reconnect and restart a session that faulted.
    #[arg(long)]
    pub restart: bool,
    #[command(flatten)]
    pub policy: PolicyArgs,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Raw channel dump to decode.
    pub capture: PathBuf,
    /// Stream kind the dump was taken from.
    #[arg(long, value_enum)]
    pub kind: KindArg,
    /// Write the decoded stream here. Discarded if unset.
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
    #[command(flatten)]
    pub policy: PolicyArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show build details.
    #[arg(long)]
    pub extended: bool,
}

/// Open the output target for one stream: a buffered file, or a sink.
pub fn open_target(path: Option<&Path>, append: bool) -> CliResult<Box<dyn OutputTarget>> {
    let Some(path) = path else {
        return Ok(Box::new(WriterTarget::new(io::sink())));
    };

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
    Ok(Box::new(WriterTarget::new(BufWriter::new(file))))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_units() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration(" 2 ").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn parse_duration_rejects_zero_and_garbage() {
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("fast").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }

    #[test]
    fn policy_flags_override_defaults() {
        let mut config = SessionConfig::audio();
        PolicyArgs {
            drain_oversized: true,
            discard_truncated: true,
        }
        .apply(&mut config);
        assert_eq!(config.frame.oversize_policy, OversizePolicy::Drain);
        assert_eq!(config.truncated_policy, TruncatedPolicy::Discard);

        let mut config = SessionConfig::video();
        PolicyArgs::default().apply(&mut config);
        assert_eq!(config.frame.oversize_policy, OversizePolicy::Leave);
        assert_eq!(config.truncated_policy, TruncatedPolicy::Forward);
    }

    #[test]
    fn open_target_appends_on_restart() {
        let path = std::env::temp_dir().join(format!("avtap-target-{}.bin", std::process::id()));

        let mut target = open_target(Some(&path), false).unwrap();
        target.send_data(b"one").unwrap();
        target.dispose().unwrap();
        drop(target);

        let mut target = open_target(Some(&path), true).unwrap();
        target.send_data(b"two").unwrap();
        target.dispose().unwrap();
        drop(target);

        assert_eq!(std::fs::read(&path).unwrap(), b"onetwo");
        let _ = std::fs::remove_file(&path);
    }
}
