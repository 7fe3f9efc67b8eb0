use std::io::IsTerminal;

use avtap::session::{SessionError, SessionReport, StreamKind};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Stopped,
    Faulted,
}

impl RunStatus {
    fn as_str(self) -> &'static str {
        match self {
            RunStatus::Stopped => "stopped",
            RunStatus::Faulted => "faulted",
        }
    }
}

/// Outcome of one session worker run.
#[derive(Debug, Serialize)]
pub struct SessionRow {
    pub kind: StreamKind,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SessionReport>,
}

impl SessionRow {
    pub fn from_result(kind: StreamKind, result: Result<SessionReport, SessionError>) -> Self {
        match result {
            Ok(report) => Self {
                kind,
                status: RunStatus::Stopped,
                error: None,
                stats: Some(report),
            },
            Err(err) => Self {
                kind,
                status: RunStatus::Faulted,
                error: Some(err.to_string()),
                stats: None,
            },
        }
    }

    pub fn is_faulted(&self) -> bool {
        self.status == RunStatus::Faulted
    }
}

#[derive(Serialize)]
struct SessionsOutput<'a> {
    sessions: &'a [SessionRow],
}

pub fn print_sessions(rows: &[SessionRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = SessionsOutput { sessions: rows };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "KIND",
                    "STATUS",
                    "FRAMES",
                    "BYTES",
                    "DISCARDED",
                    "TRUNCATED",
                    "RETRIES",
                    "STALLS",
                    "ERROR",
                ]);
            for row in rows {
                let counter = |pick: fn(&SessionReport) -> u64| {
                    row.stats
                        .as_ref()
                        .map(|stats| pick(stats).to_string())
                        .unwrap_or_else(|| "-".to_string())
                };
                table.add_row(vec![
                    row.kind.to_string(),
                    row.status.as_str().to_string(),
                    counter(|s| s.frames),
                    counter(|s| s.bytes),
                    counter(|s| s.discarded),
                    counter(|s| s.truncated),
                    counter(|s| s.handshake_retries),
                    counter(|s| s.stalls),
                    row.error.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                match (&row.stats, &row.error) {
                    (Some(stats), _) => println!(
                        "{} {} frames={} empty={} bytes={} discarded={} truncated={} retries={} stalls={} recoveries={}",
                        row.kind,
                        row.status.as_str(),
                        stats.frames,
                        stats.empty_frames,
                        stats.bytes,
                        stats.discarded,
                        stats.truncated,
                        stats.handshake_retries,
                        stats.stalls,
                        stats.recoveries
                    ),
                    (None, error) => println!(
                        "{} {} error={}",
                        row.kind,
                        row.status.as_str(),
                        error.as_deref().unwrap_or("unknown")
                    ),
                }
            }
        }
    }
}
