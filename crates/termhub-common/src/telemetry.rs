#![allow(clippy::print_stderr)]

//! Tracing subscriber setup for the daemon process.
//!
//! Output is controlled by three environment variables:
//! `TERMHUB_LOG` (append to a file instead of a stream),
//! `TERMHUB_LOG_FORMAT` (`text` or `json`) and
//! `TERMHUB_LOG_STREAM` (`stderr` or `stdout`). The level filter comes from
//! `RUST_LOG`, falling back to the level chosen on the command line.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::str::FromStr;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

const LOG_FILE_ENV: &str = "TERMHUB_LOG";
const LOG_FORMAT_ENV: &str = "TERMHUB_LOG_FORMAT";
const LOG_STREAM_ENV: &str = "TERMHUB_LOG_STREAM";

/// Keeps the non-blocking file writer alive; drop it last.
#[derive(Debug)]
pub struct TelemetryGuard {
    _guard: Option<WorkerGuard>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum LogStream {
    #[default]
    Stderr,
    Stdout,
}

impl FromStr for LogStream {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stderr" => Ok(Self::Stderr),
            "stdout" => Ok(Self::Stdout),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct LogSettings {
    format: LogFormat,
    stream: LogStream,
    file: Option<PathBuf>,
}

impl LogSettings {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unknown values fall back to the defaults rather than failing startup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            format: lookup(LOG_FORMAT_ENV)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            stream: lookup(LOG_STREAM_ENV)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            file: lookup(LOG_FILE_ENV)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Returns the writer, the file guard if any, and whether ANSI colour applies.
    fn writer(&self) -> (BoxMakeWriter, Option<WorkerGuard>, bool) {
        if let Some(path) = &self.file {
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    let (non_blocking, guard) = tracing_appender::non_blocking(file);
                    return (BoxMakeWriter::new(non_blocking), Some(guard), false);
                }
                Err(err) => {
                    eprintln!("Warning: cannot open log file {}: {err}", path.display());
                }
            }
        }
        match self.stream {
            LogStream::Stdout => (
                BoxMakeWriter::new(std::io::stdout),
                None,
                std::io::stdout().is_terminal(),
            ),
            LogStream::Stderr => (
                BoxMakeWriter::new(std::io::stderr),
                None,
                std::io::stderr().is_terminal(),
            ),
        }
    }
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init_tracing(default_level: &str) -> TelemetryGuard {
    let settings = LogSettings::from_env();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let (writer, guard, ansi) = settings.writer();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(writer);
    let installed = match settings.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            builder.with_ansi(false).json().finish(),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            builder.with_thread_names(true).with_ansi(ansi).finish(),
        ),
    };

    match installed {
        Ok(()) => TelemetryGuard { _guard: guard },
        Err(_) => TelemetryGuard { _guard: None },
    }
}
