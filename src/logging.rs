//! Structured logging for Kiln
//!
//! The engine never prints command output itself; that goes through the
//! `Reporter`. Everything else is logged with `tracing` using structured fields.
//!
//! # Log Format Conventions
//!
//! - `job`: The job name
//! - `command`: The command name inside the job
//! - `operation`: What is being done ("run", "emit", "save", "load")
//! - `status`: The result ("success", "error")
//! - `elapsed_ms`: Wall time of the operation
//!
//! # Examples
//!
//! ```rust
//! use tracing::info;
//!
//! info!(
//!     job = "core",
//!     operation = "run",
//!     status = "success",
//!     elapsed_ms = 1200u64,
//!     "job finished"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Fields of one event, with `job` and `command` pulled out so they can lead the line
#[derive(Debug, Default)]
struct EventFields {
    job: Option<String>,
    command: Option<String>,
    message: String,
    extra: Vec<(&'static str, String)>,
}

impl EventFields {
    fn record(&mut self, name: &'static str, value: String) {
        match name {
            "job" => self.job = Some(value),
            "command" => self.command = Some(value),
            "message" => self.message = value,
            _ => self.extra.push((name, value)),
        }
    }

    /// `job/command`, or whichever of the two is present
    fn scope(&self) -> Option<String> {
        match (&self.job, &self.command) {
            (Some(job), Some(command)) => Some(format!("{}/{}", job, command)),
            (Some(job), None) => Some(job.clone()),
            (None, Some(command)) => Some(command.clone()),
            (None, None) => None,
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std_fmt::Debug) {
        self.record(field.name(), format!("{:?}", value));
    }
}

/// Line formatter: `<time> LEVEL(kiln) job/command: message key=value...`
struct KilnFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for KilnFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let level = *event.metadata().level();
        let mut fields = EventFields::default();
        event.record(&mut fields);

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f")
        )?;

        if self.with_ansi {
            let level_style = match level {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{}{:5}(kiln)\x1b[0m ", level_style, level)?;
            if let Some(scope) = fields.scope() {
                write!(writer, "\x1b[1m{}\x1b[0m: ", scope)?;
            }
        } else {
            write!(writer, "{:5}(kiln) ", level)?;
            if let Some(scope) = fields.scope() {
                write!(writer, "{}: ", scope)?;
            }
        }

        write!(writer, "{}", fields.message)?;
        for (name, value) in &fields.extra {
            write!(writer, " {}={}", name, value)?;
        }

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// Same layout without color (CI)
    Compact,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Parse from `KILN_LOG_FORMAT`, falling back to compact when `CI` is set
    pub fn from_env() -> Self {
        match std::env::var("KILN_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ => {
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            }
        }
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Log filter (e.g., "debug", "kiln=trace"); overrides `default_level`
/// - `KILN_LOG_FORMAT`: "pretty", "compact" or "json"
/// - `CI`: If set, defaults to compact format
///
/// Calling it twice is harmless; the second call leaves the first subscriber in place.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match LogFormat::from_env() {
        format @ (LogFormat::Pretty | LogFormat::Compact) => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(KilnFormatter {
                        with_ansi: format == LogFormat::Pretty,
                    })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Operation names for consistent logging
pub mod operations {
    pub const RUN: &str = "run";
    pub const EMIT: &str = "emit";
    pub const SAVE: &str = "save";
    pub const LOAD: &str = "load";
}

/// Status values for consistent logging
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const SKIPPED: &str = "skipped";
    pub const ERROR: &str = "error";
}
