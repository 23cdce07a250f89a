//! Logging setup for taskweave.
//!
//! Log levels:
//! - ERROR: Runs aborted by an engine fault
//! - WARN: Task failures, blocked tasks, timeouts, rejected requests
//! - INFO: Run start and summary, decomposition results
//! - DEBUG: Task dispatch traces (queued, started, finished)
//!
//! `RUST_LOG` takes precedence. Otherwise debug mode, enabled with the
//! `--debug` flag or `TASKWEAVE_DEBUG=1`, selects the DEBUG level.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::Result;

pub const DEBUG_ENV: &str = "TASKWEAVE_DEBUG";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub debug: bool,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
    /// One JSON object per line.
    pub json: bool,
}

/// True when debug mode is requested by flag or environment.
pub fn debug_requested(flag: bool) -> bool {
    flag || std::env::var(DEBUG_ENV)
        .map(|v| env_flag(&v))
        .unwrap_or(false)
}

fn env_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "taskweave=debug"
    } else {
        "taskweave=info"
    }
}

/// Install the global subscriber.
///
/// A second call is a no-op, so tests and embedding applications may call
/// it freely.
pub fn init(options: LogOptions) -> Result<()> {
    let debug_mode = debug_requested(options.debug);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_mode)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match (options.file, options.json) {
        (Some(path), json) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
            if json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
        (None, true) => builder.json().with_writer(std::io::stderr).try_init(),
        (None, false) => builder.with_writer(std::io::stderr).try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(debug_mode, "logging initialized");
    }
    Ok(())
}
