//! Process-wide tracing setup.
//!
//! Two layers share one `EnvFilter` (config level, overridden by `RUST_LOG`):
//! a stderr layer and, when a log file is configured, a non-blocking file
//! layer. The stderr layer only shows warnings unless `--verbose` is given, so
//! it does not fight with the progress bars.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::CliError;

/// Keeps the file writer flushing until dropped.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// # Arguments
///
/// * `level` - Default filter directive when `RUST_LOG` is unset
/// * `file` - Optional log file, appended to
/// * `verbose` - Show the full filter level on stderr instead of warnings only
pub fn init(level: &str, file: Option<&Path>, verbose: bool) -> Result<LogGuard, CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| CliError::Logging(format!("invalid log level '{}': {}", level, e)))?;

    let stderr_level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::WARN
    };
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(LocalTime::rfc_3339())
        .with_target(false)
        .with_filter(stderr_level);

    let (file_layer, guard) = match file {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTime::rfc_3339());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| CliError::Logging(e.to_string()))?;

    Ok(LogGuard { _file: guard })
}

fn split_log_path(path: &Path) -> Result<(&Path, &std::ffi::OsStr), CliError> {
    let name = path
        .file_name()
        .ok_or_else(|| CliError::Config(format!("log file '{}' has no file name", path.display())))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((dir, name))
}
