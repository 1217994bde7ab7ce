//! CLI error type and exit codes.

use std::io;

use thiserror::Error;

use fydownloader::checksum::ChecksumError;
use fydownloader::config::ConfigError;
use fydownloader::{DownloadError, ErrorKind};

/// Exit code for a run interrupted with Ctrl+C.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid configuration or arguments.
    #[error("configuration error: {0}")]
    Config(String),

    /// The config file could not be loaded or saved.
    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    /// The download session failed.
    #[error("download failed [{kind}]: {0}", kind = .0.kind())]
    Download(#[from] DownloadError),

    /// The downloaded file did not verify.
    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    /// Logging could not be initialized.
    #[error("failed to initialize logging: {0}")]
    Logging(String),

    /// Runtime or terminal I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Download(e) if e.kind() == ErrorKind::UserCancelled => EXIT_INTERRUPTED,
            CliError::Config(_) | CliError::ConfigFile(_) => 2,
            CliError::Checksum(_) => 3,
            _ => 1,
        }
    }
}
