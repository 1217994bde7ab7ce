//! Error types for download sessions.
//!
//! Every failure a session can end with maps onto exactly one [`ErrorKind`].
//! The kind is what a front end typically branches on; the full
//! [`DownloadError`] carries the human-readable cause.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that can terminate a download session.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level failure (DNS, connect, TLS, broken body stream).
    #[error("transfer from {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// The server answered with a status other than 200 or 206.
    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    /// The probe response carried no usable `Content-Length`.
    #[error("cannot determine size of {url}: {reason}")]
    SizeUnknown { url: String, reason: String },

    /// Neither `Content-Disposition` nor the URL yielded a file name.
    #[error("cannot derive a file name for {url}")]
    NameUnresolved { url: String },

    /// Local file create/seek/write/copy failure.
    #[error("storage error on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The caller cancelled the session before it finished.
    #[error("download cancelled by user")]
    UserCancelled,
}

impl DownloadError {
    /// Build a transport error from a reqwest failure.
    pub(crate) fn transport(url: &str, err: reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            format!("timed out: {}", err)
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            err.to_string()
        };
        Self::Transport {
            url: url.to_string(),
            reason,
        }
    }

    /// Build a storage error for the given path.
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::UnexpectedStatus { .. } => ErrorKind::UnexpectedStatus,
            Self::SizeUnknown { .. } => ErrorKind::SizeUnknown,
            Self::NameUnresolved { .. } => ErrorKind::NameUnresolved,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::UserCancelled => ErrorKind::UserCancelled,
        }
    }
}

/// Fieldless classification of a [`DownloadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    UnexpectedStatus,
    SizeUnknown,
    NameUnresolved,
    Storage,
    UserCancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transport => "TransportError",
            ErrorKind::UnexpectedStatus => "UnexpectedStatus",
            ErrorKind::SizeUnknown => "SizeUnknown",
            ErrorKind::NameUnresolved => "NameUnresolved",
            ErrorKind::Storage => "StorageError",
            ErrorKind::UserCancelled => "UserCancelled",
        };
        f.write_str(name)
    }
}
