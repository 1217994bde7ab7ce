//! SHA-256 verification of finished downloads.
//!
//! Reads are synchronous; call from `spawn_blocking` inside async code.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

const READ_BUFFER: usize = 64 * 1024;

/// Errors from checksum verification.
#[derive(Debug, Error)]
pub enum ChecksumError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The expected digest is not 64 hex characters.
    #[error("'{value}' is not a SHA-256 hex digest")]
    InvalidDigest { value: String },

    /// The file does not hash to the expected digest.
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Lowercase hex SHA-256 of the file at `path`.
pub fn file_sha256(path: &Path) -> Result<String, ChecksumError> {
    let read_error = |source| ChecksumError::Read {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(read_error)?;
    let mut reader = BufReader::with_capacity(READ_BUFFER, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(e)),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Check that `path` hashes to `expected`.
///
/// `expected` is compared case-insensitively and may carry surrounding
/// whitespace, as pasted from a `sha256sum` listing. Returns the computed
/// digest on success.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<String, ChecksumError> {
    let expected = normalize_digest(expected)?;
    let actual = file_sha256(path)?;
    if actual != expected {
        return Err(ChecksumError::Mismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(actual)
}

fn normalize_digest(value: &str) -> Result<String, ChecksumError> {
    let trimmed = value.trim();
    if trimmed.len() != 64 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ChecksumError::InvalidDigest {
            value: value.to_string(),
        });
    }
    Ok(trimmed.to_ascii_lowercase())
}
