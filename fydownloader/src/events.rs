//! Structured session events.
//!
//! The engine never writes to a logger directly. Each session reports what it
//! does to an injected [`EventSink`]; [`TracingSink`] is the default and
//! forwards events to `tracing`, leaving subscriber setup to the application.

use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::error::DownloadError;
use crate::plan::ByteRange;
use crate::probe::ResourceMetadata;
use crate::session::SessionPhase;

/// Something observable that happened inside a session.
#[derive(Debug)]
pub enum SessionEvent<'a> {
    /// The resource probe succeeded.
    Probed {
        url: &'a str,
        metadata: &'a ResourceMetadata,
    },
    /// The range plan is ready.
    Planned { url: &'a str, ranges: &'a [ByteRange] },
    /// The state machine moved to a new phase.
    PhaseChanged { url: &'a str, phase: SessionPhase },
    /// A chunk fetch is about to issue its request.
    ChunkStarted { url: &'a str, range: ByteRange },
    /// A chunk fetch delivered all its bytes.
    ChunkFinished {
        url: &'a str,
        range: ByteRange,
        bytes: u64,
    },
    /// A chunk fetch stopped because the session was cancelled.
    ChunkCancelled { url: &'a str, range: ByteRange },
    /// An error observed after the first one; it does not change the outcome.
    ErrorSuppressed {
        url: &'a str,
        error: &'a DownloadError,
    },
    /// The session produced its final file.
    Completed { url: &'a str, path: &'a Path },
    /// The session terminated with an error.
    Failed {
        url: &'a str,
        error: &'a DownloadError,
    },
}

/// Receiver for [`SessionEvent`]s.
///
/// Implementations must be cheap and must not block: they are called inline
/// from fetch tasks.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn emit(&self, event: &SessionEvent<'_>);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &SessionEvent<'_>) {}
}

/// Sink that forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &SessionEvent<'_>) {
        match event {
            SessionEvent::Probed { url, metadata } => info!(
                url = %url,
                file_name = %metadata.file_name,
                size = metadata.size,
                range_supported = metadata.range_supported,
                "Resource probed"
            ),
            SessionEvent::Planned { url, ranges } => {
                debug!(url = %url, chunks = ranges.len(), "Ranges planned")
            }
            SessionEvent::PhaseChanged { url, phase } => {
                debug!(url = %url, phase = %phase, "Session phase changed")
            }
            SessionEvent::ChunkStarted { url, range } => {
                debug!(url = %url, chunk = range.index, start = range.start, len = range.len, "Chunk started")
            }
            SessionEvent::ChunkFinished { url, range, bytes } => {
                debug!(url = %url, chunk = range.index, bytes = bytes, "Chunk finished")
            }
            SessionEvent::ChunkCancelled { url, range } => {
                debug!(url = %url, chunk = range.index, "Chunk cancelled")
            }
            SessionEvent::ErrorSuppressed { url, error } => {
                warn!(url = %url, error = %error, "Suppressed error during teardown")
            }
            SessionEvent::Completed { url, path } => {
                info!(url = %url, path = %path.display(), "Download completed")
            }
            SessionEvent::Failed { url, error } => {
                error!(url = %url, kind = %error.kind(), error = %error, "Download failed")
            }
        }
    }
}
