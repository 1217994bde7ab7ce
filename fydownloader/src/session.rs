//! Download sessions.
//!
//! A [`Downloader`] starts independent sessions. Each session runs on its own
//! tokio task and walks a small state machine:
//!
//! ```text
//!   Planning ──► Fetching ──► Assembling ──► Completed
//!      │            │             │
//!      └────────────┴─────────────┴────────► Failed
//! ```
//!
//! `Assembling` is only entered under the temp-file sink strategy. A
//! zero-byte resource goes straight from `Planning` to `Completed`.
//!
//! # Fail-fast
//!
//! Every chunk is fetched by its own task. The first chunk error wins: it
//! cancels all sibling fetches, the coordinator waits until every task has
//! stopped, and only then removes the staging file and temp parts.
//! Errors that arrive after the first are reported as suppressed events and
//! otherwise dropped.
//!
//! A caller-requested cancel follows the same path but ends with
//! [`DownloadError::UserCancelled`].
//!
//! # Files on disk
//!
//! Bytes are written to a staging file `.<name>.fydownloader-<random>` in the
//! destination directory. Only a successful session renames it over
//! `<destination>/<name>`, so a file already at the destination survives a
//! failed download. Temp parts live in a directory of their own inside the
//! configured temp directory, one per session:
//!
//! ```text
//!   <temp_dir>/session-<random>/<name>.part0
//!                               <name>.part1
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use reqwest::Client;
use tokio::sync::watch;
use tempfile::{TempDir, TempPath};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::assemble::{Assembler, AssemblyPart};
use crate::config::{DownloaderConfig, SinkStrategy};
use crate::error::{DownloadError, DownloadResult};
use crate::events::{EventSink, SessionEvent, TracingSink};
use crate::fetch::{ChunkFetcher, ChunkResult, FetchOutcome};
use crate::plan::{plan, verify_tiling, ByteRange};
use crate::probe::{ResourceMetadata, ResourceProbe};
use crate::progress::{ChunkProgress, ProgressCounters};
use crate::sink::{temp_part_path, ChunkSink, PositionedFile};

// =============================================================================
// Phases
// =============================================================================

/// Position of a session in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Probing the resource and planning ranges.
    Planning,
    /// Chunk fetches are in flight.
    Fetching,
    /// Temp parts are being spliced into the final file.
    Assembling,
    /// The final file is complete.
    Completed,
    /// The session ended with an error.
    Failed,
}

impl SessionPhase {
    /// Whether the session can no longer change phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Failed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Planning => "planning",
            SessionPhase::Fetching => "fetching",
            SessionPhase::Assembling => "assembling",
            SessionPhase::Completed => "completed",
            SessionPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Downloader
// =============================================================================

/// Entry point for starting download sessions.
///
/// Sessions started from the same downloader share its HTTP client and event
/// sink but nothing else.
///
/// # Example
///
/// ```ignore
/// let downloader = Downloader::new(DownloaderConfig::new("downloads"))?;
/// let session = downloader.start("https://example.com/file.iso", 8);
/// let path = session.wait().await?;
/// ```
#[derive(Clone)]
pub struct Downloader {
    config: Arc<DownloaderConfig>,
    client: Client,
    events: Arc<dyn EventSink>,
}

impl Downloader {
    /// Create a downloader with an HTTP client built from `config`.
    pub fn new(config: DownloaderConfig) -> DownloadResult<Self> {
        let client = config
            .build_client()
            .map_err(|e| DownloadError::Transport {
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self::with_client(config, client))
    }

    /// Create a downloader that sends requests through `client`.
    pub fn with_client(config: DownloaderConfig, client: Client) -> Self {
        Self {
            config: Arc::new(config),
            client,
            events: Arc::new(TracingSink),
        }
    }

    /// Replace the event sink (default: [`TracingSink`]).
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Configuration sessions are started with.
    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Start downloading `url` with up to `workers` concurrent fetches.
    ///
    /// Returns immediately. Must be called from within a tokio runtime.
    /// Dropping the returned [`Session`] does not stop the download; call
    /// [`Session::cancel`] for that.
    pub fn start(&self, url: &str, workers: usize) -> Session {
        let (phase_tx, _) = watch::channel(SessionPhase::Planning);
        let shared = Arc::new(SessionShared {
            url: url.to_string(),
            workers: workers.max(1),
            cancel: CancellationToken::new(),
            plan: OnceLock::new(),
            phase: phase_tx,
        });

        let coordinator = Coordinator {
            shared: Arc::clone(&shared),
            config: Arc::clone(&self.config),
            client: self.client.clone(),
            events: Arc::clone(&self.events),
        };
        let task = tokio::spawn(coordinator.run());

        Session {
            handle: SessionHandle { shared },
            task,
        }
    }

    /// Download `url` and wait for the outcome.
    pub async fn download(&self, url: &str, workers: usize) -> DownloadResult<PathBuf> {
        self.start(url, workers).wait().await
    }
}

// =============================================================================
// Session and handle
// =============================================================================

/// State shared between a running session and its handles.
struct SessionShared {
    url: String,
    workers: usize,
    cancel: CancellationToken,
    plan: OnceLock<SessionPlan>,
    phase: watch::Sender<SessionPhase>,
}

/// Everything known once planning succeeded.
struct SessionPlan {
    metadata: ResourceMetadata,
    ranges: Vec<ByteRange>,
    counters: Arc<ProgressCounters>,
}

/// A running download. Owns the coordinator task.
pub struct Session {
    handle: SessionHandle,
    task: JoinHandle<DownloadResult<PathBuf>>,
}

impl Session {
    /// A cloneable handle for observing or cancelling this session.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Per-chunk progress in index order. Empty until planning finished.
    pub fn progress(&self) -> Vec<ChunkProgress> {
        self.handle.progress()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Wait for the terminal outcome: the final file path or the error.
    pub async fn wait(self) -> DownloadResult<PathBuf> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // The runtime is shutting down.
            Err(_) => Err(DownloadError::UserCancelled),
        }
    }
}

/// Read-only view of a session plus the ability to cancel it.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Source URL.
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Requested worker count.
    pub fn workers(&self) -> usize {
        self.shared.workers
    }

    /// Probe result, once available.
    pub fn metadata(&self) -> Option<ResourceMetadata> {
        self.shared.plan.get().map(|p| p.metadata.clone())
    }

    /// Planned ranges, once available.
    pub fn ranges(&self) -> Option<Vec<ByteRange>> {
        self.shared.plan.get().map(|p| p.ranges.clone())
    }

    /// Per-chunk progress in index order. Empty until planning finished.
    pub fn progress(&self) -> Vec<ChunkProgress> {
        self.shared
            .plan
            .get()
            .map(|p| p.counters.snapshot())
            .unwrap_or_default()
    }

    /// Bytes received across all chunks. Zero until planning finished.
    pub fn downloaded(&self) -> u64 {
        self.shared
            .plan
            .get()
            .map_or(0, |p| p.counters.total_downloaded())
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        *self.shared.phase.borrow()
    }

    /// Receiver that observes every phase change.
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.shared.phase.subscribe()
    }

    /// Whether the session reached `Completed` or `Failed`.
    pub fn is_finished(&self) -> bool {
        self.phase().is_terminal()
    }

    /// Request cancellation. Has no effect once the session finished.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("url", &self.shared.url)
            .field("workers", &self.shared.workers)
            .field("phase", &self.phase())
            .finish()
    }
}

// =============================================================================
// First-error-wins
// =============================================================================

/// Holds the first error of a fetch phase.
#[derive(Debug, Default)]
struct FailFast {
    first: Option<DownloadError>,
}

impl FailFast {
    /// Record `error`. Returns it back if an earlier error already won.
    fn record(&mut self, error: DownloadError) -> Option<DownloadError> {
        if self.first.is_some() {
            return Some(error);
        }
        self.first = Some(error);
        None
    }

    fn into_result(self) -> DownloadResult<()> {
        match self.first {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// What one joined fetch task contributes to its phase.
enum Joined {
    Chunk(ChunkResult),
    Error(DownloadError),
    Stopped,
    Panicked(Box<dyn std::any::Any + Send>),
}

impl From<Result<FetchOutcome, JoinError>> for Joined {
    fn from(joined: Result<FetchOutcome, JoinError>) -> Self {
        match joined {
            Ok(FetchOutcome::Finished(ChunkResult {
                outcome: Err(error),
                ..
            })) => Joined::Error(error),
            Ok(FetchOutcome::Finished(result)) => Joined::Chunk(result),
            Ok(FetchOutcome::Cancelled) => Joined::Stopped,
            Err(e) if e.is_panic() => Joined::Panicked(e.into_panic()),
            // Aborted from outside; its chunk was never written.
            Err(_) => Joined::Error(DownloadError::UserCancelled),
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Prefix of staging files; the file name and a random suffix follow.
const STAGING_MARKER: &str = "fydownloader-";

/// Files a session has created that must not survive a failure.
///
/// Only paths this session created itself are ever tracked, so cleanup never
/// touches a file that was already on disk.
#[derive(Debug, Default)]
struct Artifacts {
    staging: Option<TempPath>,
    part_dir: Option<TempDir>,
    temp_parts: Vec<PathBuf>,
}

impl Artifacts {
    /// Create an empty staging file for `file_name` in `dir`.
    fn stage(&mut self, dir: &Path, file_name: &str) -> DownloadResult<PathBuf> {
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}.{}", file_name, STAGING_MARKER))
            .rand_bytes(8)
            .tempfile_in(dir)
            .map_err(|e| DownloadError::storage(dir, e))?
            .into_temp_path();
        let path = staging.to_path_buf();
        self.staging = Some(staging);
        Ok(path)
    }

    /// Create this session's private directory for temp parts.
    fn create_part_dir(&mut self, temp_dir: &Path) -> DownloadResult<PathBuf> {
        let dir = tempfile::Builder::new()
            .prefix("session-")
            .tempdir_in(temp_dir)
            .map_err(|e| DownloadError::storage(temp_dir, e))?;
        let path = dir.path().to_path_buf();
        self.part_dir = Some(dir);
        Ok(path)
    }

    /// Rename the staging file over `destination`.
    fn commit(&mut self, destination: &Path) -> DownloadResult<()> {
        let Some(staging) = self.staging.take() else {
            return Ok(());
        };
        staging
            .persist(destination)
            .map_err(|e| DownloadError::storage(destination, e.error))
    }

    /// Delete every artifact that exists. Failures are reported, not returned.
    async fn remove(&mut self, url: &str, events: &dyn EventSink) {
        let report = |path: &Path, e: io::Error| {
            if e.kind() != io::ErrorKind::NotFound {
                events.emit(&SessionEvent::ErrorSuppressed {
                    url,
                    error: &DownloadError::storage(path, e),
                });
            }
        };

        for path in &self.temp_parts {
            if let Err(e) = tokio::fs::remove_file(path).await {
                report(path, e);
            }
        }
        if let Some(staging) = self.staging.take() {
            let path = staging.to_path_buf();
            if let Err(e) = staging.close() {
                report(&path, e);
            }
        }
        if let Some(dir) = self.part_dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                report(&path, e);
            }
        }
    }
}

struct Coordinator {
    shared: Arc<SessionShared>,
    config: Arc<DownloaderConfig>,
    client: Client,
    events: Arc<dyn EventSink>,
}

impl Coordinator {
    async fn run(self) -> DownloadResult<PathBuf> {
        self.events.emit(&SessionEvent::PhaseChanged {
            url: &self.shared.url,
            phase: SessionPhase::Planning,
        });

        let mut artifacts = Artifacts::default();
        let result = self.drive(&mut artifacts).await;

        match &result {
            Ok(path) => {
                self.events.emit(&SessionEvent::Completed {
                    url: &self.shared.url,
                    path,
                });
                self.set_phase(SessionPhase::Completed);
            }
            Err(error) => {
                artifacts
                    .remove(&self.shared.url, self.events.as_ref())
                    .await;
                self.events.emit(&SessionEvent::Failed {
                    url: &self.shared.url,
                    error,
                });
                self.set_phase(SessionPhase::Failed);
            }
        }
        result
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.shared.phase.send_replace(phase);
        self.events.emit(&SessionEvent::PhaseChanged {
            url: &self.shared.url,
            phase,
        });
    }

    fn check_cancelled(&self) -> DownloadResult<()> {
        if self.shared.cancel.is_cancelled() {
            Err(DownloadError::UserCancelled)
        } else {
            Ok(())
        }
    }

    async fn drive(&self, artifacts: &mut Artifacts) -> DownloadResult<PathBuf> {
        let url = self.shared.url.as_str();
        let probe = ResourceProbe::new(self.client.clone());

        let metadata = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => return Err(DownloadError::UserCancelled),
            probed = probe.probe(url) => probed?,
        };
        self.events.emit(&SessionEvent::Probed {
            url,
            metadata: &metadata,
        });

        let ranges = plan(metadata.size, self.shared.workers, metadata.range_supported);
        // Direct writes share one file handle; overlapping ranges would corrupt it.
        if let Err(e) = verify_tiling(&ranges, metadata.size) {
            panic!("range plan for {} bytes does not tile: {}", metadata.size, e);
        }
        self.events.emit(&SessionEvent::Planned {
            url,
            ranges: &ranges,
        });

        let counters = Arc::new(ProgressCounters::new(&ranges));
        let destination_dir = self.config.destination_dir.as_path();
        let destination = destination_dir.join(&metadata.file_name);
        let planned = SessionPlan {
            metadata,
            ranges,
            counters: Arc::clone(&counters),
        };
        let planned = self.shared.plan.get_or_init(|| planned);

        tokio::fs::create_dir_all(destination_dir)
            .await
            .map_err(|e| DownloadError::storage(destination_dir, e))?;
        let staging = artifacts.stage(destination_dir, &planned.metadata.file_name)?;

        if planned.metadata.size == 0 {
            self.check_cancelled()?;
            artifacts.commit(&destination)?;
            return Ok(destination);
        }

        let fetcher = ChunkFetcher::new(
            self.client.clone(),
            url,
            planned.metadata.range_supported,
            self.config.buffer_size,
            counters,
            Arc::clone(&self.events),
        );

        self.set_phase(SessionPhase::Fetching);
        match self.config.sink {
            SinkStrategy::Direct => {
                self.fetch_direct(&fetcher, &planned.ranges, &staging)
                    .await?
            }
            SinkStrategy::TempFiles => {
                self.fetch_temp_files(&fetcher, planned, &staging, artifacts)
                    .await?
            }
        }
        self.check_cancelled()?;
        artifacts.commit(&destination)?;
        Ok(destination)
    }

    async fn fetch_direct(
        &self,
        fetcher: &ChunkFetcher,
        ranges: &[ByteRange],
        staging: &Path,
    ) -> DownloadResult<()> {
        let total = ranges.last().map_or(0, |r| r.end_exclusive());
        let file = PositionedFile::create(staging, total)
            .map_err(|e| DownloadError::storage(staging, e))?;
        let file = Arc::new(file);

        self.fetch_all(fetcher, ranges, |_| ChunkSink::Direct(Arc::clone(&file)))
            .await?;
        self.check_cancelled()?;

        // Every task has joined; no other writer holds the handle.
        let sync_file = Arc::clone(&file);
        tokio::task::spawn_blocking(move || sync_file.sync_all())
            .await
            .map_err(io::Error::other)
            .and_then(|r| r)
            .map_err(|e| DownloadError::storage(staging, e))
    }

    async fn fetch_temp_files(
        &self,
        fetcher: &ChunkFetcher,
        plan: &SessionPlan,
        staging: &Path,
        artifacts: &mut Artifacts,
    ) -> DownloadResult<()> {
        let temp_dir = &self.config.temp_dir;
        tokio::fs::create_dir_all(temp_dir)
            .await
            .map_err(|e| DownloadError::storage(temp_dir, e))?;
        let part_dir = artifacts.create_part_dir(temp_dir)?;

        let file_name = plan.metadata.file_name.as_str();
        artifacts.temp_parts = plan
            .ranges
            .iter()
            .map(|r| temp_part_path(&part_dir, file_name, r.index))
            .collect();

        let results = self
            .fetch_all(fetcher, &plan.ranges, |range| {
                ChunkSink::TempFile(temp_part_path(&part_dir, file_name, range.index))
            })
            .await?;
        self.check_cancelled()?;

        self.set_phase(SessionPhase::Assembling);
        let parts: Vec<AssemblyPart> = results
            .into_iter()
            .map(|result| AssemblyPart {
                range: result.range,
                path: result.sink.path().to_path_buf(),
            })
            .collect();

        let assembler = Assembler::new(self.config.buffer_size);
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(DownloadError::UserCancelled),
            assembled = assembler.assemble(staging, &parts) => assembled.map(|_| ()),
        }
    }

    /// Fetch every range concurrently and wait for all tasks to stop.
    ///
    /// Returns the successful results, or the first error after all sibling
    /// fetches have been cancelled and joined.
    async fn fetch_all<F>(
        &self,
        fetcher: &ChunkFetcher,
        ranges: &[ByteRange],
        sink_for: F,
    ) -> DownloadResult<Vec<ChunkResult>>
    where
        F: Fn(&ByteRange) -> ChunkSink,
    {
        let cancel = self.shared.cancel.child_token();
        let mut tasks = JoinSet::new();
        for range in ranges {
            let fetcher = fetcher.clone();
            let sink = sink_for(range);
            let cancel = cancel.clone();
            let range = *range;
            tasks.spawn(async move { fetcher.fetch(range, sink, &cancel).await });
        }

        let mut fail_fast = FailFast::default();
        let mut finished = Vec::with_capacity(ranges.len());
        while let Some(joined) = tasks.join_next().await {
            match Joined::from(joined) {
                Joined::Chunk(result) => finished.push(result),
                Joined::Error(error) => {
                    if let Some(suppressed) = fail_fast.record(error) {
                        self.events.emit(&SessionEvent::ErrorSuppressed {
                            url: &self.shared.url,
                            error: &suppressed,
                        });
                    } else {
                        cancel.cancel();
                    }
                }
                Joined::Stopped => {}
                Joined::Panicked(payload) => {
                    cancel.cancel();
                    while tasks.join_next().await.is_some() {}
                    std::panic::resume_unwind(payload);
                }
            }
        }

        fail_fast.into_result()?;
        if finished.len() != ranges.len() {
            // A fetch only stops without an error when it was cancelled.
            return Err(DownloadError::UserCancelled);
        }
        finished.sort_by_key(|r| r.range.index);
        Ok(finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::RecordingSink;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_phase_is_terminal() {
        assert!(!SessionPhase::Planning.is_terminal());
        assert!(!SessionPhase::Fetching.is_terminal());
        assert!(!SessionPhase::Assembling.is_terminal());
        assert!(SessionPhase::Completed.is_terminal());
        assert!(SessionPhase::Failed.is_terminal());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::Assembling.to_string(), "assembling");
    }

    #[test]
    fn test_fail_fast_first_error_wins() {
        let mut fail_fast = FailFast::default();

        assert!(fail_fast
            .record(DownloadError::UnexpectedStatus {
                url: "u".to_string(),
                status: 500,
            })
            .is_none());
        let second = fail_fast.record(DownloadError::UserCancelled);
        assert!(matches!(second, Some(DownloadError::UserCancelled)));

        match fail_fast.into_result() {
            Err(DownloadError::UnexpectedStatus { status, .. }) => assert_eq!(status, 500),
            other => panic!("Expected first error, got {:?}", other),
        }
    }

    #[test]
    fn test_fail_fast_empty_is_ok() {
        assert!(FailFast::default().into_result().is_ok());
    }

    #[tokio::test]
    async fn test_aborted_fetch_task_counts_as_error() {
        let task = tokio::spawn(std::future::pending::<FetchOutcome>());
        task.abort();
        let joined = task.await;

        assert!(matches!(
            Joined::from(joined),
            Joined::Error(DownloadError::UserCancelled)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_fetch_task_is_stopped() {
        let joined = tokio::spawn(async { FetchOutcome::Cancelled }).await;
        assert!(matches!(Joined::from(joined), Joined::Stopped));
    }

    async fn mount_file(server: &MockServer, body: &'static [u8]) {
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Accept-Ranges", "bytes")
                    .insert_header("Content-Length", body.len().to_string().as_str()),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(header("Range", "bytes=0-4"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(&body[..5]))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(header("Range", "bytes=5-9"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(&body[5..]))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_session_phases_and_events() {
        let server = MockServer::start().await;
        mount_file(&server, b"HelloWorld").await;

        let temp = TempDir::new().unwrap();
        let config = DownloaderConfig::new(temp.path())
            .with_temp_dir(temp.path().join("parts"))
            .with_sink(SinkStrategy::TempFiles);
        let events = Arc::new(RecordingSink::default());
        let downloader =
            Downloader::with_client(config, Client::new()).with_events(events.clone());

        let url = format!("{}/hello.txt", server.uri());
        let session = downloader.start(&url, 2);
        let handle = session.handle();
        let path = session.wait().await.unwrap();

        assert_eq!(path, temp.path().join("hello.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"HelloWorld");
        assert_eq!(handle.phase(), SessionPhase::Completed);
        assert!(handle.is_finished());
        assert_eq!(handle.metadata().unwrap().size, 10);
        assert_eq!(handle.ranges().unwrap().len(), 2);
        assert!(handle.progress().iter().all(|p| p.completed));
        assert_eq!(handle.downloaded(), 10);

        let recorded = events.events.lock().clone();
        let phases: Vec<&String> = recorded.iter().filter(|e| e.starts_with("phase:")).collect();
        assert_eq!(
            phases,
            vec![
                "phase:planning",
                "phase:fetching",
                "phase:assembling",
                "phase:completed"
            ]
        );
        assert!(recorded.contains(&"planned:2".to_string()));
        assert!(recorded.contains(&"completed".to_string()));
    }

    #[tokio::test]
    async fn test_probe_failure_skips_fetching() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let events = Arc::new(RecordingSink::default());
        let downloader = Downloader::with_client(DownloaderConfig::new(temp.path()), Client::new())
            .with_events(events.clone());

        let session = downloader.start(&format!("{}/missing.bin", server.uri()), 4);
        let handle = session.handle();
        let result = session.wait().await;

        assert!(matches!(
            result,
            Err(DownloadError::UnexpectedStatus { status: 404, .. })
        ));
        assert_eq!(handle.phase(), SessionPhase::Failed);
        assert!(handle.progress().is_empty());
        assert_eq!(handle.downloaded(), 0);
        let recorded = events.events.lock().clone();
        assert!(!recorded.contains(&"phase:fetching".to_string()));
        assert_eq!(recorded.last().unwrap(), "phase:failed");
        assert!(recorded.contains(&"failed:UnexpectedStatus".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_during_probe() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Length", "10")
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let downloader = Downloader::with_client(DownloaderConfig::new(temp.path()), Client::new())
            .with_events(Arc::new(crate::events::NullSink));

        let session = downloader.start(&format!("{}/slow.bin", server.uri()), 2);
        session.cancel();
        let result = session.wait().await;

        assert!(matches!(result, Err(DownloadError::UserCancelled)));
        assert!(!temp.path().join("slow.bin").exists());
    }

    #[tokio::test]
    async fn test_subscribe_phase_sees_terminal_state() {
        let server = MockServer::start().await;
        mount_file(&server, b"HelloWorld").await;

        let temp = TempDir::new().unwrap();
        let downloader = Downloader::with_client(DownloaderConfig::new(temp.path()), Client::new())
            .with_events(Arc::new(crate::events::NullSink));

        let session = downloader.start(&format!("{}/data.bin", server.uri()), 2);
        let mut phases = session.handle().subscribe_phase();
        let finished = phases.wait_for(|phase| phase.is_terminal()).await.map(|p| *p);

        assert_eq!(finished.unwrap(), SessionPhase::Completed);
        assert!(session.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_progress_reporter_delivers_final_snapshot() {
        use crate::progress::ProgressReporter;

        let server = MockServer::start().await;
        mount_file(&server, b"HelloWorld").await;

        let temp = TempDir::new().unwrap();
        let downloader = Downloader::with_client(DownloaderConfig::new(temp.path()), Client::new())
            .with_events(Arc::new(crate::events::NullSink));

        let session = downloader.start(&format!("{}/report.bin", server.uri()), 2);
        let last = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&last);
        let reporter = ProgressReporter::start(
            session.handle(),
            Box::new(move |progress: &[ChunkProgress]| *sink.lock() = progress.to_vec()),
            Duration::from_millis(5),
        );

        session.wait().await.unwrap();
        reporter.finish().await;

        let last = last.lock().clone();
        assert_eq!(last.len(), 2);
        assert!(last.iter().all(|p| p.completed && p.downloaded == 5));
    }
}
