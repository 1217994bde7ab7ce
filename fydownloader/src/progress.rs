//! Per-chunk progress tracking.
//!
//! Fetch tasks update lock-free atomic counters; readers take consistent
//! enough snapshots at any time without coordinating with the writers. A
//! [`ProgressReporter`] polls a session on a background task and hands each
//! snapshot to a callback, which is how a UI typically consumes progress.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::plan::ByteRange;
use crate::session::SessionHandle;

/// Default interval between progress reports.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Progress of a single chunk at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    /// Chunk index.
    pub index: usize,
    /// Bytes received so far.
    pub downloaded: u64,
    /// Bytes the chunk covers.
    pub total: u64,
    /// Whether the chunk finished successfully.
    pub completed: bool,
}

impl ChunkProgress {
    /// Fraction complete in `[0.0, 1.0]`. Empty chunks count as complete.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.downloaded as f64 / self.total as f64
        }
    }
}

/// Shared progress counters for one session.
#[derive(Debug)]
pub struct ProgressCounters {
    totals: Vec<u64>,
    downloaded: Vec<AtomicU64>,
    completed: Vec<AtomicBool>,
}

impl ProgressCounters {
    /// Create counters for the planned ranges, all starting at zero.
    pub fn new(ranges: &[ByteRange]) -> Self {
        Self {
            totals: ranges.iter().map(|r| r.len).collect(),
            downloaded: ranges.iter().map(|_| AtomicU64::new(0)).collect(),
            completed: ranges.iter().map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Record `bytes` more received for chunk `index`.
    pub fn add(&self, index: usize, bytes: u64) {
        if let Some(counter) = self.downloaded.get(index) {
            counter.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Mark chunk `index` as finished.
    pub fn mark_completed(&self, index: usize) {
        if let Some(flag) = self.completed.get(index) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Total bytes received across all chunks.
    pub fn total_downloaded(&self) -> u64 {
        self.downloaded
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Per-chunk progress in index order.
    pub fn snapshot(&self) -> Vec<ChunkProgress> {
        self.totals
            .iter()
            .enumerate()
            .map(|(index, &total)| ChunkProgress {
                index,
                downloaded: self.downloaded[index].load(Ordering::Relaxed),
                total,
                completed: self.completed[index].load(Ordering::SeqCst),
            })
            .collect()
    }
}

/// Callback invoked with each progress snapshot.
pub type ProgressCallback = Box<dyn Fn(&[ChunkProgress]) + Send + Sync>;

/// Periodically reports a session's progress to a callback.
///
/// Runs on the tokio runtime until the session reaches a terminal phase,
/// then delivers one final report. Dropping the reporter stops it.
pub struct ProgressReporter {
    handle: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

impl ProgressReporter {
    /// Start reporting progress of `session` every `poll_interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        session: SessionHandle,
        callback: ProgressCallback,
        poll_interval: Duration,
    ) -> Self {
        let stop = CancellationToken::new();
        let stop_task = stop.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = stop_task.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if session.is_finished() {
                    break;
                }
                callback(&session.progress());
            }
            // Final report
            callback(&session.progress());
        });

        Self {
            handle: Some(handle),
            stop,
        }
    }

    /// Start a reporter with the default 100ms poll interval.
    pub fn start_default(session: SessionHandle, callback: ProgressCallback) -> Self {
        Self::start(session, callback, DEFAULT_POLL_INTERVAL)
    }

    /// Wait for the reporter to deliver its final report.
    pub async fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.await.ok();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges() -> Vec<ByteRange> {
        vec![
            ByteRange::new(0, 0, 500),
            ByteRange::new(1, 500, 300),
            ByteRange::new(2, 800, 200),
        ]
    }

    #[test]
    fn test_progress_counters_new() {
        let counters = ProgressCounters::new(&ranges());
        assert_eq!(counters.snapshot().len(), 3);
        assert_eq!(counters.total_downloaded(), 0);
        assert!(counters.snapshot().iter().all(|p| !p.completed));
    }

    #[test]
    fn test_progress_counters_add() {
        let counters = ProgressCounters::new(&ranges());

        counters.add(0, 200);
        counters.add(0, 300);
        counters.add(1, 100);
        counters.add(9, 100);

        assert_eq!(counters.total_downloaded(), 600);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot[0].downloaded, 500);
        assert_eq!(snapshot[1].downloaded, 100);
        assert_eq!(snapshot[2].downloaded, 0);
    }

    #[test]
    fn test_progress_counters_mark_completed_is_idempotent() {
        let counters = ProgressCounters::new(&ranges());

        counters.mark_completed(1);
        counters.mark_completed(1);

        let snapshot = counters.snapshot();
        assert!(!snapshot[0].completed);
        assert!(snapshot[1].completed);
    }

    #[test]
    fn test_snapshot_is_index_ordered() {
        let counters = ProgressCounters::new(&ranges());
        let snapshot = counters.snapshot();
        let indices: Vec<usize> = snapshot.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(snapshot[2].total, 200);
    }

    #[test]
    fn test_chunk_progress_ratio() {
        let progress = ChunkProgress {
            index: 0,
            downloaded: 25,
            total: 100,
            completed: false,
        };
        assert!((progress.ratio() - 0.25).abs() < f64::EPSILON);

        let empty = ChunkProgress {
            total: 0,
            downloaded: 0,
            ..progress
        };
        assert_eq!(empty.ratio(), 1.0);
    }
}
