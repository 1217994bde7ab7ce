//! Terminal progress display.
//!
//! One bar per chunk plus a total bar, created lazily from the first progress
//! snapshot that carries a plan.

use std::sync::OnceLock;
use std::time::Duration;

use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use fydownloader::{ChunkProgress, SessionHandle};

const CHUNK_TEMPLATE: &str = "  #{prefix:>2} [{bar:30.cyan/blue}] {bytes:>10}/{total_bytes:<10}";
const TOTAL_TEMPLATE: &str =
    "{spinner:.green} [{bar:30.green/white}] {bytes}/{total_bytes} @ {bytes_per_sec} eta {eta}";

/// Per-chunk progress bars for one session.
pub struct ChunkBars {
    multi: MultiProgress,
    total: ProgressBar,
    chunks: OnceLock<Vec<ProgressBar>>,
    session: SessionHandle,
}

impl ChunkBars {
    /// Create bars for `session`. Nothing is drawn when `visible` is false.
    pub fn new(session: SessionHandle, visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let multi = MultiProgress::with_draw_target(target);
        let total = multi.add(ProgressBar::new(0));
        total.set_style(style(TOTAL_TEMPLATE));
        total.enable_steady_tick(Duration::from_millis(250));

        Self {
            multi,
            total,
            chunks: OnceLock::new(),
            session,
        }
    }

    /// Apply a progress snapshot.
    pub fn update(&self, progress: &[ChunkProgress]) {
        if progress.is_empty() {
            return;
        }
        let bars = self.chunks.get_or_init(|| self.create_chunk_bars(progress));

        for (bar, chunk) in bars.iter().zip(progress) {
            bar.set_position(chunk.downloaded);
            if chunk.completed && !bar.is_finished() {
                bar.finish();
            }
        }
        self.total.set_position(self.session.downloaded());
    }

    fn create_chunk_bars(&self, progress: &[ChunkProgress]) -> Vec<ProgressBar> {
        if let Some(metadata) = self.session.metadata() {
            self.multi
                .println(format!(
                    "{}  {}  {} chunk(s), {} worker(s)",
                    metadata.file_name,
                    HumanBytes(metadata.size),
                    progress.len(),
                    self.session.workers()
                ))
                .ok();
        }
        self.total
            .set_length(progress.iter().map(|p| p.total).sum());

        progress
            .iter()
            .map(|chunk| {
                let bar = self.multi.add(ProgressBar::new(chunk.total));
                bar.set_style(style(CHUNK_TEMPLATE));
                bar.set_prefix(chunk.index.to_string());
                bar
            })
            .collect()
    }

    /// Finish or abandon every bar depending on the outcome.
    pub fn finish(&self, success: bool) {
        let bars = self.chunks.get().into_iter().flatten();
        for bar in bars.chain(std::iter::once(&self.total)) {
            if success {
                bar.finish();
            } else {
                bar.abandon();
            }
        }
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╌")
}
