//! fydownloader - segmented concurrent HTTP downloads
//!
//! Given a URL, the library probes the resource, splits it into contiguous
//! byte ranges, fetches every range on its own task and writes the result into
//! a single output file.
//!
//! ```text
//! ResourceProbe ──► plan() ──► ChunkFetcher × N ──► final file
//!                                    │                  ▲
//!                                    └─► temp parts ──► Assembler
//! ```
//!
//! # Modules
//!
//! - [`probe`]: `HEAD` request, size, range support and file name
//! - [`plan`]: the pure range planner
//! - [`fetch`]: one range-limited transfer per chunk
//! - [`sink`]: positioned writes and per-chunk temp files
//! - [`assemble`]: splices temp parts into the final file
//! - [`session`]: the coordinator state machine and session handles
//! - [`progress`]: lock-free per-chunk counters and a polling reporter
//! - [`events`]: injectable structured event reporting
//! - [`config`]: runtime configuration and the INI config file
//! - [`checksum`]: SHA-256 verification of finished files
//!
//! # Example
//!
//! ```ignore
//! use fydownloader::{Downloader, DownloaderConfig};
//!
//! let downloader = Downloader::new(DownloaderConfig::new("."))?;
//! let session = downloader.start("https://example.com/archive.tar.gz", 8);
//! for chunk in session.progress() {
//!     println!("{}: {}/{}", chunk.index, chunk.downloaded, chunk.total);
//! }
//! let path = session.wait().await?;
//! ```

pub mod assemble;
pub mod checksum;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod plan;
pub mod probe;
pub mod progress;
pub mod session;
pub mod sink;

pub use config::{DownloaderConfig, SinkStrategy};
pub use error::{DownloadError, DownloadResult, ErrorKind};
pub use events::{EventSink, NullSink, SessionEvent, TracingSink};
pub use plan::{plan, ByteRange};
pub use probe::ResourceMetadata;
pub use progress::{ChunkProgress, ProgressReporter};
pub use session::{Downloader, Session, SessionHandle, SessionPhase};
