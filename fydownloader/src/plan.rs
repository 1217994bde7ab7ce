//! Range planning.
//!
//! Splits a resource of known size into contiguous, disjoint byte ranges, one
//! per concurrent fetch. Planning is pure: the same inputs always produce the
//! same ranges.
//!
//! The ranges produced here must tile `[0, total_size)` exactly. Direct-offset
//! sinks write concurrently into one shared file handle without locking, which
//! is only sound while no two ranges overlap. [`verify_tiling`] checks this and
//! the coordinator runs it before any fetch is launched.

use std::fmt;

use thiserror::Error;

/// One contiguous slice of the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// Position of this range in the plan (0-based).
    pub index: usize,
    /// First byte offset covered by this range.
    pub start: u64,
    /// Number of bytes covered. Zero only for the degenerate plan of an
    /// empty resource.
    pub len: u64,
}

impl ByteRange {
    /// Create a range covering `len` bytes from `start`.
    pub fn new(index: usize, start: u64, len: u64) -> Self {
        Self { index, start, len }
    }

    /// Inclusive end offset, or `None` for an empty range.
    pub fn end(&self) -> Option<u64> {
        self.len.checked_sub(1).map(|last| self.start + last)
    }

    /// Offset one past the last byte of this range.
    pub fn end_exclusive(&self) -> u64 {
        self.start + self.len
    }

    /// Whether the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Value for an HTTP `Range` header selecting exactly this range.
    ///
    /// Returns `None` for an empty range, which cannot be expressed.
    pub fn header_value(&self) -> Option<String> {
        self.end()
            .map(|end| format!("bytes={}-{}", self.start, end))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end() {
            Some(end) => write!(f, "#{} [{}, {}]", self.index, self.start, end),
            None => write!(f, "#{} [empty]", self.index),
        }
    }
}

/// Plan the byte ranges for a resource.
///
/// Produces a single range covering the whole resource when range retrieval
/// is unsupported, when `workers <= 1`, or when `total_size < workers`.
/// Otherwise every range has length `total_size / workers` and the last one
/// additionally absorbs the remainder.
///
/// # Arguments
///
/// * `total_size` - Size of the resource in bytes
/// * `workers` - Requested number of concurrent fetches
/// * `range_supported` - Whether the server accepts byte-range requests
pub fn plan(total_size: u64, workers: usize, range_supported: bool) -> Vec<ByteRange> {
    let workers = workers as u64;
    if !range_supported || workers <= 1 || total_size < workers {
        return vec![ByteRange::new(0, 0, total_size)];
    }

    let base = total_size / workers;
    let remainder = total_size % workers;

    (0..workers)
        .map(|i| {
            let len = if i == workers - 1 {
                base + remainder
            } else {
                base
            };
            ByteRange::new(i as usize, i * base, len)
        })
        .collect()
}

/// A way in which a set of ranges fails to tile its resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TilingError {
    /// The plan contains no ranges at all.
    #[error("plan is empty")]
    Empty,

    /// A range's index does not match its position.
    #[error("range at position {position} has index {index}")]
    IndexMismatch { position: usize, index: usize },

    /// The first range does not start at offset 0.
    #[error("first range starts at {start}, expected 0")]
    BadStart { start: u64 },

    /// Two adjacent ranges leave bytes uncovered.
    #[error("gap between range {index} and its predecessor: expected start {expected}, found {found}")]
    Gap {
        index: usize,
        expected: u64,
        found: u64,
    },

    /// Two adjacent ranges cover the same bytes.
    #[error("range {index} overlaps its predecessor: expected start {expected}, found {found}")]
    Overlap {
        index: usize,
        expected: u64,
        found: u64,
    },

    /// The ranges do not end at the resource size.
    #[error("ranges cover {covered} bytes of a {total}-byte resource")]
    Coverage { covered: u64, total: u64 },
}

/// Check that `ranges` tile `[0, total_size)` with no gaps or overlaps and
/// that indices follow array order.
pub fn verify_tiling(ranges: &[ByteRange], total_size: u64) -> Result<(), TilingError> {
    let first = ranges.first().ok_or(TilingError::Empty)?;
    if first.start != 0 {
        return Err(TilingError::BadStart { start: first.start });
    }

    let mut expected = 0u64;
    for (position, range) in ranges.iter().enumerate() {
        if range.index != position {
            return Err(TilingError::IndexMismatch {
                position,
                index: range.index,
            });
        }
        if range.start > expected {
            return Err(TilingError::Gap {
                index: range.index,
                expected,
                found: range.start,
            });
        }
        if range.start < expected {
            return Err(TilingError::Overlap {
                index: range.index,
                expected,
                found: range.start,
            });
        }
        expected = range.end_exclusive();
    }

    if expected != total_size {
        return Err(TilingError::Coverage {
            covered: expected,
            total: total_size,
        });
    }
    Ok(())
}
