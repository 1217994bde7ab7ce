//! Splicing per-chunk temp files into the final file.
//!
//! Only used with [`SinkStrategy::TempFiles`](crate::config::SinkStrategy).
//! Parts are processed strictly in index order. Each part is copied to its
//! chunk's start offset and deleted once its bytes are in the final file.
//!
//! If a copy fails the pass stops immediately. Temp files of parts that were
//! not reached are left where they are; removing them is the caller's job.

use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufReader, SeekFrom};

use crate::config::DEFAULT_BUFFER_SIZE;
use crate::error::{DownloadError, DownloadResult};
use crate::plan::ByteRange;

/// One chunk's temp file and the range it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyPart {
    pub range: ByteRange,
    pub path: PathBuf,
}

/// Copies temp parts into a final file.
#[derive(Debug, Clone)]
pub struct Assembler {
    buffer_size: usize,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl Assembler {
    /// Create an assembler that copies through a buffer of `buffer_size` bytes.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Write `parts` into `destination`, which is created or truncated.
    ///
    /// `parts` may be given in any order; they are sorted by index first.
    /// Returns the number of bytes written.
    pub async fn assemble(
        &self,
        destination: &Path,
        parts: &[AssemblyPart],
    ) -> DownloadResult<u64> {
        let storage = |path: &Path| {
            let path = path.to_path_buf();
            move |e| DownloadError::storage(path, e)
        };

        let mut ordered: Vec<&AssemblyPart> = parts.iter().collect();
        ordered.sort_by_key(|part| part.range.index);

        let mut output = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(destination)
            .await
            .map_err(storage(destination))?;

        let mut written = 0u64;
        for part in ordered {
            let input = File::open(&part.path).await.map_err(storage(&part.path))?;
            let mut reader = BufReader::with_capacity(self.buffer_size, input);

            output
                .seek(SeekFrom::Start(part.range.start))
                .await
                .map_err(storage(destination))?;
            let copied = tokio::io::copy_buf(&mut reader, &mut output)
                .await
                .map_err(storage(destination))?;

            if copied != part.range.len {
                return Err(DownloadError::storage(
                    part.path.clone(),
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!(
                            "part {} holds {} bytes, expected {}",
                            part.range.index, copied, part.range.len
                        ),
                    ),
                ));
            }
            written += copied;

            fs::remove_file(&part.path)
                .await
                .map_err(storage(&part.path))?;
        }

        output.flush().await.map_err(storage(destination))?;
        output.sync_all().await.map_err(storage(destination))?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan;
    use crate::sink::temp_part_path;
    use tempfile::TempDir;

    fn write_parts(dir: &Path, data: &[u8], workers: usize) -> Vec<AssemblyPart> {
        plan(data.len() as u64, workers, true)
            .into_iter()
            .map(|range| {
                let path = temp_part_path(dir, "file.bin", range.index);
                let start = range.start as usize;
                let end = range.end_exclusive() as usize;
                std::fs::write(&path, &data[start..end]).unwrap();
                AssemblyPart { range, path }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_assemble_in_order() {
        let temp = TempDir::new().unwrap();
        let data: Vec<u8> = (0..100u8).collect();
        let parts = write_parts(temp.path(), &data, 3);
        let destination = temp.path().join("file.bin");

        let written = Assembler::new(7)
            .assemble(&destination, &parts)
            .await
            .unwrap();

        assert_eq!(written, 100);
        assert_eq!(std::fs::read(&destination).unwrap(), data);
        for part in &parts {
            assert!(!part.path.exists(), "{} not removed", part.path.display());
        }
    }

    #[tokio::test]
    async fn test_assemble_accepts_unordered_parts() {
        let temp = TempDir::new().unwrap();
        let data = b"The quick brown fox jumps over the lazy dog".to_vec();
        let mut parts = write_parts(temp.path(), &data, 4);
        parts.reverse();
        let destination = temp.path().join("file.bin");

        Assembler::default()
            .assemble(&destination, &parts)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), data);
    }

    #[tokio::test]
    async fn test_assemble_short_part_is_storage_error() {
        let temp = TempDir::new().unwrap();
        let data: Vec<u8> = (0..30u8).collect();
        let parts = write_parts(temp.path(), &data, 3);
        std::fs::write(&parts[1].path, b"short").unwrap();
        let destination = temp.path().join("file.bin");

        let result = Assembler::default().assemble(&destination, &parts).await;

        assert!(matches!(result, Err(DownloadError::Storage { .. })));
    }

    #[tokio::test]
    async fn test_abort_leaves_unreached_parts_in_place() {
        let temp = TempDir::new().unwrap();
        let data: Vec<u8> = (0..30u8).collect();
        let parts = write_parts(temp.path(), &data, 3);
        std::fs::remove_file(&parts[1].path).unwrap();
        let destination = temp.path().join("file.bin");

        let result = Assembler::default().assemble(&destination, &parts).await;

        match result {
            Err(DownloadError::Storage { path, .. }) => assert_eq!(path, parts[1].path),
            other => panic!("Expected Storage error, got {:?}", other),
        }
        // Part 0 was consumed before the failure; part 2 was never reached.
        assert!(!parts[0].path.exists());
        assert!(parts[2].path.exists());
    }
}
