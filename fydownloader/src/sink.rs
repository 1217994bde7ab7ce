//! Destinations for fetched chunk bytes.
//!
//! Two strategies are supported:
//!
//! ```text
//! Direct:    chunk 0 ─┐
//!            chunk 1 ─┼──► positioned writes ──► final file
//!            chunk 2 ─┘
//!
//! TempFiles: chunk 0 ──► name.part0 ─┐
//!            chunk 1 ──► name.part1 ─┼──► Assembler ──► final file
//!            chunk 2 ──► name.part2 ─┘
//! ```
//!
//! Under the direct strategy every fetch task shares one file handle. Writes
//! from different tasks never overlap because the planned ranges are disjoint,
//! so positioned writes need no locking.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWriteExt, BufWriter};

/// Temp-file path for chunk `index` of `file_name`.
pub fn temp_part_path(temp_dir: &Path, file_name: &str, index: usize) -> PathBuf {
    temp_dir.join(format!("{}.part{}", file_name, index))
}

/// A file that supports concurrent writes at explicit offsets.
#[derive(Debug)]
pub struct PositionedFile {
    file: File,
    path: PathBuf,
}

impl PositionedFile {
    /// Create (or truncate) `path` and size it to `len` bytes.
    pub fn create(path: &Path, len: u64) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write all of `buf` starting at `offset` without moving any cursor.
    #[cfg(unix)]
    pub fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(buf, offset)
    }

    /// Write all of `buf` starting at `offset` without moving any cursor.
    #[cfg(windows)]
    pub fn write_all_at(&self, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            match self.file.seek_write(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    ))
                }
                Ok(n) => {
                    buf = &buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Flush file contents and metadata to disk.
    pub fn sync_all(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// Where one chunk's bytes go.
#[derive(Debug, Clone)]
pub enum ChunkSink {
    /// Positioned writes into the shared final file.
    Direct(Arc<PositionedFile>),
    /// A private temp file for this chunk only.
    TempFile(PathBuf),
}

impl ChunkSink {
    /// Identifier of the storage behind this sink.
    pub fn id(&self) -> SinkId {
        match self {
            ChunkSink::Direct(file) => SinkId::Direct(file.path().to_path_buf()),
            ChunkSink::TempFile(path) => SinkId::TempFile(path.clone()),
        }
    }
}

/// Identifies the storage a chunk was written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkId {
    /// Written in place into this final file.
    Direct(PathBuf),
    /// Written to this private temp file.
    TempFile(PathBuf),
}

impl SinkId {
    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        match self {
            SinkId::Direct(path) | SinkId::TempFile(path) => path,
        }
    }
}

/// Incremental writer for one chunk, opened from a [`ChunkSink`].
pub(crate) enum ChunkWriter {
    Direct {
        file: Arc<PositionedFile>,
        offset: u64,
        pending: BytesMut,
        capacity: usize,
    },
    TempFile {
        writer: BufWriter<tokio::fs::File>,
    },
}

impl ChunkWriter {
    /// Open a writer for a chunk starting at `start`, buffering up to
    /// `capacity` bytes before touching the file.
    pub(crate) async fn open(sink: &ChunkSink, start: u64, capacity: usize) -> io::Result<Self> {
        match sink {
            ChunkSink::Direct(file) => Ok(ChunkWriter::Direct {
                file: Arc::clone(file),
                offset: start,
                pending: BytesMut::with_capacity(capacity),
                capacity,
            }),
            ChunkSink::TempFile(path) => {
                let file = tokio::fs::File::create(path).await?;
                Ok(ChunkWriter::TempFile {
                    writer: BufWriter::with_capacity(capacity, file),
                })
            }
        }
    }

    /// Append `bytes` to the chunk.
    pub(crate) async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            ChunkWriter::Direct {
                file,
                offset,
                pending,
                capacity,
            } => {
                pending.extend_from_slice(bytes);
                if pending.len() >= *capacity {
                    let data = pending.split().freeze();
                    *offset = write_at(file, data, *offset).await?;
                }
                Ok(())
            }
            ChunkWriter::TempFile { writer } => writer.write_all(bytes).await,
        }
    }

    /// Write out anything still buffered.
    pub(crate) async fn finish(self) -> io::Result<()> {
        match self {
            ChunkWriter::Direct {
                file,
                offset,
                mut pending,
                ..
            } => {
                if !pending.is_empty() {
                    write_at(&file, pending.split().freeze(), offset).await?;
                }
                Ok(())
            }
            ChunkWriter::TempFile { mut writer } => {
                writer.flush().await?;
                writer.into_inner().sync_all().await
            }
        }
    }
}

/// Positioned write on the blocking pool. Returns the offset after the data.
async fn write_at(file: &Arc<PositionedFile>, data: Bytes, offset: u64) -> io::Result<u64> {
    let file = Arc::clone(file);
    let next = offset + data.len() as u64;
    tokio::task::spawn_blocking(move || file.write_all_at(&data, offset))
        .await
        .map_err(io::Error::other)??;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_temp_part_path() {
        let path = temp_part_path(Path::new("/tmp/parts"), "movie.mkv", 3);
        assert_eq!(path, PathBuf::from("/tmp/parts/movie.mkv.part3"));
    }

    #[test]
    fn test_positioned_file_disjoint_writes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.bin");
        let file = PositionedFile::create(&path, 10).unwrap();

        file.write_all_at(b"World", 5).unwrap();
        file.write_all_at(b"Hello", 0).unwrap();
        file.sync_all().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"HelloWorld");
    }

    #[tokio::test]
    async fn test_direct_writer_buffers_and_flushes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.bin");
        let file = Arc::new(PositionedFile::create(&path, 12).unwrap());
        let sink = ChunkSink::Direct(Arc::clone(&file));

        let mut writer = ChunkWriter::open(&sink, 4, 3).await.unwrap();
        writer.write(b"ab").await.unwrap();
        writer.write(b"cdef").await.unwrap();
        writer.write(b"gh").await.unwrap();
        writer.finish().await.unwrap();

        let content = std::fs::read(&path).unwrap();
        assert_eq!(&content[..4], &[0, 0, 0, 0]);
        assert_eq!(&content[4..], b"abcdefgh");
        assert_eq!(sink.id(), SinkId::Direct(path));
    }

    #[tokio::test]
    async fn test_temp_writer_creates_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bin.part0");
        let sink = ChunkSink::TempFile(path.clone());

        let mut writer = ChunkWriter::open(&sink, 100, 4).await.unwrap();
        writer.write(b"chunk data").await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"chunk data");
        assert_eq!(sink.id().path(), path.as_path());
    }
}
