//! Range-limited chunk transfers.
//!
//! A [`ChunkFetcher`] downloads one planned [`ByteRange`] and streams it into
//! a [`ChunkSink`]. The body is consumed piece by piece, so memory use does
//! not depend on chunk size.
//!
//! Fetches are cooperatively cancellable: the cancellation token is checked
//! between body reads, never in the middle of a write. A cancelled fetch
//! drops its response (releasing the connection) and reports nothing.

use std::sync::Arc;

use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::error::DownloadError;
use crate::events::{EventSink, SessionEvent};
use crate::plan::ByteRange;
use crate::progress::ProgressCounters;
use crate::sink::{ChunkSink, ChunkWriter, SinkId};

/// Result of a chunk fetch that ran to completion or failed.
#[derive(Debug)]
pub struct ChunkResult {
    /// The range this fetch was responsible for.
    pub range: ByteRange,
    /// Bytes received and handed to the sink.
    pub bytes_written: u64,
    /// Storage the bytes went to.
    pub sink: SinkId,
    /// Success, or the reason the fetch failed.
    pub outcome: Result<(), DownloadError>,
}

/// How a fetch ended.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The fetch finished, successfully or not.
    Finished(ChunkResult),
    /// The fetch observed cancellation and stopped without a result.
    Cancelled,
}

/// Outcome of streaming a body, before it is wrapped in a [`ChunkResult`].
enum Transfer {
    Done,
    Cancelled,
}

/// Fetches individual chunks of one resource.
#[derive(Clone)]
pub struct ChunkFetcher {
    client: Client,
    url: Arc<str>,
    send_range_header: bool,
    buffer_size: usize,
    progress: Arc<ProgressCounters>,
    events: Arc<dyn EventSink>,
}

impl ChunkFetcher {
    /// Create a fetcher for `url`.
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client shared by all fetches of the session
    /// * `url` - Resource URL
    /// * `send_range_header` - Whether requests carry a `Range` header; false
    ///   when the server does not accept ranges and the single chunk is the
    ///   whole resource
    /// * `buffer_size` - Write buffer size for sinks
    /// * `progress` - Counters updated as bytes arrive
    /// * `events` - Sink for structured events
    pub fn new(
        client: Client,
        url: impl Into<Arc<str>>,
        send_range_header: bool,
        buffer_size: usize,
        progress: Arc<ProgressCounters>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            send_range_header,
            buffer_size: buffer_size.max(1),
            progress,
            events,
        }
    }

    /// Fetch `range` into `sink`, stopping early if `cancel` fires.
    ///
    /// On failure or cancellation a temp-file sink is deleted before
    /// returning, so no partial private file outlives this call.
    pub async fn fetch(
        &self,
        range: ByteRange,
        sink: ChunkSink,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        self.events.emit(&SessionEvent::ChunkStarted {
            url: &self.url,
            range,
        });

        let mut bytes_written = 0u64;
        let transfer = self
            .transfer(range, &sink, cancel, &mut bytes_written)
            .await;

        match transfer {
            Ok(Transfer::Done) => {
                self.progress.mark_completed(range.index);
                self.events.emit(&SessionEvent::ChunkFinished {
                    url: &self.url,
                    range,
                    bytes: bytes_written,
                });
                FetchOutcome::Finished(ChunkResult {
                    range,
                    bytes_written,
                    sink: sink.id(),
                    outcome: Ok(()),
                })
            }
            Ok(Transfer::Cancelled) => {
                discard_private_sink(&sink).await;
                self.events.emit(&SessionEvent::ChunkCancelled {
                    url: &self.url,
                    range,
                });
                FetchOutcome::Cancelled
            }
            Err(error) => {
                discard_private_sink(&sink).await;
                FetchOutcome::Finished(ChunkResult {
                    range,
                    bytes_written,
                    sink: sink.id(),
                    outcome: Err(error),
                })
            }
        }
    }

    async fn transfer(
        &self,
        range: ByteRange,
        sink: &ChunkSink,
        cancel: &CancellationToken,
        bytes_written: &mut u64,
    ) -> Result<Transfer, DownloadError> {
        let sink_path = sink.id().path().to_path_buf();
        let storage_error = |e| DownloadError::storage(sink_path.clone(), e);

        let mut writer = ChunkWriter::open(sink, range.start, self.buffer_size)
            .await
            .map_err(storage_error)?;

        let mut request = self.client.get(&*self.url);
        if self.send_range_header {
            if let Some(value) = range.header_value() {
                request = request.header(RANGE, value);
            }
        }

        let mut response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Transfer::Cancelled),
            sent = request.send() => sent.map_err(|e| DownloadError::transport(&self.url, e))?,
        };

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::UnexpectedStatus {
                url: self.url.to_string(),
                status: status.as_u16(),
            });
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Transfer::Cancelled),
                next = response.chunk() => next.map_err(|e| DownloadError::transport(&self.url, e))?,
            };
            let Some(bytes) = next else {
                break;
            };

            let received = bytes.len() as u64;
            if *bytes_written + received > range.len {
                return Err(DownloadError::Transport {
                    url: self.url.to_string(),
                    reason: format!(
                        "chunk {} received more than the {} bytes requested",
                        range.index, range.len
                    ),
                });
            }

            writer.write(&bytes).await.map_err(storage_error)?;
            *bytes_written += received;
            self.progress.add(range.index, received);
        }

        if *bytes_written < range.len {
            return Err(DownloadError::Transport {
                url: self.url.to_string(),
                reason: format!(
                    "chunk {} ended after {} of {} bytes",
                    range.index, bytes_written, range.len
                ),
            });
        }

        writer.finish().await.map_err(storage_error)?;
        Ok(Transfer::Done)
    }
}

/// Delete a temp-file sink. Direct sinks are left to the coordinator.
async fn discard_private_sink(sink: &ChunkSink) {
    if let ChunkSink::TempFile(path) = sink {
        tokio::fs::remove_file(path).await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use crate::sink::PositionedFile;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(url: String, ranges: &[ByteRange], send_range: bool) -> ChunkFetcher {
        ChunkFetcher::new(
            Client::new(),
            url,
            send_range,
            4,
            Arc::new(ProgressCounters::new(ranges)),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn test_fetch_into_direct_sink() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Range", "bytes=5-9"))
            .respond_with(ResponseTemplate::new(206).set_body_string("World"))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.bin");
        let file = Arc::new(PositionedFile::create(&path, 10).unwrap());
        let ranges = [ByteRange::new(0, 0, 5), ByteRange::new(1, 5, 5)];
        let fetcher = fetcher(server.uri(), &ranges, true);

        let outcome = fetcher
            .fetch(
                ranges[1],
                ChunkSink::Direct(file),
                &CancellationToken::new(),
            )
            .await;

        match outcome {
            FetchOutcome::Finished(result) => {
                assert!(result.outcome.is_ok());
                assert_eq!(result.bytes_written, 5);
            }
            FetchOutcome::Cancelled => panic!("fetch should not be cancelled"),
        }
        assert_eq!(&std::fs::read(&path).unwrap()[5..], b"World");
        assert_eq!(fetcher.progress.snapshot()[1].downloaded, 5);
        assert!(fetcher.progress.snapshot()[1].completed);
    }

    #[tokio::test]
    async fn test_fetch_rejects_error_status_and_removes_temp() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let part = temp.path().join("x.bin.part0");
        let ranges = [ByteRange::new(0, 0, 5)];
        let fetcher = fetcher(server.uri(), &ranges, true);

        let outcome = fetcher
            .fetch(
                ranges[0],
                ChunkSink::TempFile(part.clone()),
                &CancellationToken::new(),
            )
            .await;

        match outcome {
            FetchOutcome::Finished(result) => match result.outcome {
                Err(DownloadError::UnexpectedStatus { status, .. }) => assert_eq!(status, 500),
                other => panic!("Expected UnexpectedStatus, got {:?}", other),
            },
            FetchOutcome::Cancelled => panic!("fetch should not be cancelled"),
        }
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_body() {
        let server = MockServer::start().await;
        // Server ignores the Range header and sends the whole resource.
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("HelloWorld"))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let part = temp.path().join("x.bin.part0");
        let ranges = [ByteRange::new(0, 0, 5), ByteRange::new(1, 5, 5)];
        let fetcher = fetcher(server.uri(), &ranges, true);

        let outcome = fetcher
            .fetch(
                ranges[0],
                ChunkSink::TempFile(part.clone()),
                &CancellationToken::new(),
            )
            .await;

        match outcome {
            FetchOutcome::Finished(result) => {
                assert!(matches!(result.outcome, Err(DownloadError::Transport { .. })));
            }
            FetchOutcome::Cancelled => panic!("fetch should not be cancelled"),
        }
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_fetch_rejects_truncated_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206).set_body_string("Hel"))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let part = temp.path().join("x.bin.part0");
        let ranges = [ByteRange::new(0, 0, 5)];
        let fetcher = fetcher(server.uri(), &ranges, true);

        let outcome = fetcher
            .fetch(
                ranges[0],
                ChunkSink::TempFile(part),
                &CancellationToken::new(),
            )
            .await;

        match outcome {
            FetchOutcome::Finished(result) => {
                assert_eq!(result.bytes_written, 3);
                assert!(matches!(result.outcome, Err(DownloadError::Transport { .. })));
            }
            FetchOutcome::Cancelled => panic!("fetch should not be cancelled"),
        }
    }

    #[tokio::test]
    async fn test_fetch_cancelled_before_start_reports_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206).set_body_string("Hello"))
            .expect(0)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let part = temp.path().join("x.bin.part0");
        let ranges = [ByteRange::new(0, 0, 5)];
        let fetcher = fetcher(server.uri(), &ranges, true);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = fetcher
            .fetch(ranges[0], ChunkSink::TempFile(part.clone()), &cancel)
            .await;

        assert!(matches!(outcome, FetchOutcome::Cancelled));
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_fetch_without_range_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("whole"))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let part = temp.path().join("w.bin.part0");
        let ranges = [ByteRange::new(0, 0, 5)];
        let fetcher = fetcher(server.uri(), &ranges, false);

        let outcome = fetcher
            .fetch(
                ranges[0],
                ChunkSink::TempFile(part.clone()),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            outcome,
            FetchOutcome::Finished(ChunkResult { outcome: Ok(()), .. })
        ));
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("range"));
        assert_eq!(std::fs::read(&part).unwrap(), b"whole");
    }
}
