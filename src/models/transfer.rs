//! Resumable streaming transfer into `.incomplete` blobs
//!
//! The partial object on disk is the only transfer state. A resumed request
//! asks for `bytes=N-` and the response must acknowledge that exact range
//! before anything is appended; servers that answer with the full body cause
//! a truncate-and-restart instead.

use crate::client::HubClient;
use crate::error::TransferError;
use crate::metrics;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Response, StatusCode};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Progress of one transfer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Bytes written since this session started
    pub bytes_this_session: u64,
    /// Bytes already on disk when the session started
    pub resumed_from: u64,
    /// Size of the whole object, when known
    pub total: Option<u64>,
    pub elapsed: Duration,
}

impl ProgressEvent {
    /// Bytes of the whole object now on disk
    pub fn downloaded(&self) -> u64 {
        self.resumed_from + self.bytes_this_session
    }
}

/// Receives [`ProgressEvent`]s synchronously, in order
pub trait ProgressSink: Send {
    fn on_progress(&mut self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressEvent) + Send,
{
    fn on_progress(&mut self, event: &ProgressEvent) {
        self(event)
    }
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&mut self, _event: &ProgressEvent) {}
}

/// How a transfer ended, when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The `.incomplete` file holds the whole object
    Completed { bytes: u64 },
    /// Stopped on request; the `.incomplete` file is a valid prefix
    Cancelled { bytes_on_disk: u64 },
}

/// What to do with the bytes already on disk given the server's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeAck {
    Append,
    Restart,
    AlreadyComplete,
}

/// Streams one object into its `.incomplete` path
#[derive(Debug, Clone)]
pub struct TransferEngine {
    client: HubClient,
    progress_interval: Duration,
}

impl TransferEngine {
    pub fn new(client: HubClient, progress_interval: Duration) -> Self {
        Self {
            client,
            progress_interval,
        }
    }

    /// Download `url` into `incomplete_path`
    ///
    /// With `resume` set, existing bytes are kept and only the remainder is
    /// requested. Without it, any partial file is truncated first.
    pub async fn fetch(
        &self,
        url: &str,
        incomplete_path: &Path,
        resume: bool,
        expected_total: Option<u64>,
        cancel: &CancellationToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<TransferOutcome, TransferError> {
        let existing = if resume {
            existing_len(incomplete_path).await?
        } else {
            0
        };

        if cancel.is_cancelled() {
            return Ok(TransferOutcome::Cancelled {
                bytes_on_disk: existing,
            });
        }

        let mut offset = existing;
        let mut response = self.request(url, offset).await?;

        if offset > 0 {
            match acknowledge_range(&response, offset, expected_total) {
                RangeAck::Append => {
                    tracing::info!(offset, path = ?incomplete_path, "Resuming download");
                    metrics::record_resume();
                }
                RangeAck::AlreadyComplete => {
                    tracing::debug!(offset, "Partial blob already holds the whole object");
                    return Ok(TransferOutcome::Completed { bytes: offset });
                }
                RangeAck::Restart => {
                    let status = response.status();
                    // Other error statuses are reported below with the partial file untouched
                    if matches!(
                        status,
                        StatusCode::OK
                            | StatusCode::PARTIAL_CONTENT
                            | StatusCode::RANGE_NOT_SATISFIABLE
                    ) {
                        tracing::warn!(
                            offset,
                            status = status.as_u16(),
                            "Server did not honor the range request, restarting from zero"
                        );
                        offset = 0;
                        if status != StatusCode::OK {
                            response = self.request(url, 0).await?;
                        }
                    }
                }
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let total = expected_total.or_else(|| response.content_length().map(|len| offset + len));
        let mut file = open_destination(incomplete_path, offset > 0).await?;

        let started = Instant::now();
        let mut last_emit: Option<Instant> = None;
        let mut written: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = response.chunk() => Some(chunk),
            };

            let chunk = match next {
                None => {
                    finish_file(&mut file, incomplete_path).await?;
                    metrics::record_bytes_transferred(written);
                    tracing::info!(
                        bytes_on_disk = offset + written,
                        path = ?incomplete_path,
                        "Download cancelled"
                    );
                    return Ok(TransferOutcome::Cancelled {
                        bytes_on_disk: offset + written,
                    });
                }
                Some(Err(e)) => {
                    finish_file(&mut file, incomplete_path).await?;
                    metrics::record_bytes_transferred(written);
                    return Err(TransferError::Network(e));
                }
                Some(Ok(None)) => break,
                Some(Ok(Some(chunk))) => chunk,
            };

            file.write_all(&chunk)
                .await
                .map_err(|source| io_error(incomplete_path, source))?;
            written += chunk.len() as u64;

            let now = Instant::now();
            if last_emit.is_none_or(|at| now.duration_since(at) >= self.progress_interval) {
                last_emit = Some(now);
                progress.on_progress(&ProgressEvent {
                    bytes_this_session: written,
                    resumed_from: offset,
                    total,
                    elapsed: now.duration_since(started),
                });
            }
        }

        finish_file(&mut file, incomplete_path).await?;
        metrics::record_bytes_transferred(written);

        progress.on_progress(&ProgressEvent {
            bytes_this_session: written,
            resumed_from: offset,
            total,
            elapsed: started.elapsed(),
        });

        let actual = offset + written;
        if let Some(expected) = expected_total
            && actual != expected
        {
            if actual > expected {
                // Over-long data cannot be a prefix of the object
                if let Err(e) = tokio::fs::remove_file(incomplete_path).await {
                    tracing::warn!(
                        path = ?incomplete_path,
                        error = %e,
                        "Failed to remove over-long partial blob"
                    );
                }
            }
            return Err(TransferError::SizeMismatch { expected, actual });
        }

        Ok(TransferOutcome::Completed { bytes: actual })
    }

    async fn request(&self, url: &str, offset: u64) -> Result<Response, TransferError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        Ok(request.send().await?)
    }
}

fn acknowledge_range(response: &Response, offset: u64, expected_total: Option<u64>) -> RangeAck {
    let content_range = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok());
    classify_range_response(response.status(), content_range, offset, expected_total)
}

fn classify_range_response(
    status: StatusCode,
    content_range: Option<&str>,
    offset: u64,
    expected_total: Option<u64>,
) -> RangeAck {
    match status {
        StatusCode::PARTIAL_CONTENT => match content_range.and_then(content_range_start) {
            Some(start) if start == offset => RangeAck::Append,
            _ => RangeAck::Restart,
        },
        StatusCode::RANGE_NOT_SATISFIABLE => {
            let total = expected_total.or_else(|| content_range.and_then(content_range_total));
            if total == Some(offset) {
                RangeAck::AlreadyComplete
            } else {
                RangeAck::Restart
            }
        }
        _ => RangeAck::Restart,
    }
}

/// `bytes 100-999/1000` -> 100
fn content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes ")?;
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

/// `bytes */1000` or `bytes 0-9/1000` -> 1000
fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

async fn existing_len(path: &Path) -> Result<u64, TransferError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(source) => Err(io_error(path, source)),
    }
}

async fn open_destination(path: &Path, append: bool) -> Result<File, TransferError> {
    let result = if append {
        OpenOptions::new().append(true).open(path).await
    } else {
        File::create(path).await
    };
    result.map_err(|source| io_error(path, source))
}

async fn finish_file(file: &mut File, path: &Path) -> Result<(), TransferError> {
    file.flush().await.map_err(|source| io_error(path, source))?;
    file.sync_data()
        .await
        .map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> TransferError {
    TransferError::Io {
        path: PathBuf::from(path),
        source,
    }
}
