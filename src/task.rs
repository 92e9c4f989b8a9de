//! Per-row fetch, resize and write with bounded retries
//!
//! A [`RowTask`] moves through an explicit state machine:
//!
//! ```text
//! Pending -> Attempting -> Succeeded
//!                       -> Retrying -> Attempting ...
//!                       -> GaveUp
//! Pending -> Skipped            (destination already complete)
//! Pending -> GaveUp             (no candidate URL yields a filename)
//! ```
//!
//! Bytes are always written to a temporary file next to the destination and
//! published with a no-clobber rename. The temporary file is deleted on every
//! path that does not end in that rename.

use crate::config::RetryPolicy;
use crate::destination::{Destination, DestinationResolver};
use crate::error::{FetchError, IsRetryable, Result};
use crate::fetcher::Fetcher;
use crate::processor::ImageProcessor;
use crate::tracing_config::spans;
use crate::types::{Outcome, Row};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Everything a row task needs, shared by all workers of one run
pub struct TaskContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub resolver: DestinationResolver,
    /// `None` disables resizing and streams bodies straight to disk
    pub processor: Option<ImageProcessor>,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(fetcher: Arc<dyn Fetcher>, resolver: DestinationResolver) -> Self {
        Self {
            fetcher,
            resolver,
            processor: None,
            retry: RetryPolicy::default(),
            timeout: crate::config::DEFAULT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_processor(mut self, processor: Option<ImageProcessor>) -> Self {
        self.processor = processor;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("resolver", &self.resolver)
            .field("processor", &self.processor)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of one row task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Attempting { attempt: u32 },
    Retrying { attempt: u32 },
    Succeeded,
    Skipped,
    GaveUp,
}

impl TaskState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped | Self::GaveUp)
    }
}

/// Result of one successful attempt
struct Written {
    bytes: u64,
    resized: bool,
}

/// The unit of work dispatched to the worker pool
#[derive(Debug)]
pub struct RowTask {
    ctx: Arc<TaskContext>,
    row: Row,
    state: TaskState,
}

impl RowTask {
    pub fn new(ctx: Arc<TaskContext>, row: Row) -> Self {
        Self {
            ctx,
            row,
            state: TaskState::Pending,
        }
    }

    #[must_use]
    pub fn row(&self) -> &Row {
        &self.row
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Drive the row to a terminal state
    ///
    /// Never fails: every error ends up inside the returned [`Outcome`].
    pub async fn run(&mut self) -> Outcome {
        let resolved = self
            .ctx
            .resolver
            .resolve_first(self.row.id(), self.row.urls())
            .map(|(url, destination)| (url.to_string(), destination));

        let (url, destination) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                let url = self.row.primary_url().unwrap_or_default().to_string();
                return self.give_up(0, &url, e);
            },
        };

        if destination.exists() {
            tracing::debug!(path = %destination.path().display(), "Already downloaded, skipping");
            self.state = TaskState::Skipped;
            return Outcome::SkippedAlreadyDone {
                path: destination.path(),
            };
        }

        let max_attempts = self.ctx.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if self.ctx.cancel.is_cancelled() {
                return self.give_up(attempt, &url, FetchError::Cancelled);
            }

            attempt += 1;
            self.state = TaskState::Attempting { attempt };

            let outcome = self
                .attempt(&url, &destination)
                .instrument(spans::fetch(&url, attempt))
                .await;

            match outcome {
                Ok(written) => {
                    tracing::debug!(
                        path = %destination.path().display(),
                        bytes = written.bytes,
                        attempt,
                        resized = written.resized,
                        "Image saved"
                    );
                    self.state = TaskState::Succeeded;
                    return Outcome::Success {
                        path: destination.path(),
                        bytes_written: written.bytes,
                        attempts: attempt,
                        resized: written.resized,
                    };
                },
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::debug!(
                        url = %url,
                        error = %e,
                        attempt,
                        max_attempts,
                        delay_ms = self.ctx.retry.backoff.as_millis() as u64,
                        "Attempt failed, retrying"
                    );
                    self.state = TaskState::Retrying { attempt };

                    let cancel = self.ctx.cancel.clone();
                    let cancelled = tokio::select! {
                        () = tokio::time::sleep(self.ctx.retry.backoff) => false,
                        () = cancel.cancelled() => true,
                    };
                    if cancelled {
                        return self.give_up(attempt, &url, FetchError::Cancelled);
                    }
                },
                Err(e) => return self.give_up(attempt, &url, e),
            }
        }
    }

    /// One fetch + optional resize + atomic publish
    async fn attempt(&self, url: &str, destination: &Destination) -> Result<Written> {
        self.ctx.resolver.prepare(destination)?;
        let mut temp = temp_file_for(destination)?;

        let written = match &self.ctx.processor {
            None => {
                let handle = temp.as_file().try_clone().map_err(|e| {
                    FetchError::file_io_error("open temporary file", temp.path(), &e)
                })?;
                let mut file = tokio::fs::File::from_std(handle);
                let bytes = self
                    .ctx
                    .fetcher
                    .fetch_into(url, self.ctx.timeout, &mut file)
                    .await?;
                file.flush()
                    .await
                    .map_err(|e| FetchError::file_io_error("flush", temp.path(), &e))?;

                Written {
                    bytes,
                    resized: false,
                }
            },
            Some(processor) => {
                let body = self.ctx.fetcher.fetch(url, self.ctx.timeout).await?;
                let processor = *processor;
                let extension = destination.extension();

                let encoded = tokio::task::spawn_blocking(move || {
                    processor.maybe_resize(body.content, extension.as_deref())
                })
                .await
                .map_err(|e| FetchError::internal(format!("Resize task failed: {}", e)))??;

                temp.write_all(encoded.bytes())
                    .and_then(|()| temp.flush())
                    .map_err(|e| FetchError::file_io_error("write", temp.path(), &e))?;

                Written {
                    bytes: encoded.bytes().len() as u64,
                    resized: encoded.is_resized(),
                }
            },
        };

        if written.bytes == 0 {
            return Err(FetchError::transport(format!("{}: empty response body", url)));
        }

        publish(temp, destination)?;
        Ok(written)
    }

    fn give_up(&mut self, attempts: u32, url: &str, error: FetchError) -> Outcome {
        self.state = TaskState::GaveUp;
        tracing::warn!(
            image_id = %self.row.id(),
            url = %url,
            attempts,
            error = %error,
            "Giving up on image"
        );
        Outcome::GaveUpAfterRetries {
            attempts,
            last_failure: error,
        }
    }
}

/// Prefix for in-progress downloads; kept short so any valid filename fits
const TEMP_PREFIX: &str = ".dl.";

/// Temporary file in the destination directory, removed when dropped
fn temp_file_for(destination: &Destination) -> Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".part")
        .tempfile_in(destination.directory())
        .map_err(|e| FetchError::file_io_error("create temporary file", destination.directory(), &e))
}

/// Move a finished temporary file onto the destination without clobbering
fn publish(temp: NamedTempFile, destination: &Destination) -> Result<()> {
    destination.clear_incomplete()?;
    let path = destination.path();

    match temp.persist_noclobber(&path) {
        Ok(_) => Ok(()),
        // A duplicate row finished first; its file is complete and stays.
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists && destination.exists() => {
            tracing::debug!(path = %path.display(), "Destination written concurrently, keeping existing file");
            Ok(())
        },
        Err(e) => Err(FetchError::file_io_error("move into place", &path, &e.error)),
    }
}
