#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # openimages-dl
//!
//! Concurrent, resumable bulk downloader for image datasets described by CSV
//! files, with optional downscaling.
//!
//! Each dataset row names an image id and one or more candidate URLs. Rows
//! are fetched by a bounded worker pool; every row independently resolves its
//! destination, fetches over HTTP with a timeout, optionally downscales, and
//! writes the result atomically. Transient failures are retried with a fixed
//! backoff and reported per row without aborting the batch.
//!
//! ## Features
//!
//! - **Bounded concurrency**: a fixed number of workers, one row each
//! - **Resumable**: an existing non-empty file is never fetched again
//! - **Atomic writes**: temporary file plus no-clobber rename
//! - **Downscale-only resize**: bilinear resize to a target width
//! - **Layouts**: `{split}/{id}/{file}` or `{split}/{id}____{file}`
//! - **CLI Integration**: optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use openimages_dl::{download_dataset, DownloadConfig, Split, SplitSpec};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = DownloadConfig::builder()
//!     .output_dir("data")
//!     .concurrency(16)
//!     .resize_to_width(1024)
//!     .build()?;
//!
//! let summaries = download_dataset(
//!     &config,
//!     &[
//!         SplitSpec::new(Split::Train, "train.csv"),
//!         SplitSpec::new(Split::Validation, "validation.csv"),
//!     ],
//! )
//! .await?;
//!
//! for summary in summaries {
//!     println!("{:?}: {} ok, {} failed", summary.split, summary.succeeded, summary.failed);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): Command-line interface and progress bar
//! - `webp-support` (default): WebP image format support
//! - `tracing-json`: JSON log output
//! - `tracing-files`: Log file output

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod destination;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod pool;
pub mod processor;
pub mod services;
pub mod source;
pub mod task;
pub mod tracing_config;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

// Public API exports
pub use config::{DownloadConfig, DownloadConfigBuilder, LayoutMode, ResizeConfig, RetryPolicy};
pub use destination::{url_basename, Destination, DestinationResolver};
pub use error::{ErrorClass, FetchError, IsRetryable, Result};
pub use fetcher::{Fetcher, HttpFetcher};
pub use orchestrator::{Orchestrator, SplitSpec};
pub use pool::WorkerPool;
pub use processor::{configure_max_image_pixels, max_image_pixels, ImageProcessor};
pub use services::{
    ConsoleProgressReporter, NoOpProgressReporter, ProgressReporter, ProgressUpdate, RunProgress,
};
pub use source::CsvRowSource;
pub use task::{RowTask, TaskContext, TaskState};
pub use tracing_config::{events, spans, TracingConfig, TracingFormat, TracingOutput};
pub use types::{
    EncodedImage, FetchResult, FetchedBody, Outcome, OutcomeEvent, ProcessedImage, Row,
    RunSummary, Split,
};

/// Download every split of a dataset over HTTP
///
/// Convenience wrapper around [`Orchestrator`] with no progress reporting.
/// Row failures are counted in the returned summaries, not returned as errors.
///
/// # Errors
/// - Configuration fails validation
/// - Output directory cannot be created
/// - A dataset CSV cannot be read
pub async fn download_dataset(
    config: &DownloadConfig,
    splits: &[SplitSpec],
) -> Result<Vec<RunSummary>> {
    Orchestrator::with_http(config.clone())?.run(splits).await
}
