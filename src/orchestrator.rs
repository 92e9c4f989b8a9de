//! Split-by-split driver for a whole dataset download
//!
//! Every dataset file is loaded before the first request goes out, so a
//! missing or malformed CSV aborts the run up front. Splits then run one after
//! another, each through its own worker pool rooted at `{output_dir}/{split}`.

use crate::config::DownloadConfig;
use crate::destination::DestinationResolver;
use crate::error::{FetchError, Result};
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::pool::WorkerPool;
use crate::processor::ImageProcessor;
use crate::services::progress::{NoOpProgressReporter, ProgressReporter};
use crate::source::CsvRowSource;
use crate::task::TaskContext;
use crate::tracing_config::{events, spans};
use crate::types::{Row, RunSummary, Split};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// One dataset split and the CSV file listing its rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSpec {
    pub split: Split,
    pub csv_path: PathBuf,
}

impl SplitSpec {
    pub fn new<P: Into<PathBuf>>(split: Split, csv_path: P) -> Self {
        Self {
            split,
            csv_path: csv_path.into(),
        }
    }
}

/// Runs one worker pool per split, in order
pub struct Orchestrator {
    config: DownloadConfig,
    fetcher: Arc<dyn Fetcher>,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator around an existing fetcher
    ///
    /// # Errors
    /// - Configuration fails validation
    pub fn new(config: DownloadConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            fetcher,
            reporter: Arc::new(NoOpProgressReporter),
            cancel: CancellationToken::new(),
        })
    }

    /// Create an orchestrator fetching over HTTP with the configured user agent
    ///
    /// # Errors
    /// - Configuration fails validation
    /// - HTTP client cannot be built
    pub fn with_http(config: DownloadConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.user_agent)?;
        Self::new(config, Arc::new(fetcher))
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Token that stops the run between attempts when cancelled
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download every split in order
    ///
    /// Row failures are reported in the returned summaries, never as an error.
    /// After cancellation no further split is started, so the result only
    /// holds summaries for splits that ran.
    ///
    /// # Errors
    /// - Output root cannot be created
    /// - A dataset file cannot be opened or parsed
    pub async fn run(&self, splits: &[SplitSpec]) -> Result<Vec<RunSummary>> {
        let output_dir = &self.config.output_dir;
        std::fs::create_dir_all(output_dir)
            .map_err(|e| FetchError::file_io_error("create output directory", output_dir, &e))?;

        let datasets = splits
            .iter()
            .map(|spec| CsvRowSource::from_path(&spec.csv_path).map(|source| (spec, source)))
            .collect::<Result<Vec<_>>>()?;

        let started = Instant::now();
        let mut summaries = Vec::with_capacity(datasets.len());

        for (spec, source) in datasets {
            if self.cancel.is_cancelled() {
                tracing::warn!(split = %spec.split, "Run cancelled; not starting remaining splits");
                break;
            }
            if source.skipped() > 0 {
                tracing::warn!(
                    split = %spec.split,
                    skipped = source.skipped(),
                    "Some dataset rows had no id or URL"
                );
            }
            summaries.push(self.run_split(&spec.split, source.into_rows()).await);
        }

        tracing::info!("total: {:.2}s", started.elapsed().as_secs_f64());
        Ok(summaries)
    }

    /// Download one split's rows into `{output_dir}/{split}`
    pub async fn run_split(&self, split: &Split, rows: Vec<Row>) -> RunSummary {
        let root = self.config.output_dir.join(split.dir_name());
        let resolver = DestinationResolver::new(root, self.config.layout);

        let ctx = TaskContext::new(self.fetcher.clone(), resolver)
            .with_processor(self.config.resize.map(ImageProcessor::new))
            .with_retry(self.config.retry)
            .with_timeout(self.config.timeout)
            .with_cancellation(self.cancel.clone());

        let pool = WorkerPool::new(self.config.concurrency)
            .with_label(split.dir_name())
            .with_reporter(self.reporter.clone());

        tracing::info!("download {} images", split);
        let span = spans::split_run(split.dir_name(), rows.len());
        let mut summary = pool.run(Arc::new(ctx), rows).instrument(span).await;

        summary.split = Some(split.to_string());
        events::split_finished(split.dir_name(), &summary);
        summary
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
