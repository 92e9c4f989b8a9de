//! Dataset Image Downloader CLI Tool
//!
//! Command-line interface for downloading the train and validation splits of a
//! CSV image dataset.

use super::config::CliConfigBuilder;
use crate::{
    orchestrator::{Orchestrator, SplitSpec},
    processor::configure_max_image_pixels,
    services::create_cli_progress_reporter,
    tracing_config::{TracingConfig, TracingFormat, TracingGuard},
    types::Split,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::future::Future;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Bulk image downloader for CSV datasets
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "openimages-dl")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// CSV listing the train split
    #[arg(value_name = "TRAIN_CSV")]
    pub train_csv: PathBuf,

    /// CSV listing the validation split
    #[arg(value_name = "VALIDATION_CSV")]
    pub validation_csv: PathBuf,

    /// Output directory; `train/` and `validation/` are created inside
    #[arg(value_name = "SAVE_DIR")]
    pub save_dir: PathBuf,

    /// Number of images downloaded concurrently
    #[arg(long, visible_alias = "num_workers", default_value_t = 1)]
    pub num_workers: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Downscale images wider than --target-width
    #[arg(long)]
    pub resize: bool,

    /// Width in pixels that wider images are downscaled to
    #[arg(long, default_value_t = 1024)]
    pub target_width: u32,

    /// JPEG quality (0-100) for resized images
    #[arg(long, default_value_t = 90)]
    pub jpeg_quality: u8,

    /// Destination layout under each split directory
    #[arg(long, value_enum, default_value_t = CliLayout::Nested)]
    pub layout: CliLayout,

    /// Attempts per image before giving up
    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    /// Seconds to wait between attempts
    #[arg(long, default_value_t = 3)]
    pub retry_delay: u64,

    /// Refuse to decode images with more pixels than this
    #[arg(long, value_name = "PIXELS")]
    pub max_image_pixels: Option<u64>,

    /// User-Agent header sent with every request
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Also write logs to this file
    #[cfg(feature = "tracing-files")]
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Disable the interactive progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Print per-split summaries as JSON on stdout when done
    #[arg(long)]
    pub json_summary: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLayout {
    Nested,
    Flattened,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _tracing_guard = init_tracing(&cli).context("Failed to initialize tracing")?;

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    if let Some(limit) = cli.max_image_pixels {
        configure_max_image_pixels(limit).context("Failed to set decode pixel ceiling")?;
    }

    info!(
        "Workers: {}, timeout: {}s, layout: {}",
        config.concurrency,
        config.timeout.as_secs(),
        config.layout
    );
    if let Some(resize) = &config.resize {
        info!("Resizing images wider than {}px", resize.target_width);
    }

    let reporter = create_cli_progress_reporter(config.show_progress, cli.verbose > 0);
    let orchestrator = Orchestrator::with_http(config)
        .context("Failed to create downloader")?
        .with_reporter(reporter);

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, cancel).await {
            warn!("Interrupted again; exiting without waiting for in-flight downloads");
            std::process::exit(EXIT_INTERRUPTED);
        }
    });

    let splits = [
        SplitSpec::new(Split::Train, &cli.train_csv),
        SplitSpec::new(Split::Validation, &cli.validation_csv),
    ];
    let summaries = orchestrator
        .run(&splits)
        .await
        .context("Download run failed")?;

    if cli.json_summary {
        let json =
            serde_json::to_string_pretty(&summaries).context("Failed to serialize summary")?;
        println!("{}", json);
    }

    Ok(())
}

/// Conventional exit status for termination by SIGINT
const EXIT_INTERRUPTED: i32 = 130;

/// Cancel the run on the first interrupt
///
/// Returns `true` once a second interrupt arrives, `false` if the signal
/// source fails.
async fn watch_interrupts<S, F>(mut next_interrupt: S, cancel: CancellationToken) -> bool
where
    S: FnMut() -> F,
    F: Future<Output = std::io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    warn!("Interrupted; stopping after in-flight attempts (press Ctrl-C again to exit now)");
    cancel.cancel();

    next_interrupt().await.is_ok()
}

/// Initialize tracing from the verbosity, format and log file flags
fn init_tracing(cli: &Cli) -> Result<TracingGuard> {
    let format = match cli.log_format {
        CliLogFormat::Console => TracingFormat::Console,
        CliLogFormat::Compact => TracingFormat::Compact,
        #[cfg(feature = "tracing-json")]
        CliLogFormat::Json => TracingFormat::Json,
    };

    let mut config = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format)
        .with_session_id(uuid::Uuid::new_v4().to_string());

    if let Ok(filter) = std::env::var("RUST_LOG") {
        config = config.with_env_filter(filter);
    }

    #[cfg(feature = "tracing-files")]
    if let Some(path) = &cli.log_file {
        config = config.with_output(crate::tracing_config::TracingOutput::Both(path.clone()));
    }

    config.init()
}
