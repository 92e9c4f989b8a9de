//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliLayout};
use crate::config::{DownloadConfig, LayoutMode, ResizeConfig};
use crate::error::FetchError;
use anyhow::{Context, Result};
use std::time::Duration;

/// Convert CLI arguments to a `DownloadConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build DownloadConfig from CLI arguments
    pub(crate) fn from_cli(cli: &Cli) -> Result<DownloadConfig> {
        let layout = match cli.layout {
            CliLayout::Nested => LayoutMode::Nested,
            CliLayout::Flattened => LayoutMode::Flattened,
        };

        let resize = cli.resize.then_some(ResizeConfig {
            target_width: cli.target_width,
            jpeg_quality: cli.jpeg_quality,
        });

        let mut builder = DownloadConfig::builder()
            .output_dir(&cli.save_dir)
            .concurrency(cli.num_workers)
            .timeout(Duration::from_secs(cli.timeout))
            .resize(resize)
            .layout(layout)
            .max_attempts(cli.max_attempts)
            .backoff(Duration::from_secs(cli.retry_delay))
            .show_progress(!cli.no_progress);

        if let Some(user_agent) = &cli.user_agent {
            builder = builder.user_agent(user_agent);
        }

        builder.build().context("Invalid configuration")
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if cli.jpeg_quality > 100 {
            return Err(FetchError::config_value_error(
                "JPEG quality",
                cli.jpeg_quality,
                "0-100",
                Some(90),
            ))
            .context("Invalid quality settings");
        }

        if cli.target_width == 0 {
            anyhow::bail!("--target-width must be at least 1");
        }

        if cli.max_image_pixels == Some(0) {
            anyhow::bail!("--max-image-pixels must be at least 1");
        }

        if cli.train_csv == cli.validation_csv {
            log::warn!(
                "Train and validation splits read the same file: {}",
                cli.train_csv.display()
            );
        }

        Ok(())
    }
}
