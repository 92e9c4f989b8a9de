//! Configuration types for dataset download runs

use crate::error::{FetchError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of concurrent row tasks (fully sequential)
pub const DEFAULT_CONCURRENCY: usize = 1;
/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default resize target width in pixels
pub const DEFAULT_TARGET_WIDTH: u32 = 1024;
/// Default number of fetch attempts per row
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default fixed delay between attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(3);
/// Default JPEG quality for re-encoded images
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// How destination files are laid out under a split directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LayoutMode {
    /// `{root}/{id}/{basename}`
    #[default]
    Nested,
    /// `{root}/{id}____{basename}`
    Flattened,
}

impl std::fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nested => write!(f, "nested"),
            Self::Flattened => write!(f, "flattened"),
        }
    }
}

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay slept before each retry
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Optional downscaling applied before an image is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeConfig {
    /// Images wider than this are downscaled to exactly this width
    pub target_width: u32,
    /// Quality used when re-encoding JPEG output (0-100)
    pub jpeg_quality: u8,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            target_width: DEFAULT_TARGET_WIDTH,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Configuration for a download run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root output directory; splits are created beneath it
    pub output_dir: PathBuf,

    /// Maximum number of rows processed at the same time
    pub concurrency: usize,

    /// Per-request timeout for a single GET
    pub timeout: Duration,

    /// Resize settings; `None` streams the original bytes to disk
    pub resize: Option<ResizeConfig>,

    /// Destination layout under each split directory
    pub layout: LayoutMode,

    /// Attempt cap and backoff
    pub retry: RetryPolicy,

    /// User-Agent header sent with every request
    pub user_agent: String,

    /// Show interactive progress (CLI only)
    pub show_progress: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            resize: None,
            layout: LayoutMode::default(),
            retry: RetryPolicy::default(),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            show_progress: true,
        }
    }
}

impl DownloadConfig {
    /// Create a new configuration builder for fluent API construction
    ///
    /// # Examples
    ///
    /// ```rust
    /// use openimages_dl::{DownloadConfig, LayoutMode};
    /// use std::time::Duration;
    ///
    /// let config = DownloadConfig::builder()
    ///     .output_dir("images")
    ///     .concurrency(8)
    ///     .timeout(Duration::from_secs(30))
    ///     .resize_to_width(640)
    ///     .layout(LayoutMode::Flattened)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(config.concurrency, 8);
    /// assert_eq!(config.resize.unwrap().target_width, 640);
    /// ```
    #[must_use]
    pub fn builder() -> DownloadConfigBuilder {
        DownloadConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Concurrency or attempt count of zero
    /// - Zero timeout
    /// - Zero resize width or JPEG quality above 100
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(FetchError::config_value_error(
                "concurrency",
                0,
                ">= 1",
                Some(DEFAULT_CONCURRENCY),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(FetchError::config_value_error(
                "max attempts",
                0,
                ">= 1",
                Some(DEFAULT_MAX_ATTEMPTS),
            ));
        }

        if self.timeout.is_zero() {
            return Err(FetchError::invalid_config(
                "Fetch timeout must be greater than zero",
            ));
        }

        if let Some(resize) = &self.resize {
            if resize.target_width == 0 {
                return Err(FetchError::config_value_error(
                    "target width",
                    0,
                    ">= 1",
                    Some(DEFAULT_TARGET_WIDTH),
                ));
            }
            if resize.jpeg_quality > 100 {
                return Err(FetchError::config_value_error(
                    "JPEG quality",
                    resize.jpeg_quality,
                    "0-100",
                    Some(DEFAULT_JPEG_QUALITY),
                ));
            }
        }

        Ok(())
    }
}

/// Builder for `DownloadConfig`
#[derive(Debug, Default)]
pub struct DownloadConfigBuilder {
    config: DownloadConfig,
}

impl DownloadConfigBuilder {
    #[must_use]
    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    #[must_use]
    pub fn concurrency(mut self, workers: usize) -> Self {
        self.config.concurrency = workers;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Enable downscaling to `width` pixels, keeping the current JPEG quality
    #[must_use]
    pub fn resize_to_width(mut self, width: u32) -> Self {
        let quality = self
            .config
            .resize
            .map_or(DEFAULT_JPEG_QUALITY, |r| r.jpeg_quality);
        self.config.resize = Some(ResizeConfig {
            target_width: width,
            jpeg_quality: quality,
        });
        self
    }

    #[must_use]
    pub fn resize(mut self, resize: Option<ResizeConfig>) -> Self {
        self.config.resize = resize;
        self
    }

    #[must_use]
    pub fn layout(mut self, layout: LayoutMode) -> Self {
        self.config.layout = layout;
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.config.retry.backoff = backoff;
        self
    }

    #[must_use]
    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn show_progress(mut self, show: bool) -> Self {
        self.config.show_progress = show;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// Returns an error if the configuration fails [`DownloadConfig::validate`]
    pub fn build(self) -> Result<DownloadConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
