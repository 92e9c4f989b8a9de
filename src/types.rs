//! Core data types shared across the download pipeline

use crate::error::FetchError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One dataset record identifying an image to fetch
///
/// Candidate URLs are kept in priority order; the first one that yields a
/// usable destination filename wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    id: String,
    urls: Vec<String>,
}

impl Row {
    /// Create a row with a single candidate URL
    pub fn new<I: Into<String>, U: Into<String>>(id: I, primary_url: U) -> Self {
        Self::with_fallback(id, primary_url, None::<String>)
    }

    /// Create a row with an optional fallback URL
    ///
    /// Empty or whitespace-only URLs are not candidates, so a row whose primary
    /// cell is blank falls back to the second URL.
    pub fn with_fallback<I, U, F>(id: I, primary_url: U, fallback_url: Option<F>) -> Self
    where
        I: Into<String>,
        U: Into<String>,
        F: Into<String>,
    {
        let urls = std::iter::once(primary_url.into())
            .chain(fallback_url.map(Into::into))
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();

        Self {
            id: id.into(),
            urls,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All candidate URLs in priority order
    #[must_use]
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    #[must_use]
    pub fn primary_url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }

    #[must_use]
    pub fn fallback_url(&self) -> Option<&str> {
        self.urls.get(1).map(String::as_str)
    }
}

/// Named partition of a dataset processed as an independent batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Split {
    Train,
    Validation,
    /// Any other partition name (used as the directory name as-is)
    Other(String),
}

impl Split {
    /// Directory name under the output root
    #[must_use]
    pub fn dir_name(&self) -> &str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Successful HTTP response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBody {
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

/// Outcome of a fetch call: body bytes or a classified failure
pub type FetchResult<T = FetchedBody> = Result<T, FetchError>;

/// Decoded-and-resized image ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Byte length of the source buffer before resizing
    pub original_len: usize,
    /// Re-encoded image bytes
    pub encoded: Vec<u8>,
}

/// Bytes to be written to a destination, with how they were produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedImage {
    /// Source bytes passed through unchanged (no resize requested or needed)
    Original(Vec<u8>),
    /// Source was wider than the target width and has been downscaled
    Resized(ProcessedImage),
}

impl EncodedImage {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Original(bytes) => bytes,
            Self::Resized(image) => &image.encoded,
        }
    }

    #[must_use]
    pub fn is_resized(&self) -> bool {
        matches!(self, Self::Resized(_))
    }
}

/// Terminal per-row result
#[derive(Debug)]
pub enum Outcome {
    /// Image fetched and written to `path`
    Success {
        path: PathBuf,
        bytes_written: u64,
        attempts: u32,
        resized: bool,
    },
    /// Destination already existed with nonzero size; nothing was fetched
    SkippedAlreadyDone { path: PathBuf },
    /// Every attempt failed, or the failure was permanent
    GaveUpAfterRetries {
        attempts: u32,
        last_failure: FetchError,
    },
}

impl Outcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::SkippedAlreadyDone { .. })
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::GaveUpAfterRetries { .. })
    }
}

/// One finished row, as seen by progress reporters
#[derive(Debug)]
pub struct OutcomeEvent {
    pub row: Row,
    pub outcome: Outcome,
}

/// Aggregated result of one worker pool run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Split label, when the run belongs to one
    pub split: Option<String>,
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Rows that failed, as `(id, reason)` pairs
    pub failures: Vec<(String, String)>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
}

impl RunSummary {
    /// Create an empty summary for `total` rows
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            split: None,
            total,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            failures: Vec::new(),
            started_at: chrono::Utc::now(),
            elapsed: Duration::ZERO,
        }
    }

    /// Count one terminal outcome
    pub fn record(&mut self, row: &Row, outcome: &Outcome) {
        match outcome {
            Outcome::Success { .. } => self.succeeded += 1,
            Outcome::SkippedAlreadyDone { .. } => self.skipped += 1,
            Outcome::GaveUpAfterRetries { last_failure, .. } => {
                self.failed += 1;
                self.failures
                    .push((row.id().to_string(), last_failure.to_string()));
            },
        }
    }

    /// Number of rows that reached a terminal state
    #[must_use]
    pub fn completed(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
