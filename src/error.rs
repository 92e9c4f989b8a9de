//! Error types for dataset image downloads

use std::time::Duration;
use thiserror::Error;

/// Result type alias for download operations
pub type Result<T> = std::result::Result<T, FetchError>;

/// Error types for fetching, processing and storing dataset images
///
/// Row-level variants never escape a [`crate::task::RowTask`]; they end up inside
/// an [`crate::types::Outcome`]. `InvalidConfig` and `Csv` only occur during
/// pre-flight, before any row is dispatched.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Server answered with a non-2xx status
    #[error("HTTP status {code} for {url}")]
    HttpStatus { code: u16, url: String },

    /// Request did not complete within the fetch timeout
    #[error("Timed out after {}s fetching {url}", timeout.as_secs_f64())]
    Timeout { url: String, timeout: Duration },

    /// Connection, TLS or body-stream failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// URL has no trailing path segment with a recognized image extension
    #[error("Cannot derive an image filename from URL: {0}")]
    UnparsableFilename(String),

    /// Decoded pixel grid is neither 2-D nor 3-D with a known channel layout
    #[error("Unsupported image shape: {0}")]
    UnsupportedShape(String),

    /// Image bytes could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Resized image could not be re-encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Filesystem errors (directory creation, temp file, rename)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Dataset file could not be parsed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Run was cancelled before this row finished
    #[error("Cancelled before completion")]
    Cancelled,

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used for retry decisions and summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorClass {
    /// Timeout, connection failure or non-2xx status
    TransientNetwork,
    /// Filename cannot be derived from the URL
    UnparsableFilename,
    /// Decode, encode or shape failure for one attempt's bytes
    ImageProcessing,
    /// Cannot create a directory or write a file
    Filesystem,
    /// Everything else (configuration, cancellation, internal)
    Fatal,
}

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if another attempt could plausibly succeed
    fn is_retryable(&self) -> bool;
}

impl FetchError {
    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new encode error
    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::Encode(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Map a `reqwest` failure onto the fetch taxonomy
    pub(crate) fn from_reqwest(url: &str, timeout: Duration, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
                timeout,
            }
        } else if let Some(status) = error.status() {
            Self::HttpStatus {
                code: status.as_u16(),
                url: url.to_string(),
            }
        } else {
            Self::Transport(format!("{}: {}", url, error))
        }
    }

    /// Classify this error for retry and reporting purposes
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::HttpStatus { .. } | Self::Timeout { .. } | Self::Transport(_) => {
                ErrorClass::TransientNetwork
            },
            Self::UnparsableFilename(_) => ErrorClass::UnparsableFilename,
            Self::UnsupportedShape(_) | Self::Decode(_) | Self::Encode(_) => {
                ErrorClass::ImageProcessing
            },
            Self::Io(_) => ErrorClass::Filesystem,
            Self::Csv(_) | Self::InvalidConfig(_) | Self::Cancelled | Self::Internal(_) => {
                ErrorClass::Fatal
            },
        }
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        // A re-fetch may return different bytes, so image failures still count
        // against the attempt cap instead of ending the row.
        matches!(
            self.class(),
            ErrorClass::TransientNetwork | ErrorClass::ImageProcessing
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let timeout = FetchError::Timeout {
            url: "http://x/a.jpg".to_string(),
            timeout: Duration::from_secs(60),
        };
        assert_eq!(timeout.class(), ErrorClass::TransientNetwork);
        assert!(timeout.is_retryable());

        let status = FetchError::HttpStatus {
            code: 404,
            url: "http://x/a.jpg".to_string(),
        };
        assert!(status.is_retryable());

        let decode = FetchError::decode("bad huffman table");
        assert_eq!(decode.class(), ErrorClass::ImageProcessing);
        assert!(decode.is_retryable());
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        assert!(!FetchError::UnparsableFilename("http://x/".to_string()).is_retryable());
        assert!(!FetchError::Io(std::io::Error::other("disk full")).is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
        assert!(!FetchError::invalid_config("concurrency").is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = FetchError::HttpStatus {
            code: 503,
            url: "http://x/img.jpg".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP status 503 for http://x/img.jpg");

        let err = FetchError::Timeout {
            url: "http://x/img.jpg".to_string(),
            timeout: Duration::from_secs(60),
        };
        assert!(err.to_string().contains("60s"));
    }

    #[test]
    fn test_file_io_error_context() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = FetchError::file_io_error("create directory", "/tmp/out", &io);
        let msg = err.to_string();
        assert!(msg.contains("create directory"));
        assert!(msg.contains("/tmp/out"));
        assert_eq!(err.class(), ErrorClass::Filesystem);
    }

    #[test]
    fn test_config_value_error() {
        let err = FetchError::config_value_error("concurrency", 0, ">= 1", Some(1));
        let msg = err.to_string();
        assert!(msg.contains("concurrency"));
        assert!(msg.contains("Recommended: 1"));
    }
}
