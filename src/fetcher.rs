//! HTTP fetching for dataset images
//!
//! A [`Fetcher`] performs exactly one GET per call and classifies failures; it
//! never retries. Retrying is the row task's job.

use crate::error::{FetchError, Result};
use crate::types::{FetchResult, FetchedBody};
use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Buffer size used while streaming a body to disk
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// One-shot HTTP GET with a timeout
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the whole body into memory
    async fn fetch(&self, url: &str, timeout: Duration) -> FetchResult;

    /// Stream the body into `writer`, returning the number of bytes written
    ///
    /// The default implementation buffers through [`Fetcher::fetch`].
    async fn fetch_into(
        &self,
        url: &str,
        timeout: Duration,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> FetchResult<u64> {
        let body = self.fetch(url, timeout).await?;
        writer
            .write_all(&body.content)
            .await
            .map_err(|e| FetchError::file_io_error("write image data", url, &e))?;
        Ok(body.content.len() as u64)
    }
}

/// `reqwest`-backed fetcher shared by all workers
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with its own connection pool
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::invalid_config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn send(&self, url: &str, timeout: Duration) -> FetchResult<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, timeout, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                code: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> FetchResult {
        tracing::debug!(url = %url, "Fetching (buffered)");
        let response = self.send(url, timeout).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let content = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, timeout, &e))?
            .to_vec();

        if content.is_empty() {
            return Err(FetchError::transport(format!("{}: empty response body", url)));
        }

        Ok(FetchedBody {
            content,
            content_type,
        })
    }

    async fn fetch_into(
        &self,
        url: &str,
        timeout: Duration,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> FetchResult<u64> {
        tracing::debug!(url = %url, "Fetching (streamed)");
        let response = self.send(url, timeout).await?;
        let total_size = response.content_length();

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; STREAM_BUFFER_SIZE];

        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| classify_stream_error(url, timeout, &e))?;

            if bytes_read == 0 {
                break;
            }

            writer
                .write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| FetchError::file_io_error("write image data", url, &e))?;

            downloaded += bytes_read as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| FetchError::file_io_error("flush image data", url, &e))?;

        if downloaded == 0 {
            return Err(FetchError::transport(format!("{}: empty response body", url)));
        }

        if let Some(total) = total_size {
            if downloaded < total {
                return Err(FetchError::transport(format!(
                    "{}: body truncated ({} of {} bytes)",
                    url, downloaded, total
                )));
            }
        }

        tracing::trace!(url = %url, bytes = downloaded, "Body streamed");
        Ok(downloaded)
    }
}

/// Body-stream errors arrive wrapped in `io::Error`; recover the timeout case
fn classify_stream_error(url: &str, timeout: Duration, error: &std::io::Error) -> FetchError {
    let timed_out = error.kind() == std::io::ErrorKind::TimedOut
        || error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
            .is_some_and(reqwest::Error::is_timeout);

    if timed_out {
        FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else {
        FetchError::transport(format!("{}: {}", url, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticFetcher(Vec<u8>);

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, _url: &str, _timeout: Duration) -> FetchResult {
            Ok(FetchedBody {
                content: self.0.clone(),
                content_type: Some("image/jpeg".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn test_default_fetch_into_writes_body() {
        let fetcher = StaticFetcher(b"abc".to_vec());
        let mut sink: Vec<u8> = Vec::new();
        let written = fetcher
            .fetch_into("http://x/a.jpg", Duration::from_secs(1), &mut sink)
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(sink, b"abc");
    }

    #[test]
    fn test_stream_timeout_classification() {
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(matches!(
            classify_stream_error("http://x/a.jpg", Duration::from_secs(1), &err),
            FetchError::Timeout { .. }
        ));

        let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            classify_stream_error("http://x/a.jpg", Duration::from_secs(1), &err),
            FetchError::Transport(_)
        ));
    }

    #[test]
    fn test_http_fetcher_creation() {
        assert!(HttpFetcher::new("openimages-dl/test").is_ok());
    }
}
