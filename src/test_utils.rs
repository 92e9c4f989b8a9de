//! Test utilities and a scripted fetcher for pipeline tests
//!
//! `MockFetcher` replays per-URL scripted responses and records every call so
//! tests can assert on attempt counts and peak concurrency without a network.

use crate::error::FetchError;
use crate::fetcher::Fetcher;
use crate::types::{FetchResult, FetchedBody};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// One scripted reply
#[derive(Debug, Clone)]
pub(crate) enum MockResponse {
    Body(Vec<u8>),
    Status(u16),
    Timeout,
    Transport,
    /// `fetch_into` writes these bytes, then the connection drops
    Partial(Vec<u8>),
}

/// Scripted `Fetcher` double
#[derive(Debug, Default)]
pub(crate) struct MockFetcher {
    scripts: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    /// Reply used once a URL's script is exhausted (or it has none)
    fallback: Option<MockResponse>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every URL without a script returns `body`
    pub(crate) fn with_default_body(mut self, body: &[u8]) -> Self {
        self.fallback = Some(MockResponse::Body(body.to_vec()));
        self
    }

    /// Every URL without a script returns `response`
    pub(crate) fn with_fallback(mut self, response: MockResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    /// Hold each call for `delay` before answering
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue responses for one URL, replayed in order
    pub(crate) fn script(self, url: &str, responses: Vec<MockResponse>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into());
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| called.as_str() == url)
            .count()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, url: &str) -> Option<MockResponse> {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.fallback.clone())
    }

    async fn respond(&self, url: &str) -> Option<MockResponse> {
        self.calls.lock().unwrap().push(url.to_string());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = self.next_response(url);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

fn into_result(url: &str, timeout: Duration, response: Option<MockResponse>) -> FetchResult {
    match response {
        Some(MockResponse::Body(content)) => Ok(FetchedBody {
            content,
            content_type: Some("image/jpeg".to_string()),
        }),
        Some(MockResponse::Status(code)) => Err(FetchError::HttpStatus {
            code,
            url: url.to_string(),
        }),
        Some(MockResponse::Timeout) => Err(FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }),
        Some(MockResponse::Transport | MockResponse::Partial(_)) | None => {
            Err(FetchError::transport(format!("{}: connection reset", url)))
        },
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> FetchResult {
        let response = self.respond(url).await;
        into_result(url, timeout, response)
    }

    async fn fetch_into(
        &self,
        url: &str,
        timeout: Duration,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> FetchResult<u64> {
        let response = self.respond(url).await;

        if let Some(MockResponse::Partial(bytes)) = &response {
            writer.write_all(bytes).await.unwrap();
            writer.flush().await.unwrap();
            return Err(FetchError::transport(format!("{}: connection reset mid-body", url)));
        }

        let body = into_result(url, timeout, response)?;
        writer.write_all(&body.content).await.unwrap();
        writer.flush().await.unwrap();
        Ok(body.content.len() as u64)
    }
}
