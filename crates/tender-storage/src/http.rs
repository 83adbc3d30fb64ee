//! Outbound page fetching for feeds, listing pages and hub pages.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{AcquireError, Semaphore};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const DEFAULT_USER_AGENT: &str = "TenderIntel/1.0 (+https://github.com/tender-intel)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Worth trying again on the next scheduled run.
    NextRun,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::NextRun
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {timeout:?} fetching {url}")]
    Timeout { url: String, timeout: Duration },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetcher is shut down")]
    Closed(#[from] AcquireError),
}

impl FetchError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            FetchError::Timeout { .. } => RetryDisposition::NextRun,
            FetchError::Request(err) if err.is_timeout() || err.is_connect() => {
                RetryDisposition::NextRun
            }
            FetchError::Request(_) => RetryDisposition::NonRetryable,
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
            FetchError::Closed(_) => RetryDisposition::NonRetryable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub final_url: String,
    pub body: String,
}

/// Source of page bodies. The HTTP implementation is used in production,
/// [`StaticFetcher`] in tests and offline runs.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
        timeout: Duration,
    ) -> Result<FetchedPage, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub concurrency: usize,
    /// Upper bound applied at the client level; callers pass tighter per-call timeouts.
    pub max_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            concurrency: 4,
            max_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    limit: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.max_timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
        })
    }

    async fn fetch_inner(&self, url: &str, timeout: Duration) -> Result<FetchedPage, FetchError> {
        let _permit = self.limit.acquire().await?;
        let send = self.client.get(url).timeout(timeout).send();
        let resp = match tokio::time::timeout(timeout, send).await {
            Ok(result) => result.map_err(|err| {
                if err.is_timeout() {
                    FetchError::Timeout {
                        url: url.to_string(),
                        timeout,
                    }
                } else {
                    FetchError::Request(err)
                }
            })?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    timeout,
                })
            }
        };

        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp.text().await?;
        debug!(bytes = body.len(), status = status.as_u16(), "fetched page");
        Ok(FetchedPage {
            status: status.as_u16(),
            final_url,
            body,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_text(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
        timeout: Duration,
    ) -> Result<FetchedPage, FetchError> {
        let span = info_span!("http_fetch", %run_id, source_id, url);
        self.fetch_inner(url, timeout).instrument(span).await
    }
}

#[derive(Debug, Clone)]
enum StaticResponse {
    Body(String),
    Status(u16),
    Timeout,
}

/// In-process fetcher serving canned bodies by URL. Unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    responses: Mutex<HashMap<String, StaticResponse>>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.set_page(url, body);
        self
    }

    pub fn with_status(self, url: impl Into<String>, status: u16) -> Self {
        self.lock_responses()
            .insert(url.into(), StaticResponse::Status(status));
        self
    }

    pub fn with_timeout(self, url: impl Into<String>) -> Self {
        self.lock_responses().insert(url.into(), StaticResponse::Timeout);
        self
    }

    /// Replaces the body served for `url`.
    pub fn set_page(&self, url: impl Into<String>, body: impl Into<String>) {
        self.lock_responses()
            .insert(url.into(), StaticResponse::Body(body.into()));
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<'_, HashMap<String, StaticResponse>> {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch_text(
        &self,
        _run_id: Uuid,
        _source_id: &str,
        url: &str,
        timeout: Duration,
    ) -> Result<FetchedPage, FetchError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(url.to_string());

        let response = self.lock_responses().get(url).cloned();
        match response {
            Some(StaticResponse::Body(body)) => Ok(FetchedPage {
                status: 200,
                final_url: url.to_string(),
                body,
            }),
            Some(StaticResponse::Status(status)) => Err(FetchError::HttpStatus {
                status,
                url: url.to_string(),
            }),
            Some(StaticResponse::Timeout) => Err(FetchError::Timeout {
                url: url.to_string(),
                timeout,
            }),
            None => Err(FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_wait_for_next_run() {
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::NextRun
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::NextRun
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }

    #[tokio::test]
    async fn static_fetcher_serves_bodies_and_failures() {
        let fetcher = StaticFetcher::new()
            .with_page("https://a.example/feed.xml", "<rss/>")
            .with_status("https://b.example/feed.xml", 503)
            .with_timeout("https://c.example/feed.xml");
        let run_id = Uuid::new_v4();
        let timeout = Duration::from_secs(15);

        let page = fetcher
            .fetch_text(run_id, "a", "https://a.example/feed.xml", timeout)
            .await
            .expect("page");
        assert_eq!(page.body, "<rss/>");

        let err = fetcher
            .fetch_text(run_id, "b", "https://b.example/feed.xml", timeout)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
        assert_eq!(err.disposition(), RetryDisposition::NextRun);

        let err = fetcher
            .fetch_text(run_id, "c", "https://c.example/feed.xml", timeout)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));

        let err = fetcher
            .fetch_text(run_id, "d", "https://d.example/", timeout)
            .await
            .unwrap_err();
        assert_eq!(err.disposition(), RetryDisposition::NonRetryable);
        assert_eq!(fetcher.requests().len(), 4);
    }

    #[tokio::test]
    async fn closed_limiter_is_an_error_not_a_panic() {
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).expect("client");
        fetcher.limit.close();

        let err = fetcher
            .fetch_text(Uuid::new_v4(), "a", "http://127.0.0.1:9/feed.xml", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Closed(_)));
        assert_eq!(err.disposition(), RetryDisposition::NonRetryable);
    }
}
