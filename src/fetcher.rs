//! Retrying fetch client for the sspai API.
//!
//! All transient failures (timeout, connection errors, non-2xx statuses,
//! malformed bodies) are contained here: they are retried with exponential
//! backoff and, once the budget is exhausted, collapse to an absent result.
//! Callers only ever see "data" or "absent", never a raised fault.
//!
//! # Retry strategy
//!
//! - `max_retries` attempts total, no delay before the first
//! - delay before attempt `n` is `retry_base_delay * 2^(n-1)`
//! - an application-level `error != 0` in a well-formed envelope is not
//!   retried; it is logged and surfaced as absent

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::models::FeedArticle;

const BASE_URL: &str = "https://sspai.com/api/v1";

/// One failed request attempt.
///
/// The categories stay distinct for logging, but every one of them collapses
/// to the same caller-visible outcome: absent data.
#[derive(Debug, Error)]
enum FetchFailure {
    #[error("request timed out")]
    Timeout,
    #[error("http status {0}")]
    Status(StatusCode),
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("api error code {0}")]
    Api(i64),
}

impl FetchFailure {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchFailure::Timeout
        } else {
            FetchFailure::Transport(e)
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            FetchFailure::Timeout => "timeout",
            FetchFailure::Status(_) => "status",
            FetchFailure::Transport(_) => "transport",
            FetchFailure::Decode(_) => "decode",
            FetchFailure::Api(_) => "api",
        }
    }
}

/// Every sspai response wraps its payload in `{error, data}`.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    error: i64,
    #[serde(default)]
    data: Value,
}

/// Delay before retry attempt `attempt + 1`. Pure in the attempt index so
/// the schedule is testable.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Shared HTTP client with the sspai headers and an overall per-request
/// timeout. Also used for image downloads, which skip the retry loop.
pub struct Fetcher {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl Fetcher {
    pub fn new(
        request_timeout: Duration,
        max_retries: u32,
        retry_base_delay: Duration,
    ) -> reqwest::Result<Self> {
        Self::with_base_url(BASE_URL, request_timeout, max_retries, retry_base_delay)
    }

    /// Like [`Fetcher::new`] but against an arbitrary endpoint. Used by the
    /// tests to point the client at a mock server.
    pub fn with_base_url(
        base_url: impl Into<String>,
        request_timeout: Duration,
        max_retries: u32,
        retry_base_delay: Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(default_headers())
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            max_retries,
            retry_base_delay,
        })
    }

    /// One page of feed summaries. An exhausted or failed request collapses
    /// to an empty page, which the scanner treats as the end of the feed.
    pub async fn fetch_feed_page(&self, limit: u32, offset: u32) -> Vec<FeedArticle> {
        info!(offset, limit, "fetching feed page");
        let params = [
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
            ("created_at", "0".to_string()),
        ];
        let context = format!("feed offset={offset}");
        self.request_data("/article/index/page/get", &params, &context)
            .await
            .unwrap_or_default()
    }

    /// Full detail payload for one article. The payload stays opaque here;
    /// only the parser looks inside it.
    pub async fn fetch_article_detail(&self, article_id: u64) -> Option<Value> {
        let params = [
            ("id", article_id.to_string()),
            ("view", "second".to_string()),
        ];
        let context = format!("detail article_id={article_id}");
        self.request_data("/article/info/get", &params, &context)
            .await
    }

    /// Single-attempt image download; the caller handles idempotence and
    /// failure counting.
    pub async fn fetch_image_bytes(&self, url: &str) -> reqwest::Result<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn request_data<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        context: &str,
    ) -> Option<T> {
        let url = format!("{}{}", self.base_url, path);
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                sleep(backoff_delay(self.retry_base_delay, attempt - 1)).await;
            }
            match self.try_request(&url, params).await {
                Ok(data) => return Some(data),
                Err(FetchFailure::Api(code)) => {
                    error!(context, code, "api returned an application error");
                    return None;
                }
                Err(failure) => {
                    warn!(
                        context,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        kind = failure.kind(),
                        error = %failure,
                        "request attempt failed"
                    );
                }
            }
        }
        error!(context, attempts = self.max_retries, "request exhausted retries");
        None
    }

    async fn try_request<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, FetchFailure> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(FetchFailure::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status));
        }
        let body = response.text().await.map_err(FetchFailure::from_reqwest)?;
        let envelope: ApiEnvelope = serde_json::from_str(&body)?;
        if envelope.error != 0 {
            return Err(FetchFailure::Api(envelope.error));
        }
        Ok(serde_json::from_value(envelope.data)?)
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static("Mozilla/5.0 (Windows NT 10.0; Win64; x64)"),
    );
    headers.insert(REFERER, HeaderValue::from_static("https://sspai.com/"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, image/avif, image/webp, */*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9"));
    headers
}
