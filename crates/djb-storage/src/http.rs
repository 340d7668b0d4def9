//! Retrying HTTP fetch shared by every plain-HTTP adapter.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};

pub const DEFAULT_USER_AGENT: &str = "djb-ingest/0.1 (+https://github.com/djb/design-job-board)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl BackoffPolicy {
    /// No retries at all; each request gets exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Ceiling on one call, retries and backoff included; callers may
    /// shorten it per request.
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// One outbound GET.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            timeout: None,
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("malformed payload from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("invalid request header {0}")]
    InvalidHeader(String),
    #[error("run budget exhausted before {url}")]
    Cancelled { url: String },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    default_timeout: Duration,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(user_agent)
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            default_timeout: config.timeout,
            backoff: config.backoff,
        })
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    fn header_map(request: &FetchRequest) -> Result<HeaderMap, FetchError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| FetchError::InvalidHeader(name.clone()))?;
            let value =
                HeaderValue::from_str(value).map_err(|_| FetchError::InvalidHeader(name.to_string()))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    pub async fn fetch_bytes(
        &self,
        source_id: &str,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source = source_id, url = %request.url);
        self.fetch_with_retries(request).instrument(span).await
    }

    async fn fetch_with_retries(&self, request: &FetchRequest) -> Result<FetchedResponse, FetchError> {
        let headers = Self::header_map(request)?;
        let timeout = request
            .timeout
            .unwrap_or(self.default_timeout)
            .min(self.default_timeout);
        let deadline = Instant::now() + timeout;

        let mut attempt = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(attempt, "deadline passed before next attempt");
                return Err(FetchError::Timeout {
                    url: request.url.clone(),
                });
            }
            let sent = self
                .client
                .get(&request.url)
                .query(&request.query)
                .headers(headers.clone())
                .timeout(remaining)
                .send()
                .await;

            match sent {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await.map_err(|err| {
                            if err.is_timeout() {
                                FetchError::Timeout {
                                    url: final_url.clone(),
                                }
                            } else {
                                FetchError::Request(err)
                            }
                        })?;
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body: body.to_vec(),
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(status = status.as_u16(), attempt, "retrying after status");
                    } else {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err, attempt, "retrying after transport error");
                    } else if err.is_timeout() {
                        return Err(FetchError::Timeout {
                            url: request.url.clone(),
                        });
                    } else {
                        return Err(FetchError::Request(err));
                    }
                }
            }

            let pause = self.backoff.delay_for_attempt(attempt);
            tokio::time::sleep_until(deadline.min(Instant::now() + pause)).await;
            attempt += 1;
        }
    }

    pub async fn get_text(&self, source_id: &str, request: &FetchRequest) -> Result<String, FetchError> {
        Ok(self.fetch_bytes(source_id, request).await?.text())
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        source_id: &str,
        request: &FetchRequest,
    ) -> Result<T, FetchError> {
        let response = self.fetch_bytes(source_id, request).await?;
        serde_json::from_slice(&response.body).map_err(|err| FetchError::Decode {
            url: response.final_url,
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::routing::get;
    use axum::{Json, Router};

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn only_server_errors_and_throttling_retry() {
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), RetryDisposition::NonRetryable);
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        format!("http://{addr}")
    }

    fn fast_fetcher(max_retries: usize) -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            user_agent: None,
            backoff: BackoffPolicy {
                max_retries,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
        })
        .expect("fetcher")
    }

    #[tokio::test]
    async fn retries_transient_status_then_decodes_json() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/flaky",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(axum::http::StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(serde_json::json!({"ok": true})))
                    }
                }),
            )
            .with_state(hits.clone());
        let base = serve(router).await;

        let value: serde_json::Value = fast_fetcher(2)
            .get_json("test", &FetchRequest::get(format!("{base}/flaky")))
            .await
            .expect("json after retry");
        assert_eq!(value["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried_and_bad_json_is_a_decode_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/missing",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    axum::http::StatusCode::NOT_FOUND
                }),
            )
            .route("/garbage", get(|| async { "not json" }))
            .with_state(hits.clone());
        let base = serve(router).await;
        let fetcher = fast_fetcher(3);

        let err = fetcher
            .get_text("test", &FetchRequest::get(format!("{base}/missing")))
            .await
            .expect_err("404");
        assert_eq!(err.status(), Some(404));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let err = fetcher
            .get_json::<serde_json::Value>("test", &FetchRequest::get(format!("{base}/garbage")))
            .await
            .expect_err("decode");
        assert!(matches!(err, FetchError::Decode { .. }));
    }

    #[tokio::test]
    async fn retries_share_one_deadline() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/slow",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    axum::http::StatusCode::SERVICE_UNAVAILABLE
                }),
            )
            .with_state(hits.clone());
        let base = serve(router).await;

        let started = std::time::Instant::now();
        let err = fast_fetcher(5)
            .get_text(
                "test",
                &FetchRequest::get(format!("{base}/slow")).timeout(Duration::from_millis(200)),
            )
            .await
            .expect_err("deadline");
        assert!(matches!(err, FetchError::Timeout { .. }), "{err:?}");
        assert!(started.elapsed() < Duration::from_millis(600));
        assert!(hits.load(Ordering::SeqCst) <= 2);
    }
}
