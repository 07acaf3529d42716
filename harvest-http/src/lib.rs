//! Minimal outbound HTTP client for page and policy-file retrieval.
//!
//! - Absolute-URL `GET` returning the decoded body plus final status
//! - Per-request timeout and retry budget (429/5xx and transport failures)
//! - Browser-like default headers and an optional outbound proxy
//! - Optional *raw* request/response logging via `HARVEST_HTTP_RAW=1`
//!
//! Example (no_run):
//! ```rust
//! # async fn demo() -> Result<(), harvest_http::HttpError> {
//! let client = harvest_http::HttpClient::new("harvest-test/1.0", None)?;
//! let url = url::Url::parse("https://example.com/").unwrap();
//! let page = client
//!     .get_text(&url, harvest_http::RequestOpts::default())
//!     .await?;
//! assert!(page.status < 300);
//! # Ok(()) }
//! ```
//!
//! Observability: `tracing` events are emitted for request start, response
//! headers, body snippets (truncated), retries and final errors. Raw lines
//! go to target `http.raw`.

use futures::StreamExt;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Proxy, StatusCode};
use std::env;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use url::Url;
use uuid::Uuid;

const RAW_ENV: &str = "HARVEST_HTTP_RAW";
const RAW_MAX_BODY: usize = 64 * 1024;
const SNIPPET_MAX: usize = 500;
const DEFAULT_MAX_BODY: usize = 8 * 1024 * 1024;

fn raw_enabled() -> bool {
    matches!(
        env::var(RAW_ENV).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

/// Render a best-effort curl command for repro/debug. Query strings are
/// omitted so tokens embedded in target URLs never reach the logs.
fn make_curl(url: &Url, headers: &HeaderMap) -> String {
    let mut parts = vec!["curl".to_string(), "-XGET".to_string()];
    for (name, val) in headers.iter() {
        let v = val.to_str().unwrap_or("");
        parts.push(format!(
            "-H '{}: {}'",
            name.as_str(),
            v.replace('\'', r"'\''")
        ));
    }
    let mut bare = url.clone();
    bare.set_query(None);
    parts.push(format!("'{}'", bare.as_str()));
    parts.join(" ")
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid URL: {0}")]
    Url(String),
    #[error("client build failed: {0}")]
    Build(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("response body exceeded {0} bytes")]
    BodyTooLarge(usize),
    #[error("server returned error {status}: {message}")]
    Api { status: StatusCode, message: String },
}

impl HttpError {
    /// HTTP status for [`HttpError::Api`], `None` for transport failures.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Per-request tuning knobs.
///
/// ```
/// use harvest_http::RequestOpts;
/// use std::time::Duration;
///
/// let opts = RequestOpts {
///     timeout: Some(Duration::from_secs(3)),
///     ..Default::default()
/// };
/// assert_eq!(opts.retries, None);
/// ```
#[derive(Clone, Debug, Default)]
pub struct RequestOpts {
    pub timeout: Option<Duration>,
    pub retries: Option<usize>,
    pub headers: Option<HeaderMap>,
}

/// A successfully retrieved text body.
#[derive(Clone, Debug)]
pub struct TextResponse {
    pub status: u16,
    /// URL after redirects.
    pub url: Url,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
    pub default_timeout: Duration,
    pub max_retries: usize,
    /// Bodies longer than this are abandoned mid-stream.
    pub max_body_bytes: usize,
}

impl HttpClient {
    /// Build a client with browser-like headers and an optional proxy.
    ///
    /// ```no_run
    /// use harvest_http::{HttpClient, HttpError};
    /// use std::time::Duration;
    ///
    /// let client = HttpClient::new("harvest/0.1", Some("http://127.0.0.1:3128"))?;
    /// assert_eq!(client.default_timeout, Duration::from_secs(10));
    /// assert_eq!(client.max_retries, 0);
    /// # Ok::<(), HttpError>(())
    /// ```
    pub fn new(user_agent: &str, proxy: Option<&str>) -> Result<Self, HttpError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5));
        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy).map_err(|e| HttpError::Build(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let inner = builder
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;

        Ok(Self {
            inner,
            default_timeout: Duration::from_secs(10),
            max_retries: 0,
            max_body_bytes: DEFAULT_MAX_BODY,
        })
    }

    pub fn with_timeout(mut self, dur: Duration) -> Self {
        self.default_timeout = dur;
        self
    }

    pub fn with_retries(mut self, n: usize) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_max_body(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// GET an absolute URL and decode the body as text.
    ///
    /// Non-2xx responses become [`HttpError::Api`] carrying the status.
    pub async fn get_text(&self, url: &Url, opts: RequestOpts) -> Result<TextResponse, HttpError> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(HttpError::Url(format!("unsupported scheme {other:?}"))),
        }

        let mut attempt = 0usize;
        let max_retries = opts.retries.unwrap_or(self.max_retries);
        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let req_id = Uuid::new_v4().simple().to_string();

        loop {
            let mut rb = self.inner.get(url.clone()).timeout(timeout);
            if let Some(hdrs) = &opts.headers {
                rb = rb.headers(hdrs.clone());
            }

            tracing::debug!(
                req_id=%req_id,
                attempt=attempt + 1,
                max_retries,
                host_path=%format!("{}{}", url.host_str().unwrap_or("-"), url.path()),
                timeout_ms=timeout.as_millis() as u64,
                "http.request.start"
            );
            if raw_enabled() {
                let curl = make_curl(url, opts.headers.as_ref().unwrap_or(&HeaderMap::new()));
                tracing::debug!(target: "http.raw", %req_id, %curl, "request");
            }

            let t0 = std::time::Instant::now();
            let resp = match rb.send().await {
                Ok(resp) => resp,
                Err(err) => {
                    let failure = classify(&err, timeout);
                    if attempt < max_retries {
                        attempt += 1;
                        let delay = backoff(attempt);
                        tracing::warn!(
                            req_id=%req_id,
                            attempt,
                            max_retries,
                            backoff_ms=delay.as_millis() as u64,
                            message=%failure,
                            "http.retrying.network_send"
                        );
                        sleep(delay).await;
                        continue;
                    }
                    tracing::warn!(req_id=%req_id, attempt, message=%failure, "http.network_error.send");
                    return Err(failure);
                }
            };

            let status = resp.status();
            let final_url = resp.url().clone();
            let headers = resp.headers().clone();
            let bytes = match read_capped(resp, self.max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(BodyError::TooLarge) => {
                    tracing::warn!(
                        req_id=%req_id,
                        %status,
                        limit=self.max_body_bytes,
                        "http.body_too_large"
                    );
                    return Err(HttpError::BodyTooLarge(self.max_body_bytes));
                }
                Err(BodyError::Transport(err)) => {
                    let failure = classify(&err, timeout);
                    if attempt < max_retries {
                        attempt += 1;
                        let delay = backoff(attempt);
                        tracing::warn!(
                            req_id=%req_id,
                            attempt,
                            max_retries,
                            backoff_ms=delay.as_millis() as u64,
                            message=%failure,
                            "http.retrying.network_body"
                        );
                        sleep(delay).await;
                        continue;
                    }
                    tracing::warn!(req_id=%req_id, attempt, message=%failure, "http.network_error.body");
                    return Err(failure);
                }
            };
            let dur_ms = t0.elapsed().as_millis() as u64;
            let content_type = headers
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            tracing::debug!(
                req_id=%req_id,
                %status,
                duration_ms=dur_ms,
                body_len=bytes.len(),
                content_type=?content_type,
                final_url=%final_url,
                "http.response.headers"
            );

            if raw_enabled() {
                let truncated = bytes.len() > RAW_MAX_BODY;
                let body_snip = &bytes[..bytes.len().min(RAW_MAX_BODY)];
                tracing::info!(
                    target: "http.raw",
                    %req_id,
                    status=%status,
                    duration_ms=dur_ms,
                    body=%String::from_utf8_lossy(body_snip),
                    truncated
                );
            }

            if status.is_success() {
                return Ok(TextResponse {
                    status: status.as_u16(),
                    url: final_url,
                    content_type,
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }

            let snippet = snip_body(&bytes);
            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt < max_retries {
                attempt += 1;
                let delay = retry_after_delay_secs(&headers)
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| backoff(attempt));
                tracing::warn!(
                    req_id=%req_id,
                    %status,
                    attempt,
                    max_retries,
                    backoff_ms=delay.as_millis() as u64,
                    "http.retrying"
                );
                sleep(delay).await;
                continue;
            }

            tracing::debug!(req_id=%req_id, %status, body_snippet=%snippet, "http.error");
            return Err(HttpError::Api {
                status,
                message: snippet,
            });
        }
    }
}

enum BodyError {
    TooLarge,
    Transport(reqwest::Error),
}

/// Stream the body, giving up as soon as it grows past `limit`.
async fn read_capped(resp: reqwest::Response, limit: usize) -> Result<Vec<u8>, BodyError> {
    if resp.content_length().is_some_and(|len| len > limit as u64) {
        return Err(BodyError::TooLarge);
    }
    let mut body = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyError::Transport)?;
        if body.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn classify(err: &reqwest::Error, timeout: Duration) -> HttpError {
    if err.is_timeout() {
        HttpError::Timeout(timeout)
    } else {
        HttpError::Network(err.to_string())
    }
}

fn backoff(attempt: usize) -> Duration {
    let shift = attempt.saturating_sub(1).min(6) as u32;
    Duration::from_millis(200u64.saturating_mul(1 << shift))
}

fn retry_after_delay_secs(h: &HeaderMap) -> Option<u64> {
    h.get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())?
        .parse()
        .ok()
}

fn snip_body(body: &[u8]) -> String {
    let mut snip = String::from_utf8_lossy(body).to_string();
    if snip.len() > SNIPPET_MAX {
        let mut cut = SNIPPET_MAX;
        while !snip.is_char_boundary(cut) {
            cut -= 1;
        }
        snip.truncate(cut);
        snip.push_str("...");
    }
    snip
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curl_omits_query() {
        let url = Url::parse("https://example.com/a?token=secret").unwrap();
        let curl = make_curl(&url, &HeaderMap::new());
        assert!(!curl.contains("secret"));
        assert!(curl.ends_with("'https://example.com/a'"));
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        let body = "é".repeat(400);
        let snip = snip_body(body.as_bytes());
        assert!(snip.ends_with("..."));
        assert!(snip.len() <= SNIPPET_MAX + 3);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff(1), Duration::from_millis(200));
        assert_eq!(backoff(2), Duration::from_millis(400));
        assert_eq!(backoff(50), Duration::from_millis(200 * 64));
    }
}
