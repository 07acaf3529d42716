//! Static (unrendered) page retrieval.

use std::time::Duration;

use async_trait::async_trait;
use harvest_http::{HttpClient, RequestOpts};
use url::Url;

#[async_trait]
pub trait StaticFetch: Send + Sync {
    /// Fetch `target` without executing scripts.
    ///
    /// Any failure is logged and reported as `None` so the caller can fall
    /// back to another strategy.
    async fn fetch(&self, target: &Url) -> Option<String>;
}

/// Single direct GET through [`HttpClient`], no retries.
pub struct StaticStrategy {
    http: HttpClient,
    timeout: Duration,
}

impl StaticStrategy {
    pub fn new(http: HttpClient, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

#[async_trait]
impl StaticFetch for StaticStrategy {
    async fn fetch(&self, target: &Url) -> Option<String> {
        let opts = RequestOpts {
            timeout: Some(self.timeout),
            retries: Some(0),
            ..Default::default()
        };
        match self.http.get_text(target, opts).await {
            Ok(resp) => {
                tracing::debug!(
                    target: "harvest.fetch",
                    url = %resp.url,
                    status = resp.status,
                    bytes = resp.body.len(),
                    "static.fetched"
                );
                Some(resp.body)
            }
            Err(err) => {
                tracing::warn!(
                    target: "harvest.fetch",
                    url = %target,
                    status = err.status().map(|s| s.as_u16()),
                    error = %err,
                    "static.fetch_failed"
                );
                None
            }
        }
    }
}
