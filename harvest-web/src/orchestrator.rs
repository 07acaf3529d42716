//! Per-request extraction flow.
//!
//! Email targets: policy check, static fetch, then a single rendered
//! fallback when the static page yields nothing. Keyword targets: optional
//! policy check, then the rendered maps search, whose outcome is final.

use std::sync::Arc;

use harvest_common::{
    BusinessRecord, EmailSet, Extraction, ExtractionResult, ExtractionTarget, HarvestError,
};
use harvest_config::HarvestConfig;
use harvest_http::HttpClient;
use url::Url;

use crate::extract::extract_emails;
use crate::fetch::{StaticFetch, StaticStrategy};
use crate::policy::{PolicyCheck, PolicyGate};
use crate::render::{RenderedFetch, RenderedStrategy};

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Consult robots.txt before email scraping.
    pub check_policy: bool,
    /// Consult robots.txt of the maps page before a keyword search.
    pub check_maps_policy: bool,
    pub maps_url: Url,
}

pub struct Orchestrator {
    policy: Arc<dyn PolicyCheck>,
    static_fetch: Arc<dyn StaticFetch>,
    rendered: Arc<dyn RenderedFetch>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        policy: Arc<dyn PolicyCheck>,
        static_fetch: Arc<dyn StaticFetch>,
        rendered: Arc<dyn RenderedFetch>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            policy,
            static_fetch,
            rendered,
            options,
        }
    }

    /// Wire the production strategies from configuration.
    pub fn from_config(config: &HarvestConfig) -> anyhow::Result<Self> {
        let proxy = config.browser.proxy.as_deref();
        let page_client = HttpClient::new(&config.http.user_agent, proxy)?
            .with_timeout(config.http.timeout())
            .with_max_body(config.http.max_body_bytes);
        let policy_client = HttpClient::new(&config.http.user_agent, proxy)?
            .with_timeout(config.policy.timeout())
            .with_max_body(config.http.max_body_bytes);
        let rendered = RenderedStrategy::from_config(config)?;
        let maps_url = Url::parse(&config.maps.url)?;

        Ok(Self::new(
            Arc::new(PolicyGate::new(policy_client, &config.policy)),
            Arc::new(StaticStrategy::new(page_client, config.http.timeout())),
            Arc::new(rendered),
            OrchestratorOptions {
                check_policy: config.policy.enabled,
                check_maps_policy: config.policy.enabled && config.maps.check_policy,
                maps_url,
            },
        ))
    }

    /// Run the flow matching `target`. Produces exactly one result.
    pub async fn run(&self, target: &ExtractionTarget) -> ExtractionResult {
        match target {
            ExtractionTarget::Url(url) => self.scrape_emails(url).await.map(Extraction::Emails),
            ExtractionTarget::Keyword(keyword) => self
                .scrape_businesses(keyword)
                .await
                .map(Extraction::Businesses),
        }
    }

    pub async fn scrape_emails(&self, target: &Url) -> Result<EmailSet, HarvestError> {
        if self.options.check_policy {
            self.ensure_allowed(target).await?;
        }

        if let Some(html) = self.static_fetch.fetch(target).await {
            let emails = parse_emails(html).await;
            if !emails.is_empty() {
                tracing::info!(
                    target: "harvest.orchestrator",
                    url = %target,
                    found = emails.len(),
                    strategy = "static",
                    "emails.extracted"
                );
                return Ok(emails);
            }
        }

        tracing::debug!(target: "harvest.orchestrator", url = %target, "emails.fallback_rendered");
        match self.rendered.render_page(target).await {
            Ok(html) => {
                let emails = parse_emails(html).await;
                tracing::info!(
                    target: "harvest.orchestrator",
                    url = %target,
                    found = emails.len(),
                    strategy = "rendered",
                    "emails.extracted"
                );
                Ok(emails)
            }
            Err(err) => {
                tracing::warn!(
                    target: "harvest.orchestrator",
                    url = %target,
                    kind = ?err.kind(),
                    error = %err,
                    "emails.rendered_failed"
                );
                Ok(EmailSet::new())
            }
        }
    }

    pub async fn scrape_businesses(&self, keyword: &str) -> Result<Vec<BusinessRecord>, HarvestError> {
        if self.options.check_maps_policy {
            self.ensure_allowed(&self.options.maps_url).await?;
        }
        let records = self.rendered.search_listings(keyword).await?;
        tracing::info!(
            target: "harvest.orchestrator",
            keyword,
            found = records.len(),
            "businesses.extracted"
        );
        Ok(records)
    }

    async fn ensure_allowed(&self, target: &Url) -> Result<(), HarvestError> {
        let decision = self.policy.check(target).await;
        if decision.allowed {
            Ok(())
        } else {
            tracing::info!(target: "harvest.orchestrator", url = %target, "policy.denied");
            Err(HarvestError::PolicyDenied(target.to_string()))
        }
    }
}

/// Parse off the async workers; large pages take real CPU time.
async fn parse_emails(html: String) -> EmailSet {
    match tokio::task::spawn_blocking(move || extract_emails(&html)).await {
        Ok(emails) => emails,
        Err(err) => {
            tracing::warn!(target: "harvest.orchestrator", error = %err, "emails.parse_failed");
            EmailSet::new()
        }
    }
}
