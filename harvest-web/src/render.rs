//! Rendered (browser) retrieval.
//!
//! Every call launches its own session and closes it on every exit path,
//! including timeouts and panics inside the session work.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::FutureExt;
use harvest_common::{BusinessRecord, HarvestError};
use harvest_config::{BrowserConfig, HarvestConfig, MapsConfig, MapsSelectors};
use harvest_drivers::harvest_browser::behavioral::BehavioralEngine;
use tokio::time::{sleep, timeout};
use url::Url;

use crate::browser::{BrowserLauncher, BrowserSession, FantocciniLauncher};
use crate::extract::{extract_businesses, BusinessSelectors};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait RenderedFetch: Send + Sync {
    /// Rendered markup of `target` once the page has gone quiet.
    async fn render_page(&self, target: &Url) -> Result<String, HarvestError>;

    /// Submit `keyword` to the maps page and collect the listed businesses.
    async fn search_listings(&self, keyword: &str) -> Result<Vec<BusinessRecord>, HarvestError>;
}

/// Budgets and block detection shared by every rendered call.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub launch_timeout: Duration,
    pub navigation_timeout: Duration,
    pub idle_timeout: Duration,
    pub attempt_timeout: Duration,
    pub block_markers: Vec<String>,
}

impl RenderSettings {
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            launch_timeout: config.launch_timeout(),
            navigation_timeout: config.navigation_timeout(),
            idle_timeout: config.idle_timeout(),
            attempt_timeout: config.attempt_timeout(),
            block_markers: config.block_markers.clone(),
        }
    }
}

/// Maps search flow: page, budgets, scrolling and selectors.
#[derive(Debug, Clone)]
pub struct MapsSettings {
    pub url: Url,
    pub navigation_timeout: Duration,
    pub results_timeout: Duration,
    pub attempt_timeout: Duration,
    pub scroll_rounds: u32,
    pub scroll_step_px: i64,
    pub pause_min_ms: u64,
    pub pause_max_ms: u64,
    pub card_settle: Duration,
    pub selectors: MapsSelectors,
}

impl MapsSettings {
    pub fn from_config(config: &MapsConfig) -> anyhow::Result<Self> {
        let url = Url::parse(&config.url)
            .with_context(|| format!("invalid maps.url {:?}", config.url))?;
        Ok(Self {
            url,
            navigation_timeout: config.navigation_timeout(),
            results_timeout: config.results_timeout(),
            attempt_timeout: config.attempt_timeout(),
            scroll_rounds: config.scroll_rounds,
            scroll_step_px: config.scroll_step_px,
            pause_min_ms: config.pause_min_ms,
            pause_max_ms: config.pause_max_ms,
            card_settle: config.card_settle(),
            selectors: config.selectors.clone(),
        })
    }
}

pub struct RenderedStrategy {
    launcher: Arc<dyn BrowserLauncher>,
    render: RenderSettings,
    maps: MapsSettings,
}

impl RenderedStrategy {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, render: RenderSettings, maps: MapsSettings) -> Self {
        Self {
            launcher,
            render,
            maps,
        }
    }

    /// Strategy backed by chromedriver sessions.
    pub fn from_config(config: &HarvestConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            Arc::new(FantocciniLauncher::from_config(&config.browser)),
            RenderSettings::from_config(&config.browser),
            MapsSettings::from_config(&config.maps)?,
        ))
    }

    async fn acquire(&self) -> Result<SessionGuard, HarvestError> {
        let launch = async {
            self.launcher
                .launch()
                .await
                .map_err(|e| HarvestError::FetchFailed(format!("browser launch failed: {e:#}")))
        };
        let session = guarded(self.render.launch_timeout, "browser launch", launch).await?;
        tracing::debug!(target: "harvest.render", "render.session_opened");
        Ok(SessionGuard {
            session: Some(session),
        })
    }

    /// Navigate, wait for quiescence, and reject error statuses and block pages.
    async fn load_page(
        &self,
        session: &mut dyn BrowserSession,
        url: &Url,
        navigation_timeout: Duration,
    ) -> Result<(), HarvestError> {
        let status = bounded(navigation_timeout, "navigation", session.goto(url)).await?;
        if let Some(status) = status.filter(|s| *s >= 400) {
            return Err(HarvestError::FetchFailed(format!("{url} answered HTTP {status}")));
        }

        bounded(self.render.idle_timeout, "network idle", session.wait_for_network_idle()).await?;

        let landed = bounded(navigation_timeout, "current url", session.current_url()).await?;
        if let Some(marker) = block_marker(&self.render.block_markers, url.as_str(), &landed) {
            tracing::warn!(
                target: "harvest.render",
                requested = %url,
                %landed,
                marker,
                "render.blocked"
            );
            return Err(HarvestError::Blocked(format!("redirected to {landed}")));
        }
        Ok(())
    }

    async fn collect_page(
        &self,
        session: &mut dyn BrowserSession,
        target: &Url,
    ) -> Result<String, HarvestError> {
        self.load_page(session, target, self.render.navigation_timeout)
            .await?;
        bounded(self.render.navigation_timeout, "page content", session.content()).await
    }

    async fn collect_listings(
        &self,
        session: &mut dyn BrowserSession,
        keyword: &str,
        fields: &Arc<BusinessSelectors>,
    ) -> Result<Vec<BusinessRecord>, HarvestError> {
        let maps = &self.maps;
        let sel = &maps.selectors;
        self.load_page(session, &maps.url, maps.navigation_timeout)
            .await?;

        let typed = bounded(
            maps.navigation_timeout,
            "search input",
            session.type_into(&sel.search_input, keyword),
        )
        .await?;
        if !typed {
            return Err(HarvestError::ControlNotFound(format!(
                "search input {:?}",
                sel.search_input
            )));
        }
        let submitted = bounded(
            maps.navigation_timeout,
            "search button",
            session.click(&sel.search_button),
        )
        .await?;
        if !submitted {
            return Err(HarvestError::ControlNotFound(format!(
                "search button {:?}",
                sel.search_button
            )));
        }
        bounded(
            maps.results_timeout,
            "first result card",
            session.wait_for(&sel.result_card),
        )
        .await?;

        let rounds = maps.scroll_rounds.max(1);
        let mut records = Vec::new();
        let mut processed = 0usize;
        for round in 1..=rounds {
            let visible = bounded(
                maps.results_timeout,
                "result cards",
                session.count(&sel.result_card),
            )
            .await?;

            let mut cards = Vec::with_capacity(visible.saturating_sub(processed));
            for index in processed..visible {
                cards.push(self.open_card(session, index).await);
            }
            processed = processed.max(visible);

            let selectors = Arc::clone(fields);
            let batch = tokio::task::spawn_blocking(move || extract_businesses(cards, &selectors))
                .await
                .map_err(|e| HarvestError::FetchFailed(format!("card parsing: {e}")))?;
            tracing::debug!(
                target: "harvest.render",
                round,
                visible,
                extracted = batch.records.len(),
                skipped = batch.skipped.len(),
                "maps.round"
            );
            records.extend(batch.records);

            if round == rounds {
                break;
            }
            let scrolled = bounded(
                maps.results_timeout,
                "results scroll",
                session.scroll_by(&sel.results_panel, maps.scroll_step_px),
            )
            .await?;
            if !scrolled {
                tracing::debug!(target: "harvest.render", panel = %sel.results_panel, "maps.panel_missing");
            }
            sleep(BehavioralEngine::pick(maps.pause_min_ms, maps.pause_max_ms)).await;
        }
        Ok(records)
    }

    /// Select the `index`-th card and return the page showing its details.
    async fn open_card(
        &self,
        session: &mut dyn BrowserSession,
        index: usize,
    ) -> Result<String, HarvestError> {
        let maps = &self.maps;
        bounded(
            maps.results_timeout,
            "open result card",
            session.click_nth(&maps.selectors.result_card, index),
        )
        .await?;
        sleep(maps.card_settle).await;
        bounded(maps.results_timeout, "card content", session.content()).await
    }
}

#[async_trait]
impl RenderedFetch for RenderedStrategy {
    async fn render_page(&self, target: &Url) -> Result<String, HarvestError> {
        let mut session = self.acquire().await?;
        let outcome = guarded(self.render.attempt_timeout, "rendered fetch", async {
            self.collect_page(session.get()?, target).await
        })
        .await;
        session.release().await;
        outcome
    }

    async fn search_listings(&self, keyword: &str) -> Result<Vec<BusinessRecord>, HarvestError> {
        let fields = Arc::new(BusinessSelectors::compile(&self.maps.selectors)?);
        let mut session = self.acquire().await?;
        let outcome = guarded(self.maps.attempt_timeout, "maps search", async {
            self.collect_listings(session.get()?, keyword, &fields).await
        })
        .await;
        session.release().await;
        outcome
    }
}

/// Owns a live session until it is released.
///
/// A guard dropped while still holding its session, because the caller's
/// future was cancelled, hands the close to the runtime.
struct SessionGuard {
    session: Option<Box<dyn BrowserSession>>,
}

impl SessionGuard {
    fn get(&mut self) -> Result<&mut dyn BrowserSession, HarvestError> {
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(HarvestError::FetchFailed("browser session already released".into())),
        }
    }

    async fn release(mut self) {
        if let Some(session) = self.session.take() {
            release(session).await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(target: "harvest.render", "render.cancelled_release");
                handle.spawn(release(session));
            }
            Err(_) => tracing::warn!(target: "harvest.render", "render.session_leaked"),
        }
    }
}

/// Close the session, logging rather than surfacing any failure.
async fn release(session: Box<dyn BrowserSession>) {
    match timeout(CLOSE_TIMEOUT, session.close()).await {
        Ok(Ok(())) => tracing::debug!(target: "harvest.render", "render.session_closed"),
        Ok(Err(err)) => tracing::warn!(
            target: "harvest.render",
            error = %format!("{err:#}"),
            "render.close_failed"
        ),
        Err(_) => tracing::warn!(
            target: "harvest.render",
            timeout_ms = CLOSE_TIMEOUT.as_millis() as u64,
            "render.close_timed_out"
        ),
    }
}

/// Bound a session call and map its failure into the error taxonomy.
async fn bounded<T, F>(budget: Duration, what: &str, fut: F) -> Result<T, HarvestError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match timeout(budget, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(HarvestError::FetchFailed(format!("{what}: {err:#}"))),
        Err(_) => Err(HarvestError::Timeout(format!(
            "{what} exceeded {}ms",
            budget.as_millis()
        ))),
    }
}

/// Bound a whole unit of work and turn a panic inside it into a failure.
async fn guarded<T, F>(budget: Duration, what: &str, fut: F) -> Result<T, HarvestError>
where
    F: Future<Output = Result<T, HarvestError>>,
{
    match timeout(budget, AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(target: "harvest.render", what, %message, "render.panicked");
            Err(HarvestError::FetchFailed(format!("{what} panicked: {message}")))
        }
        Err(_) => Err(HarvestError::Timeout(format!(
            "{what} exceeded {}ms",
            budget.as_millis()
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A marker counts only when the redirect introduced it.
fn block_marker<'m>(markers: &'m [String], requested: &str, landed: &str) -> Option<&'m str> {
    let requested = requested.to_ascii_lowercase();
    let landed = landed.to_ascii_lowercase();
    markers
        .iter()
        .map(String::as_str)
        .find(|marker| {
            let marker = marker.to_ascii_lowercase();
            !marker.is_empty() && landed.contains(&marker) && !requested.contains(&marker)
        })
}
