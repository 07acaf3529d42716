use crate::harvest_browser::behavioral::BehavioralEngine;
use anyhow::Result;
use fantoccini::{elements::Element, Client, Locator};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::time::sleep;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// How long the resource count must stay unchanged to count as idle.
const IDLE_QUIET_WINDOW: Duration = Duration::from_millis(500);

const NAVIGATION_STATUS_JS: &str = r#"
    const entries = performance.getEntriesByType('navigation');
    const nav = entries && entries[0];
    return nav && nav.responseStatus ? nav.responseStatus : null;
"#;

const LOAD_STATE_JS: &str = r#"
    return [document.readyState, performance.getEntriesByType('resource').length];
"#;

const SCROLL_BY_JS: &str = r#"
    const el = document.querySelector(arguments[0]);
    if (!el) return false;
    el.scrollTop += arguments[1];
    return true;
"#;

/// Page wrapper providing navigation, element queries and quiescence waits.
///
/// None of the waits here carry their own deadline; callers bound them.
pub struct HarvestPage {
    pub(crate) client: Client,
    pub(crate) behavioral_engine: BehavioralEngine,
    evasions: String,
}

impl HarvestPage {
    pub fn new(client: Client, behavioral_engine: BehavioralEngine, evasions: String) -> Self {
        Self {
            client,
            behavioral_engine,
            evasions,
        }
    }

    /// Navigate to `url` and apply the stealth evasions.
    pub async fn goto(&self, url: &str) -> Result<()> {
        self.client.goto(url).await?;
        self.client
            .execute(&self.evasions, vec![])
            .await?;
        Ok(())
    }

    /// HTTP status of the main document, when the browser exposes it.
    pub async fn navigation_status(&self) -> Result<Option<u16>> {
        let value = self.client.execute(NAVIGATION_STATUS_JS, vec![]).await?;
        Ok(value
            .as_u64()
            .and_then(|status| u16::try_from(status).ok()))
    }

    /// Resolve once the document is complete and no new resources have been
    /// requested for a short quiet window.
    pub async fn wait_for_network_idle(&self) -> Result<()> {
        let mut last_count: Option<u64> = None;
        let mut quiet_since = Instant::now();
        loop {
            let state = self.client.execute(LOAD_STATE_JS, vec![]).await?;
            let ready = state.get(0).and_then(Value::as_str) == Some("complete");
            let count = state.get(1).and_then(Value::as_u64);

            if count != last_count {
                last_count = count;
                quiet_since = Instant::now();
            } else if ready && quiet_since.elapsed() >= IDLE_QUIET_WINDOW {
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Return the full rendered HTML.
    pub async fn get_content(&self) -> Result<String> {
        self.client.source().await.map_err(anyhow::Error::from)
    }

    /// Return the current page URL.
    pub async fn get_url(&self) -> Result<String> {
        self.client
            .current_url()
            .await
            .map(|url| url.to_string())
            .map_err(anyhow::Error::from)
    }

    /// First element matching `selector`, or `None` if absent right now.
    pub async fn find_optional(&self, selector: &str) -> Result<Option<HarvestElement>> {
        Ok(self.find_elements(selector).await?.into_iter().next())
    }

    /// Find zero or more elements by CSS selector.
    pub async fn find_elements(&self, selector: &str) -> Result<Vec<HarvestElement>> {
        let elements = self.client.find_all(Locator::Css(selector)).await?;
        Ok(elements
            .into_iter()
            .map(|element| HarvestElement::new(element, &self.behavioral_engine))
            .collect())
    }

    /// Poll until at least one element matches `selector`.
    pub async fn wait_for_element(&self, selector: &str) -> Result<HarvestElement> {
        loop {
            if let Some(element) = self.find_optional(selector).await? {
                return Ok(element);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Scroll the first element matching `selector` by `pixels`.
    /// Returns `false` if no such element exists.
    pub async fn scroll_by(&self, selector: &str, pixels: i64) -> Result<bool> {
        let value = self
            .client
            .execute(SCROLL_BY_JS, vec![json!(selector), json!(pixels)])
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

#[derive(Clone)]
/// Wrapper for DOM elements that provides typed helpers consistent with [`HarvestPage`].
pub struct HarvestElement {
    pub element: Element,
    pub behavioral_engine: BehavioralEngine,
}

impl HarvestElement {
    pub fn new(element: Element, behavioral: &BehavioralEngine) -> Self {
        Self {
            element,
            behavioral_engine: behavioral.clone(),
        }
    }

    /// Type into the element using human-like timings.
    pub async fn type_str(&self, text: &str) -> Result<()> {
        self.behavioral_engine
            .type_text_human_like(&self.element, text)
            .await
    }

    pub async fn click(&self) -> Result<()> {
        self.element.click().await.map_err(anyhow::Error::from)
    }
}
