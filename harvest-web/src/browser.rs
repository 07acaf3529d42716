//! Browser session seam used by the rendered strategy.
//!
//! Production sessions run over WebDriver through `harvest-drivers`. Tests
//! substitute scripted sessions that record how they were driven.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use harvest_config::BrowserConfig;
use harvest_drivers::harvest_browser::driver::{HarvestDriver, LaunchOptions};
use harvest_drivers::harvest_browser::fingerprint::UserAgentProfile;
use harvest_drivers::harvest_browser::page::HarvestPage;
use url::Url;

/// Starts one disposable browser session per call.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

/// A single live browser window.
///
/// Waits are unbounded here; the rendered strategy applies every deadline.
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate and return the document's HTTP status if the browser reports one.
    async fn goto(&mut self, url: &Url) -> Result<Option<u16>>;
    async fn wait_for_network_idle(&mut self) -> Result<()>;
    async fn current_url(&mut self) -> Result<String>;
    async fn content(&mut self) -> Result<String>;
    /// Returns `false` when nothing matches `selector`.
    async fn type_into(&mut self, selector: &str, text: &str) -> Result<bool>;
    /// Returns `false` when nothing matches `selector`.
    async fn click(&mut self, selector: &str) -> Result<bool>;
    async fn wait_for(&mut self, selector: &str) -> Result<()>;
    async fn count(&mut self, selector: &str) -> Result<usize>;
    async fn click_nth(&mut self, selector: &str, index: usize) -> Result<()>;
    /// Returns `false` when nothing matches `selector`.
    async fn scroll_by(&mut self, selector: &str, pixels: i64) -> Result<bool>;
    /// End the session and release the browser process.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Launches chromedriver-backed sessions.
pub struct FantocciniLauncher {
    options: LaunchOptions,
}

impl FantocciniLauncher {
    pub fn from_config(config: &BrowserConfig) -> Self {
        let profile = UserAgentProfile::new(
            config.user_agent.clone(),
            (config.viewport.width, config.viewport.height),
            config.languages.clone(),
        );
        Self {
            options: LaunchOptions {
                webdriver_url: config.webdriver_url.clone(),
                headless: config.headless,
                proxy: config.proxy.clone(),
                profile,
            },
        }
    }
}

#[async_trait]
impl BrowserLauncher for FantocciniLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let driver = HarvestDriver::launch(&self.options).await?;
        let page = driver.page();
        Ok(Box::new(FantocciniSession { driver, page }))
    }
}

struct FantocciniSession {
    driver: HarvestDriver,
    page: HarvestPage,
}

#[async_trait]
impl BrowserSession for FantocciniSession {
    async fn goto(&mut self, url: &Url) -> Result<Option<u16>> {
        self.page.goto(url.as_str()).await?;
        self.page.navigation_status().await
    }

    async fn wait_for_network_idle(&mut self) -> Result<()> {
        self.page.wait_for_network_idle().await
    }

    async fn current_url(&mut self) -> Result<String> {
        self.page.get_url().await
    }

    async fn content(&mut self) -> Result<String> {
        self.page.get_content().await
    }

    async fn type_into(&mut self, selector: &str, text: &str) -> Result<bool> {
        match self.page.find_optional(selector).await? {
            Some(input) => {
                input.type_str(text).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn click(&mut self, selector: &str) -> Result<bool> {
        match self.page.find_optional(selector).await? {
            Some(control) => {
                control.click().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn wait_for(&mut self, selector: &str) -> Result<()> {
        self.page.wait_for_element(selector).await.map(|_| ())
    }

    async fn count(&mut self, selector: &str) -> Result<usize> {
        Ok(self.page.find_elements(selector).await?.len())
    }

    async fn click_nth(&mut self, selector: &str, index: usize) -> Result<()> {
        let cards = self.page.find_elements(selector).await?;
        let card = cards
            .get(index)
            .ok_or_else(|| anyhow!("no element {index} for {selector:?} ({} present)", cards.len()))?;
        card.click().await
    }

    async fn scroll_by(&mut self, selector: &str, pixels: i64) -> Result<bool> {
        self.page.scroll_by(selector, pixels).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.driver.close().await
    }
}
