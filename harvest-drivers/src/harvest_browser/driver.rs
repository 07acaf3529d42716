use crate::harvest_browser::{
    behavioral::BehavioralEngine, fingerprint::UserAgentProfile, page::HarvestPage,
    stealth::{build_launch_arguments, StealthScripts},
};
use anyhow::{Context, Result};
use fantoccini::{Client, ClientBuilder};
use serde_json::json;
use webdriver::capabilities::Capabilities;

/// Settings for one WebDriver session.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Chromedriver (or compatible) endpoint.
    pub webdriver_url: String,
    pub headless: bool,
    pub proxy: Option<String>,
    pub profile: UserAgentProfile,
}

/// Thin wrapper around a `fantoccini` WebDriver client.
///
/// Each driver owns its own browser session; dropping it without
/// [`close`](Self::close) leaves the browser to chromedriver's idle reaper.
pub struct HarvestDriver {
    client: Client,
    behavioral_engine: BehavioralEngine,
    evasions: String,
}

impl HarvestDriver {
    /// Start a new browser session on a running WebDriver service.
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let args = build_launch_arguments(
            &options.profile,
            options.headless,
            options.proxy.as_deref(),
        );

        let mut caps = Capabilities::new();
        caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(&options.webdriver_url)
            .await
            .with_context(|| format!("failed to start browser session at {}", options.webdriver_url))?;

        tracing::debug!(
            target: "browser.driver",
            webdriver = %options.webdriver_url,
            headless = options.headless,
            proxied = options.proxy.is_some(),
            "browser session started"
        );

        Ok(Self {
            client,
            behavioral_engine: BehavioralEngine::new(),
            evasions: StealthScripts::core_evasions(&options.profile),
        })
    }

    /// Page handle bound to this session's single window.
    pub fn page(&self) -> HarvestPage {
        HarvestPage::new(
            self.client.clone(),
            self.behavioral_engine.clone(),
            self.evasions.clone(),
        )
    }

    /// End the browser session; chromedriver terminates the browser process.
    pub async fn close(self) -> Result<()> {
        self.client.close().await?;
        tracing::debug!(target: "browser.driver", "browser session closed");
        Ok(())
    }
}
