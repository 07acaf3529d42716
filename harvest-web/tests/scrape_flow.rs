//! Email flow against a live mock site with a scripted browser.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use harvest_config::{BrowserConfig, MapsConfig, PolicyConfig};
use harvest_http::HttpClient;
use harvest_web::browser::{BrowserLauncher, BrowserSession};
use harvest_web::fetch::{StaticFetch, StaticStrategy};
use harvest_web::policy::PolicyGate;
use harvest_web::render::{MapsSettings, RenderSettings, RenderedStrategy};
use harvest_web::{Orchestrator, OrchestratorOptions};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct StaticPageBrowser {
    html: String,
    launches: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

struct StaticPageSession {
    html: String,
    url: String,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserLauncher for StaticPageBrowser {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StaticPageSession {
            html: self.html.clone(),
            url: String::new(),
            closes: self.closes.clone(),
        }))
    }
}

#[async_trait]
impl BrowserSession for StaticPageSession {
    async fn goto(&mut self, url: &Url) -> Result<Option<u16>> {
        self.url = url.to_string();
        Ok(Some(200))
    }
    async fn wait_for_network_idle(&mut self) -> Result<()> {
        Ok(())
    }
    async fn current_url(&mut self) -> Result<String> {
        Ok(self.url.clone())
    }
    async fn content(&mut self) -> Result<String> {
        Ok(self.html.clone())
    }
    async fn type_into(&mut self, _selector: &str, _text: &str) -> Result<bool> {
        Ok(false)
    }
    async fn click(&mut self, _selector: &str) -> Result<bool> {
        Ok(false)
    }
    async fn wait_for(&mut self, _selector: &str) -> Result<()> {
        Ok(())
    }
    async fn count(&mut self, _selector: &str) -> Result<usize> {
        Ok(0)
    }
    async fn click_nth(&mut self, _selector: &str, _index: usize) -> Result<()> {
        Ok(())
    }
    async fn scroll_by(&mut self, _selector: &str, _pixels: i64) -> Result<bool> {
        Ok(false)
    }
    async fn close(self: Box<Self>) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    orchestrator: Orchestrator,
    browser: Arc<StaticPageBrowser>,
    closes: Arc<AtomicUsize>,
}

fn harness(rendered_html: &str) -> Harness {
    let http = HttpClient::new("harvest-tests/1.0", None).unwrap();
    let closes = Arc::new(AtomicUsize::new(0));
    let browser = Arc::new(StaticPageBrowser {
        html: rendered_html.to_string(),
        launches: AtomicUsize::new(0),
        closes: closes.clone(),
    });
    let maps = MapsSettings::from_config(&MapsConfig::default()).unwrap();
    let rendered = RenderedStrategy::new(
        browser.clone(),
        RenderSettings::from_config(&BrowserConfig::default()),
        maps.clone(),
    );
    let orchestrator = Orchestrator::new(
        Arc::new(PolicyGate::new(http.clone(), &PolicyConfig::default())),
        Arc::new(StaticStrategy::new(http, Duration::from_secs(5))),
        Arc::new(rendered),
        OrchestratorOptions {
            check_policy: true,
            check_maps_policy: false,
            maps_url: maps.url,
        },
    );
    Harness {
        orchestrator,
        browser,
        closes,
    }
}

fn url(server: &MockServer, p: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
}

#[tokio::test]
async fn static_page_with_emails_never_launches_browser() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/contact"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<a href="mailto:hello@site.example">Mail</a><p>sales@site.example</p>"#,
            "text/html",
        ))
        .mount(&server)
        .await;

    let h = harness("<p>unused@site.example</p>");
    let emails = h
        .orchestrator
        .scrape_emails(&url(&server, "/contact"))
        .await
        .unwrap();

    assert_eq!(emails.len(), 2);
    assert!(emails.contains("hello@site.example"));
    assert_eq!(h.browser.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_static_page_uses_browser_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<div id='root'></div>", "text/html"),
        )
        .mount(&server)
        .await;

    let h = harness("<div id='root'><p>js@site.example</p></div>");
    let emails = h
        .orchestrator
        .scrape_emails(&url(&server, "/app"))
        .await
        .unwrap();

    assert!(emails.contains("js@site.example"));
    assert_eq!(h.browser.launches.load(Ordering::SeqCst), 1);
    assert_eq!(h.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn robots_denial_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("User-agent: *\nDisallow: /team\n", "text/plain"),
        )
        .mount(&server)
        .await;

    let h = harness("");
    let err = h
        .orchestrator
        .scrape_emails(&url(&server, "/team"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), harvest_common::ErrorKind::PolicyDenied);
    assert_eq!(h.browser.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn static_strategy_swallows_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<p>late@site.example</p>", "text/html")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let http = HttpClient::new("harvest-tests/1.0", None).unwrap();
    let strategy = StaticStrategy::new(http, Duration::from_millis(500));
    assert!(strategy.fetch(&url(&server, "/gone")).await.is_none());
    assert!(strategy.fetch(&url(&server, "/slow")).await.is_none());
}
