use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use fake_user_agent::get_rua;
use reqwest::header;
use url::Url;

use super::{BrowserSession, Droid};

/// One retrieval tier of the detail scraper. Every tier yields raw HTML for
/// the same downstream field extraction, so record shape never depends on
/// which tier succeeded.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    fn label(&self) -> &'static str;

    async fn fetch(&self, url: &str) -> anyhow::Result<String>;
}

/// Tier 1: fetch through the scraperapi render endpoint, which absorbs
/// basic anti-bot measures on our behalf.
pub struct ProxyFetcher {
    client: reqwest::Client,
    api_key: String,
}

const SCRAPERAPI_URL: &str = "http://api.scraperapi.com";

impl ProxyFetcher {
    pub fn new(api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .read_timeout(timeout)
            .build()
            .context("Failed to build proxy fetch client")?;

        Ok(ProxyFetcher { client, api_key })
    }
}

#[async_trait]
impl PageFetcher for ProxyFetcher {
    fn label(&self) -> &'static str {
        "proxy"
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .get(SCRAPERAPI_URL)
            .query(&[("api_key", self.api_key.as_str()), ("url", url)])
            .send()
            .await
            .context("No response from scraperapi")?
            .error_for_status()
            .context("Non-success status from scraperapi")?;

        response
            .text()
            .await
            .context("Failed to read scraperapi response body")
    }
}

/// Tier 2: a cookie-jar client with browser-like headers. A warm-up request
/// against the site root collects challenge cookies before the real fetch.
pub struct CookieFetcher {
    client: reqwest::Client,
}

impl CookieFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
                .parse()
                .context("Invalid accept header")?,
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            "en-US,en;q=0.5".parse().context("Invalid language header")?,
        );

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .read_timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to build cookie fetch client")?;

        Ok(CookieFetcher { client })
    }
}

#[async_trait]
impl PageFetcher for CookieFetcher {
    fn label(&self) -> &'static str {
        "cookie"
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let user_agent = get_rua();

        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                let origin = format!("{}://{}/", parsed.scheme(), host);
                // Warm-up to pick up challenge cookies; its own failure is
                // irrelevant.
                _ = self
                    .client
                    .get(origin)
                    .header(header::USER_AGENT, user_agent)
                    .send()
                    .await;
            }
        }

        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, user_agent)
            .send()
            .await
            .context("No response from cookie client")?
            .error_for_status()
            .context("Non-success status from cookie client")?;

        response
            .text()
            .await
            .context("Failed to read cookie client response body")
    }
}

/// Tier 3: full headless browser. Expensive, used once per company after
/// the HTTP tiers are exhausted. The driver session is closed on every
/// path out of `fetch`.
pub struct BrowserFetcher {
    webdriver_url: String,
    settle: Duration,
}

impl BrowserFetcher {
    pub fn new(webdriver_url: String, settle: Duration) -> Self {
        BrowserFetcher {
            webdriver_url,
            settle,
        }
    }

    async fn render(&self, session: &dyn BrowserSession, url: &str) -> anyhow::Result<String> {
        session.goto(url).await.context("Browser navigation failed")?;

        // Let dynamic content settle before reading the DOM back out.
        tokio::time::sleep(self.settle).await;

        session
            .source()
            .await
            .context("Failed to read rendered page source")
    }

    /// The session is quit on every path out, render failure included.
    async fn drive(&self, session: Box<dyn BrowserSession>, url: &str) -> anyhow::Result<String> {
        let result = self.render(session.as_ref(), url).await;
        session.quit().await;

        result
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    fn label(&self) -> &'static str {
        "browser"
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let session = Droid::new(&self.webdriver_url)
            .await
            .context("Failed to start webdriver session")?;

        self.drive(Box::new(session), url).await
    }
}
