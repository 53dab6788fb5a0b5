use async_trait::async_trait;
use thirtyfour::{ChromiumLikeCapabilities, DesiredCapabilities, WebDriver};

/// One live browser. Every session must be closed with `quit`, including on
/// error paths; chromedriver leaks the browser process otherwise.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn goto(&self, url: &str) -> anyhow::Result<()>;

    async fn source(&self) -> anyhow::Result<String>;

    async fn quit(self: Box<Self>);
}

/// Thin wrapper over a WebDriver session, created per scrape.
pub struct Droid {
    pub driver: WebDriver,
}

impl Droid {
    pub async fn new(server_url: &str) -> anyhow::Result<Self> {
        let mut caps = DesiredCapabilities::chrome();
        caps.set_headless()?;
        caps.add_arg("--disable-gpu")?;
        caps.add_arg("--no-sandbox")?;
        caps.add_arg("--window-size=1920,1080")?;

        let driver = WebDriver::new(server_url, caps).await?;

        Ok(Droid { driver })
    }
}

#[async_trait]
impl BrowserSession for Droid {
    async fn goto(&self, url: &str) -> anyhow::Result<()> {
        self.driver.goto(url).await?;
        Ok(())
    }

    async fn source(&self) -> anyhow::Result<String> {
        Ok(self.driver.source().await?)
    }

    async fn quit(self: Box<Self>) {
        if let Err(e) = self.driver.quit().await {
            log::error!("Failed to quit webdriver session: {:?}", e);
        }
    }
}
