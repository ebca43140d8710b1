//! WebDriver-backed browser sessions (chromedriver via fantoccini).

use std::time::Duration;

use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{Value, json};

use crate::collector::session::{BrowserError, BrowserSession, SessionFactory};
use crate::error::ConfigError;

/// Collects `src` and every `srcset` entry of the images on the page.
const EXTRACT_SCRIPT: &str = r#"
const urls = [];
document.querySelectorAll('img').forEach(img => {
    if (img.src) urls.push(img.src);
    if (img.srcset) {
        img.srcset.split(',').forEach(part => {
            const url = part.trim().split(' ')[0];
            if (url) urls.push(url);
        });
    }
});
return urls;
"#;

const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight);";

/// Opens Chrome sessions through a running WebDriver server.
#[derive(Debug, Clone)]
pub struct WebDriverSessionFactory {
    webdriver_url: String,
    headless: bool,
    user_agent: String,
}

impl WebDriverSessionFactory {
    pub fn new(webdriver_url: impl Into<String>, headless: bool, user_agent: impl Into<String>) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
            headless,
            user_agent: user_agent.into(),
        }
    }

    fn chrome_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--window-size=1920,1080",
            "--disable-gpu",
            "--disable-extensions",
            "--disable-infobars",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(format!("--user-agent={}", self.user_agent));
        if self.headless {
            args.push("--headless=new".to_string());
        }
        args
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> ConfigError {
        ConfigError::DriverUnavailable {
            url: self.webdriver_url.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl SessionFactory for WebDriverSessionFactory {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, ConfigError> {
        let mut capabilities = serde_json::Map::new();
        capabilities.insert(
            "goog:chromeOptions".to_string(),
            json!({ "args": self.chrome_args() }),
        );

        let mut builder = ClientBuilder::rustls().map_err(|e| self.unavailable(e))?;
        let client = builder
            .capabilities(capabilities)
            .connect(&self.webdriver_url)
            .await
            .map_err(|e| self.unavailable(e))?;

        tracing::info!(
            webdriver = %self.webdriver_url,
            headless = self.headless,
            "Browser session opened"
        );
        Ok(Box::new(WebDriverSession { client }))
    }
}

/// A single Chrome page driven over WebDriver.
pub struct WebDriverSession {
    client: Client,
}

fn command_error(e: fantoccini::error::CmdError) -> BrowserError {
    BrowserError::Command(e.to_string())
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.client.goto(url).await.map_err(command_error)
    }

    async fn wait_for_images(&mut self, timeout: Duration) -> Result<(), BrowserError> {
        self.client
            .wait()
            .at_most(timeout)
            .for_element(Locator::Css("img"))
            .await
            .map(|_| ())
            .map_err(|e| match e {
                fantoccini::error::CmdError::WaitTimeout => BrowserError::Timeout(timeout),
                other => command_error(other),
            })
    }

    async fn scroll(&mut self) -> Result<(), BrowserError> {
        self.client
            .execute(SCROLL_SCRIPT, Vec::new())
            .await
            .map(|_| ())
            .map_err(command_error)
    }

    async fn image_urls(&mut self) -> Result<Vec<String>, BrowserError> {
        let value = self
            .client
            .execute(EXTRACT_SCRIPT, Vec::new())
            .await
            .map_err(command_error)?;
        urls_from_script(value)
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.client.clone().close().await.map_err(command_error)
    }
}

fn urls_from_script(value: Value) -> Result<Vec<String>, BrowserError> {
    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(BrowserError::Script(format!("expected an array, got {other}"))),
    }
}
