//! Browser session capability used by the collector.
//!
//! A [`SessionFactory`] hands out one [`BrowserSession`] per term. The
//! collector owns the session for the duration of the term and always calls
//! [`BrowserSession::close`] before giving it up.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ConfigError;

/// Failure of a single browser command.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("browser command failed: {0}")]
    Command(String),

    #[error("browser command timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected script result: {0}")]
    Script(String),
}

/// One live browser page.
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate the page to `url`.
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Wait until at least one image element has rendered.
    async fn wait_for_images(&mut self, timeout: Duration) -> Result<(), BrowserError>;

    /// Scroll to the bottom to trigger lazy loading.
    async fn scroll(&mut self) -> Result<(), BrowserError>;

    /// Raw image URLs currently present in the page (`src` and `srcset` entries).
    async fn image_urls(&mut self) -> Result<Vec<String>, BrowserError>;

    /// End the session. Called exactly once, on every exit path.
    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Opens browser sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a fresh session. Fails with [`ConfigError`] when no driver is reachable.
    async fn open(&self) -> Result<Box<dyn BrowserSession>, ConfigError>;
}

/// Bound a browser command by `limit`.
pub async fn with_timeout<T>(
    limit: Duration,
    command: impl Future<Output = Result<T, BrowserError>>,
) -> Result<T, BrowserError> {
    tokio::time::timeout(limit, command)
        .await
        .map_err(|_| BrowserError::Timeout(limit))?
}
