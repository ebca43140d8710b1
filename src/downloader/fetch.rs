//! Fetching raw image bytes and checking they are a real image.

use std::fmt::Write as _;

use async_trait::async_trait;
use image::ImageFormat;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use sha2::{Digest, Sha256};

use crate::config::DownloaderConfig;
use crate::error::{ConfigError, DownloadError};

/// Length of the content key (hex chars of the SHA-256 digest).
pub const CONTENT_KEY_LEN: usize = 16;

/// Source of raw image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

/// HTTP fetcher with browser-like headers.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: std::time::Duration,
}

impl HttpFetcher {
    pub fn new(config: &DownloaderConfig) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: "downloader".to_string(),
            message,
        };

        let mut headers = HeaderMap::new();
        let referer = HeaderValue::from_str(&config.referer)
            .map_err(|e| invalid(format!("referer: {e}")))?;
        headers.insert(REFERER, referer);

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| invalid(format!("http client: {e}")))?;

        Ok(Self {
            client,
            timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                DownloadError::Timeout(self.timeout)
            } else {
                DownloadError::Request(e.to_string())
            }
        };

        let response = self.client.get(url).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(classify)?;
        Ok(body.to_vec())
    }
}

/// A downloaded payload that passed verification.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    /// Hex prefix of the content hash; identical bytes share a key.
    pub content_key: String,
}

impl FetchedImage {
    /// Accept non-empty bytes whose signature is a known image format.
    pub fn verify(bytes: Vec<u8>) -> Result<Self, DownloadError> {
        if bytes.is_empty() {
            return Err(DownloadError::InvalidPayload("empty body".to_string()));
        }
        let format = image::guess_format(&bytes)
            .map_err(|_| DownloadError::InvalidPayload("not a recognised image format".to_string()))?;
        let content_key = content_key(&bytes);
        Ok(Self {
            bytes,
            format,
            content_key,
        })
    }

    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("img")
    }

    /// `<content key>.<ext>`; stable for identical content.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.content_key, self.extension())
    }
}

/// Content key for `bytes`.
pub fn content_key(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut key = String::with_capacity(CONTENT_KEY_LEN);
    for byte in digest.iter().take(CONTENT_KEY_LEN / 2) {
        let _ = write!(key, "{byte:02x}");
    }
    key
}

/// Whether a file stem looks like a content key.
pub fn is_content_key(stem: &str) -> bool {
    stem.len() == CONTENT_KEY_LEN && stem.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}
