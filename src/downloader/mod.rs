//! Bounded-concurrency image downloading.
//!
//! - `fetch` — `ImageFetcher` trait, reqwest fetcher, payload verification and content keys
//! - `retry` — backoff decisions over `RetryPolicy`
//! - `downloader` — `Downloader::download_all`, worker pool with dedup and no-clobber saves

pub mod downloader;
pub mod fetch;
pub mod retry;

pub use downloader::{DownloadOutcome, DownloadReport, DownloadResult, Downloader, fetch_with_retry};
pub use fetch::{FetchedImage, HttpFetcher, ImageFetcher, content_key, is_content_key};
