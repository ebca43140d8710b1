//! Downloading a term's candidates into its folder.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::collector::ImageCandidate;
use crate::config::{DownloaderConfig, RetryPolicy};
use crate::downloader::fetch::{FetchedImage, ImageFetcher, is_content_key};
use crate::error::{DownloadError, Error};

/// What happened to one candidate.
#[derive(Debug)]
pub enum DownloadOutcome {
    Saved(PathBuf),
    /// Same content as an image already in the folder.
    Duplicate,
    Failed(DownloadError),
}

/// Result for one candidate; consumed immediately for progress counting.
#[derive(Debug)]
pub struct DownloadResult {
    pub candidate: ImageCandidate,
    pub outcome: DownloadOutcome,
}

/// Counters for one `download_all` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Images written by this call.
    pub saved: u32,
    /// Images already in the folder before the call.
    pub pre_existing: u32,
    pub duplicates: u32,
    pub failed: u32,
    /// The candidate sequence ran out before the target was met.
    pub exhausted: bool,
}

impl DownloadReport {
    /// Images in the folder for this term.
    pub fn total(&self) -> u32 {
        self.saved + self.pre_existing
    }

    fn record(&mut self, result: &DownloadResult) {
        match &result.outcome {
            DownloadOutcome::Saved(path) => {
                self.saved += 1;
                debug!(url = %result.candidate.source_url, path = %path.display(), "Saved image");
            }
            DownloadOutcome::Duplicate => {
                self.duplicates += 1;
                debug!(url = %result.candidate.source_url, "Skipping duplicate image");
            }
            DownloadOutcome::Failed(e) => {
                self.failed += 1;
                warn!(url = %result.candidate.source_url, error = %e, "Download failed");
            }
        }
    }
}

/// Fetches candidates with a bounded worker pool and writes unique images.
pub struct Downloader {
    fetcher: Arc<dyn ImageFetcher>,
    config: DownloaderConfig,
}

impl Downloader {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, config: DownloaderConfig) -> Self {
        Self { fetcher, config }
    }

    /// Download from `candidates` into `dest_dir` until `target_count` images
    /// are in the folder or the sequence ends. Remaining candidates are not pulled.
    pub async fn download_all<S>(
        &self,
        candidates: S,
        dest_dir: &Path,
        target_count: u32,
    ) -> Result<DownloadReport, Error>
    where
        S: Stream<Item = ImageCandidate> + Send,
    {
        fs::create_dir_all(dest_dir).await?;
        let mut saved_keys = existing_keys(dest_dir).await?;
        let mut report = DownloadReport {
            pre_existing: saved_keys.len() as u32,
            ..DownloadReport::default()
        };

        if report.total() >= target_count {
            info!(
                dir = %dest_dir.display(),
                existing = report.pre_existing,
                target_count,
                "Folder already holds the requested images"
            );
            return Ok(report);
        }

        let fetcher = Arc::clone(&self.fetcher);
        let retry = self.config.retry.clone();
        let timeout = self.config.request_timeout;
        let mut attempts = std::pin::pin!(
            candidates
                .map(move |candidate| {
                    let fetcher = Arc::clone(&fetcher);
                    let retry = retry.clone();
                    async move {
                        let fetched =
                            fetch_with_retry(fetcher.as_ref(), &candidate.source_url, &retry, timeout)
                                .await;
                        (candidate, fetched)
                    }
                })
                .buffer_unordered(self.config.workers.max(1))
        );

        report.exhausted = true;
        while let Some((candidate, fetched)) = attempts.next().await {
            let outcome = match fetched {
                Ok(image) => save_unique(image, dest_dir, &mut saved_keys).await,
                Err(e) => DownloadOutcome::Failed(e),
            };
            let result = DownloadResult { candidate, outcome };
            report.record(&result);

            if report.saved > 0 && report.saved % 10 == 0 {
                debug!(saved = report.saved, target_count, "Download progress");
            }
            if report.total() >= target_count {
                report.exhausted = false;
                break;
            }
        }

        info!(
            dir = %dest_dir.display(),
            saved = report.saved,
            existing = report.pre_existing,
            duplicates = report.duplicates,
            failed = report.failed,
            target_count,
            "Downloads finished"
        );
        Ok(report)
    }
}

/// Fetch and verify one URL, retrying transient failures per `policy`.
pub async fn fetch_with_retry(
    fetcher: &dyn ImageFetcher,
    url: &str,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<FetchedImage, DownloadError> {
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(timeout, fetcher.fetch(url)).await {
            Ok(Ok(bytes)) => FetchedImage::verify(bytes),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DownloadError::Timeout(timeout)),
        };

        match result {
            Ok(image) => return Ok(image),
            Err(e) => match policy.next_delay(attempt, &e) {
                Some(delay) => {
                    debug!(url, attempt, error = %e, ?delay, "Retrying download");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
        }
    }
}

/// Content keys of images already saved in `dir`.
async fn existing_keys(dir: &Path) -> Result<HashSet<String>, std::io::Error> {
    let mut keys = HashSet::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            && is_content_key(stem)
        {
            keys.insert(stem.to_string());
        }
    }
    Ok(keys)
}

async fn save_unique(
    image: FetchedImage,
    dest_dir: &Path,
    saved_keys: &mut HashSet<String>,
) -> DownloadOutcome {
    if saved_keys.contains(&image.content_key) {
        return DownloadOutcome::Duplicate;
    }

    let key = image.content_key.clone();
    let target = dest_dir.join(image.file_name());
    let dir = dest_dir.to_path_buf();
    let written = tokio::task::spawn_blocking(move || write_new_file(&dir, &target, &image.bytes))
        .await
        .unwrap_or_else(|e| Err(std::io::Error::other(e.to_string())));

    match written {
        Ok(Some(path)) => {
            saved_keys.insert(key);
            DownloadOutcome::Saved(path)
        }
        Ok(None) => {
            saved_keys.insert(key);
            DownloadOutcome::Duplicate
        }
        Err(e) => DownloadOutcome::Failed(DownloadError::Io(e)),
    }
}

/// Write via a temp file in `dir`, then link into place without replacing
/// anything. `Ok(None)` means `target` already existed.
fn write_new_file(dir: &Path, target: &Path, bytes: &[u8]) -> Result<Option<PathBuf>, std::io::Error> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".download-")
        .suffix(".part")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    match tmp.persist_noclobber(target) {
        Ok(_) => Ok(Some(target.to_path_buf())),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e.error),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;

    fn png(tag: &str) -> Vec<u8> {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(tag.as_bytes());
        bytes
    }

    fn candidate(url: &str) -> ImageCandidate {
        ImageCandidate {
            source_url: url.to_string(),
            dedup_key: url.to_string(),
        }
    }

    /// Serves scripted responses per URL; the last response repeats.
    #[derive(Default)]
    struct ScriptedFetcher {
        responses: Mutex<HashMap<String, Vec<Result<Vec<u8>, u16>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn serve(self, url: &str, responses: Vec<Result<Vec<u8>, u16>>) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), responses);
            self
        }
    }

    #[async_trait]
    impl ImageFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let queue = responses
                .get_mut(url)
                .ok_or(DownloadError::Http { status: 404 })?;
            let next = if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue[0].clone()
            };
            next.map_err(|status| DownloadError::Http { status })
        }
    }

    fn downloader(fetcher: Arc<dyn ImageFetcher>) -> Downloader {
        let config = DownloaderConfig {
            workers: 3,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..DownloaderConfig::default()
        };
        Downloader::new(fetcher, config)
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn identical_content_is_saved_once() {
        let fetcher = ScriptedFetcher::default()
            .serve("https://a", vec![Ok(png("same"))])
            .serve("https://b", vec![Ok(png("same"))])
            .serve("https://c", vec![Ok(png("other"))]);
        let dir = TempDir::new().unwrap();
        let candidates = futures::stream::iter(["https://a", "https://b", "https://c"].map(candidate));

        let report = downloader(Arc::new(fetcher))
            .download_all(candidates, dir.path(), 10)
            .await
            .unwrap();

        assert_eq!(report.saved, 2);
        assert_eq!(report.duplicates, 1);
        assert!(report.exhausted);
        assert_eq!(files_in(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn stops_at_target() {
        let mut fetcher = ScriptedFetcher::default();
        let urls: Vec<String> = (0..8).map(|i| format!("https://img/{i}")).collect();
        for (i, url) in urls.iter().enumerate() {
            fetcher = fetcher.serve(url, vec![Ok(png(&format!("img{i}")))]);
        }
        let dir = TempDir::new().unwrap();
        let candidates = futures::stream::iter(urls.iter().map(|u| candidate(u)).collect::<Vec<_>>());

        let report = downloader(Arc::new(fetcher))
            .download_all(candidates, dir.path(), 3)
            .await
            .unwrap();

        assert_eq!(report.saved, 3);
        assert!(!report.exhausted);
        assert_eq!(files_in(dir.path()).len(), 3);
    }

    #[tokio::test]
    async fn short_sequences_save_what_they_can() {
        let fetcher = ScriptedFetcher::default()
            .serve("https://ok1", vec![Ok(png("1"))])
            .serve("https://ok2", vec![Ok(png("2"))])
            .serve("https://html", vec![Ok(b"<html>blocked</html>".to_vec())])
            .serve("https://gone", vec![Err(404)]);
        let dir = TempDir::new().unwrap();
        let candidates = futures::stream::iter(
            ["https://ok1", "https://html", "https://gone", "https://ok2"].map(candidate),
        );

        let report = downloader(Arc::new(fetcher))
            .download_all(candidates, dir.path(), 5)
            .await
            .unwrap();

        assert_eq!(report.saved, 2);
        assert_eq!(report.failed, 2);
        assert!(report.exhausted);
        assert_eq!(files_in(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let fetcher = Arc::new(
            ScriptedFetcher::default().serve("https://flaky", vec![Err(503), Err(503), Ok(png("x"))]),
        );
        let image = fetch_with_retry(
            fetcher.as_ref(),
            "https://flaky",
            &RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(image.format, image::ImageFormat::Png);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let fetcher = Arc::new(ScriptedFetcher::default().serve("https://gone", vec![Err(404)]));
        let err = fetch_with_retry(
            fetcher.as_ref(),
            "https://gone",
            &RetryPolicy::default(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DownloadError::Http { status: 404 }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn existing_images_count_toward_target_and_are_kept() {
        let dir = TempDir::new().unwrap();
        let earlier = FetchedImage::verify(png("earlier")).unwrap();
        std::fs::write(dir.path().join(earlier.file_name()), &earlier.bytes).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let fetcher = ScriptedFetcher::default()
            .serve("https://again", vec![Ok(png("earlier"))])
            .serve("https://new", vec![Ok(png("new"))])
            .serve("https://extra", vec![Ok(png("extra"))]);
        let candidates =
            futures::stream::iter(["https://again", "https://new", "https://extra"].map(candidate));

        let report = downloader(Arc::new(fetcher))
            .download_all(candidates, dir.path(), 2)
            .await
            .unwrap();

        assert_eq!(report.pre_existing, 1);
        assert_eq!(report.total(), 2);
        assert_eq!(
            std::fs::read(dir.path().join(earlier.file_name())).unwrap(),
            earlier.bytes
        );
        assert_eq!(files_in(dir.path()).len(), 3);
    }

    #[test]
    fn write_new_file_never_replaces() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("0011223344556677.png");
        std::fs::write(&target, b"original").unwrap();

        let written = write_new_file(dir.path(), &target, b"replacement").unwrap();
        assert!(written.is_none());
        assert_eq!(std::fs::read(&target).unwrap(), b"original");
        assert_eq!(files_in(dir.path()), vec!["0011223344556677.png".to_string()]);
    }
}
