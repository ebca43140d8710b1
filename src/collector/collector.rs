//! Per-term candidate collection.
//!
//! `collect()` opens a session, loads the results page and then hands the
//! session to a producer task that scrolls and extracts until the goal, a
//! stall or the scroll ceiling. Candidates flow to the consumer through a
//! bounded channel; when the consumer drops the stream the producer stops at
//! its next send or pause. The producer closes the session on every exit path.

use std::sync::Arc;

use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::collector::candidates::{
    CandidateSet, ImageCandidate, ScrollDecision, ScrollTracker, StopReason,
};
use crate::collector::session::{BrowserError, BrowserSession, SessionFactory, with_timeout};
use crate::config::CollectorConfig;
use crate::error::{CollectionError, ConfigError, Error};

/// Summary of one finished collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionReport {
    pub term: String,
    /// Unique candidates yielded.
    pub candidates: usize,
    pub scrolls: u32,
    pub stop: StopReason,
}

/// Produces candidate image URLs for search terms.
pub struct ImageCandidateCollector {
    factory: Arc<dyn SessionFactory>,
    config: CollectorConfig,
}

impl ImageCandidateCollector {
    pub fn new(factory: Arc<dyn SessionFactory>, config: CollectorConfig) -> Self {
        Self { factory, config }
    }

    /// Search results URL for `term`.
    pub fn search_url(&self, term: &str) -> Result<Url, ConfigError> {
        Url::parse_with_params(
            &self.config.search_base_url,
            &[("q", term), ("rs", "typed")],
        )
        .map_err(|e| ConfigError::InvalidValue {
            key: "search_base_url".to_string(),
            message: e.to_string(),
        })
    }

    /// Start collecting candidates for `term`, sized for `target_count` downloads.
    ///
    /// Fails with [`ConfigError`] if no session can be opened and with
    /// [`CollectionError`] if the results never load.
    pub async fn collect(&self, term: &str, target_count: u32) -> Result<CandidateFeed, Error> {
        let url = self.search_url(term)?;
        let mut session = self.factory.open().await?;

        if let Err(reason) = self.load_results(session.as_mut(), url.as_str()).await {
            close_session(session.as_mut(), term, &self.config).await;
            return Err(CollectionError::ResultsNotLoaded {
                term: term.to_string(),
                reason: reason.to_string(),
            }
            .into());
        }
        info!(term, url = %url, "Search results loaded");

        let tracker = ScrollTracker::new(
            self.config.candidate_goal(target_count),
            self.config.stall_limit,
            self.config.scroll_ceiling(target_count),
        );
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let config = self.config.clone();
        let owned_term = term.to_string();
        let handle = tokio::spawn(async move {
            let result = scroll_loop(session.as_mut(), &owned_term, tracker, &config, &tx).await;
            close_session(session.as_mut(), &owned_term, &config).await;
            result
        });

        Ok(CandidateFeed {
            candidates: ReceiverStream::new(rx),
            task: CollectionTask {
                term: term.to_string(),
                handle,
            },
        })
    }

    async fn load_results(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
    ) -> Result<(), BrowserError> {
        with_timeout(self.config.command_timeout, session.goto(url)).await?;
        // The session's own wait is bounded by load_timeout; the outer bound
        // only guards against a driver that never answers.
        with_timeout(
            self.config.load_timeout + self.config.command_timeout,
            session.wait_for_images(self.config.load_timeout),
        )
        .await
    }
}

async fn scroll_loop(
    session: &mut dyn BrowserSession,
    term: &str,
    mut tracker: ScrollTracker,
    config: &CollectorConfig,
    tx: &mpsc::Sender<ImageCandidate>,
) -> Result<CollectionReport, CollectionError> {
    let mut seen = CandidateSet::default();
    let crashed = |e: BrowserError| CollectionError::SessionCrashed {
        term: term.to_string(),
        reason: e.to_string(),
    };

    let stop = loop {
        let urls = match with_timeout(config.command_timeout, session.image_urls()).await {
            Ok(urls) => urls,
            Err(BrowserError::Timeout(limit)) => {
                warn!(term, ?limit, "Image extraction timed out; counting as an empty pass");
                Vec::new()
            }
            Err(e) => return Err(crashed(e)),
        };

        let mut fresh = 0;
        for raw in &urls {
            if let Some(candidate) = seen.insert(raw) {
                fresh += 1;
                if tx.send(candidate).await.is_err() {
                    break;
                }
            }
        }
        if tx.is_closed() {
            break StopReason::ConsumerDone;
        }

        debug!(term, found = urls.len(), fresh, total = seen.len(), "Extraction pass");

        if let ScrollDecision::Stop(reason) = tracker.record(fresh) {
            break reason;
        }

        match with_timeout(config.command_timeout, session.scroll()).await {
            Ok(()) => {}
            Err(BrowserError::Timeout(limit)) => {
                warn!(term, ?limit, "Scroll timed out");
            }
            Err(e) => return Err(crashed(e)),
        }

        tokio::select! {
            _ = tokio::time::sleep(config.scroll_pause) => {}
            _ = tx.closed() => break StopReason::ConsumerDone,
        }
    };

    let report = CollectionReport {
        term: term.to_string(),
        candidates: seen.len(),
        scrolls: tracker.scrolls(),
        stop,
    };
    info!(
        term,
        candidates = report.candidates,
        scrolls = report.scrolls,
        stop = %report.stop,
        "Candidate collection finished"
    );
    Ok(report)
}

async fn close_session(session: &mut dyn BrowserSession, term: &str, config: &CollectorConfig) {
    match with_timeout(config.command_timeout, session.close()).await {
        Ok(()) => debug!(term, "Browser session closed"),
        Err(e) => warn!(term, error = %e, "Failed to close browser session"),
    }
}

/// Lazy candidate sequence for one term plus the task producing it.
pub struct CandidateFeed {
    candidates: ReceiverStream<ImageCandidate>,
    task: CollectionTask,
}

impl CandidateFeed {
    pub fn into_parts(self) -> (ReceiverStream<ImageCandidate>, CollectionTask) {
        (self.candidates, self.task)
    }

    /// Drain every candidate, then wait for the producer.
    pub async fn collect_all(self) -> Result<(Vec<ImageCandidate>, CollectionReport), CollectionError> {
        use futures::StreamExt;

        let (stream, task) = self.into_parts();
        let candidates: Vec<ImageCandidate> = stream.collect().await;
        let report = task.finish().await?;
        Ok((candidates, report))
    }
}

/// Handle on the producer task. `finish()` returns once the session is closed.
pub struct CollectionTask {
    term: String,
    handle: JoinHandle<Result<CollectionReport, CollectionError>>,
}

impl CollectionTask {
    pub async fn finish(self) -> Result<CollectionReport, CollectionError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(CollectionError::SessionCrashed {
                term: self.term,
                reason: format!("collector task failed: {e}"),
            }),
        }
    }
}
