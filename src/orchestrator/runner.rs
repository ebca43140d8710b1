//! The harvest run loop.

use std::io::Write;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::collector::{CandidateFeed, ImageCandidateCollector};
use crate::downloader::{Downloader, content_key};
use crate::error::{Error, Result};
use crate::orchestrator::state::{TermRun, TermState};
use crate::worklist::{WorkItem, WorklistStore};

/// Longest folder name derived from a term, in characters.
const MAX_FOLDER_NAME: usize = 100;

/// Hex chars of the term hash appended to altered folder names.
const FOLDER_TAG_LEN: usize = 8;

/// Totals and per-term outcomes for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Lines already marked done when the run started.
    pub already_done: usize,
    pub terms: Vec<TermRun>,
}

impl RunSummary {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            already_done: 0,
            terms: Vec::new(),
        }
    }

    pub fn done(&self) -> usize {
        self.count(TermState::Done)
    }

    pub fn failed(&self) -> usize {
        self.count(TermState::Failed)
    }

    pub fn images_saved(&self) -> u32 {
        self.terms.iter().map(|t| t.saved).sum()
    }

    fn count(&self, state: TermState) -> usize {
        self.terms.iter().filter(|t| t.state == state).count()
    }

    fn log(&self) {
        for term in &self.terms {
            info!(term = %term.term, state = %term.state, "{}", term.describe());
        }
        info!(
            run_id = %self.run_id,
            done = self.done(),
            failed = self.failed(),
            already_done = self.already_done,
            images = self.images_saved(),
            "Harvest run finished"
        );
        if let Ok(json) = serde_json::to_string(self) {
            debug!(summary = %json, "Run summary");
        }
    }
}

/// Walks the worklist and harvests each pending term in order.
pub struct Orchestrator {
    store: WorklistStore,
    collector: ImageCandidateCollector,
    downloader: Downloader,
    output_dir: PathBuf,
    extract_only: bool,
    listing: Box<dyn Write + Send>,
    shutdown: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        store: WorklistStore,
        collector: ImageCandidateCollector,
        downloader: Downloader,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        let (_, shutdown) = watch::channel(false);
        Self {
            store,
            collector,
            downloader,
            output_dir: output_dir.into(),
            extract_only: false,
            listing: Box::new(std::io::stdout()),
            shutdown,
        }
    }

    /// List candidate URLs instead of downloading; the worklist is left untouched.
    pub fn with_extract_only(mut self, extract_only: bool) -> Self {
        self.extract_only = extract_only;
        self
    }

    /// Where extract-only mode writes `IMAGE_URL:` lines.
    pub fn with_listing_output(mut self, out: Box<dyn Write + Send>) -> Self {
        self.listing = out;
        self
    }

    /// Stop after the current term step once `true` is sent.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Process every pending term. Per-term failures are recorded in the
    /// summary; only fatal errors are returned.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("harvest", %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&mut self, run_id: Uuid) -> Result<RunSummary> {
        let worklist = self.store.load().await?;
        let pending: Vec<WorkItem> = worklist.pending().cloned().collect();

        let mut summary = RunSummary::new(run_id);
        summary.already_done = worklist.done_count();
        info!(
            worklist = %self.store.path().display(),
            pending = pending.len(),
            already_done = summary.already_done,
            warnings = worklist.warning_count(),
            "Worklist loaded"
        );

        for item in pending {
            if self.interrupted() {
                warn!("Shutdown requested; remaining terms stay pending");
                summary.log();
                return Err(Error::Interrupted);
            }

            let span = info_span!("term", term = %item.term, requested = item.requested_count);
            let mut run = TermRun::new(item.term.clone(), item.requested_count);
            let result = self.process_term(&item, &mut run).instrument(span).await;
            summary.terms.push(run);

            if let Err(e) = result {
                summary.log();
                return Err(e);
            }
        }

        summary.log();
        Ok(summary)
    }

    /// Run one term to a terminal state. `Err` only for fatal errors.
    async fn process_term(&mut self, item: &WorkItem, run: &mut TermRun) -> Result<()> {
        transition(run, TermState::Running, None);
        info!("Processing term");

        match self.harvest(item, run).await {
            Ok(()) => {
                if !self.extract_only
                    && let Err(e) = self.store.mark_done(item).await
                {
                    error!(error = %e, "Could not mark term done; stopping run");
                    transition(run, TermState::Failed, Some(e.to_string()));
                    return Err(e.into());
                }
                transition(run, TermState::Done, None);
                info!(saved = run.saved, "Term done");
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Fatal error; stopping run");
                transition(run, TermState::Failed, Some(e.to_string()));
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Term failed; left pending for the next run");
                transition(run, TermState::Failed, Some(e.to_string()));
                Ok(())
            }
        }
    }

    async fn harvest(&mut self, item: &WorkItem, run: &mut TermRun) -> Result<()> {
        let feed = self
            .collector
            .collect(&item.term, item.requested_count)
            .await?;

        if self.interrupted() {
            let (candidates, task) = feed.into_parts();
            drop(candidates);
            let _ = task.finish().await;
            return Err(Error::Interrupted);
        }

        if self.extract_only {
            return self.list_candidates(feed, run).await;
        }

        let folder = term_folder(&self.output_dir, &item.term);
        let (candidates, task) = feed.into_parts();

        let mut shutdown = self.shutdown.clone();
        let downloaded = tokio::select! {
            report = self.downloader.download_all(candidates, &folder, item.requested_count) => Some(report),
            _ = shutdown_requested(&mut shutdown) => None,
        };
        // The candidate stream is gone by now, so the producer winds down and closes its session.
        let collected = task.finish().await;

        let Some(report) = downloaded else {
            return Err(Error::Interrupted);
        };
        let report = report?;
        run.saved = report.total();
        run.folder = Some(folder);

        match collected {
            Ok(collection) => {
                debug!(candidates = collection.candidates, stop = %collection.stop, "Collection finished");
            }
            Err(e) if report.total() >= item.requested_count => {
                warn!(error = %e, "Collector failed after the target was reached");
            }
            Err(e) => return Err(e.into()),
        }

        if report.total() < item.requested_count {
            let reason = format!(
                "candidates exhausted at {}/{}",
                report.total(),
                item.requested_count
            );
            warn!(saved = report.total(), requested = item.requested_count, "Partial success; candidates exhausted");
            run.reason = Some(reason);
        }
        Ok(())
    }

    /// Print each candidate URL as it arrives, stopping early on shutdown.
    async fn list_candidates(&mut self, feed: CandidateFeed, run: &mut TermRun) -> Result<()> {
        let (mut candidates, task) = feed.into_parts();
        let mut shutdown = self.shutdown.clone();
        let mut written = Ok(());

        let interrupted = loop {
            tokio::select! {
                next = candidates.next() => match next {
                    Some(candidate) => {
                        if written.is_ok() {
                            written = writeln!(self.listing, "IMAGE_URL: {}", candidate.source_url);
                            run.listed += 1;
                        }
                    }
                    None => break false,
                },
                _ = shutdown_requested(&mut shutdown) => break true,
            }
        };
        drop(candidates);
        let collected = task.finish().await;

        if interrupted {
            return Err(Error::Interrupted);
        }
        written?;
        self.listing.flush()?;
        let report = collected?;
        info!(listed = run.listed, stop = %report.stop, "Candidate URLs listed");
        Ok(())
    }

    fn interrupted(&self) -> bool {
        *self.shutdown.borrow()
    }
}

fn transition(run: &mut TermRun, state: TermState, reason: Option<String>) {
    if let Err(e) = run.transition_to(state, reason) {
        warn!(term = %run.term, error = %e, "Ignoring invalid term transition");
    }
}

/// Resolves once shutdown is requested; never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Filesystem-safe folder name for `term`.
///
/// A term that is already a safe name maps to itself. Any term that had to be
/// altered gets a suffix from its hash, so distinct terms never share a folder.
pub fn sanitize_folder_name(term: &str) -> String {
    let cleaned: String = term
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();
    let tag = &content_key(term.as_bytes())[..FOLDER_TAG_LEN];

    match cleaned.as_str() {
        "" | "." | ".." => return format!("term-{tag}"),
        _ if cleaned == term && cleaned.chars().count() <= MAX_FOLDER_NAME => return cleaned,
        _ => {}
    }

    let stem: String = cleaned
        .chars()
        .take(MAX_FOLDER_NAME - FOLDER_TAG_LEN - 1)
        .collect();
    format!("{stem}-{tag}")
}

/// Folder for `term` under `output_dir`.
pub fn term_folder(output_dir: &Path, term: &str) -> PathBuf {
    output_dir.join(sanitize_folder_name(term))
}
