//! Candidate URLs: canonical form, de-duplication, and scroll/stall bookkeeping.

use std::collections::HashSet;

use reqwest::Url;

/// Host serving the site's pin images.
const IMAGE_HOST: &str = "i.pinimg.com";

/// Size-variant path segments rewritten to the full-size original.
const SIZE_VARIANTS: &[&str] = &["/236x/", "/474x/", "/736x/"];

/// Avatar-sized thumbnails; never pin content.
const THUMBNAIL_SEGMENT: &str = "/60x60/";

/// An image URL discovered on a results page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageCandidate {
    /// URL to download (already canonical).
    pub source_url: String,
    /// Key shared by every size variant of the same image.
    pub dedup_key: String,
}

/// Canonical full-size URL for a raw `src`/`srcset` value, or `None` if the
/// URL is not pin content.
pub fn canonical_image_url(raw: &str) -> Option<String> {
    let url = raw.trim();
    if url.is_empty() || url.starts_with("data:") || !url.contains(IMAGE_HOST) {
        return None;
    }
    if url.contains(THUMBNAIL_SEGMENT) {
        return None;
    }

    let mut canonical = url.to_string();
    if !canonical.contains("/originals/") {
        for variant in SIZE_VARIANTS {
            canonical = canonical.replace(variant, "/originals/");
        }
    }
    Some(canonical)
}

/// Image path of a canonical URL; query strings and fragments do not make a
/// new image.
pub fn dedup_key(canonical: &str) -> String {
    match Url::parse(canonical) {
        Ok(url) => url.path().to_string(),
        Err(_) => canonical.to_string(),
    }
}

/// Candidates already yielded for one term.
#[derive(Debug, Default)]
pub struct CandidateSet {
    seen: HashSet<String>,
}

impl CandidateSet {
    /// Returns a candidate only the first time its canonical form is seen.
    pub fn insert(&mut self, raw: &str) -> Option<ImageCandidate> {
        let source_url = canonical_image_url(raw)?;
        let candidate = ImageCandidate {
            dedup_key: dedup_key(&source_url),
            source_url,
        };
        self.seen
            .insert(candidate.dedup_key.clone())
            .then_some(candidate)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Why a collection pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Enough unique candidates, including surplus.
    GoalReached,
    /// Too many consecutive passes without a new candidate.
    Stalled,
    /// Scroll ceiling hit.
    CeilingReached,
    /// The downloader stopped pulling candidates.
    ConsumerDone,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::GoalReached => "goal_reached",
            Self::Stalled => "stalled",
            Self::CeilingReached => "ceiling_reached",
            Self::ConsumerDone => "consumer_done",
        };
        write!(f, "{s}")
    }
}

/// Outcome of recording one extraction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDecision {
    /// Scroll once more and extract again.
    Continue,
    Stop(StopReason),
}

/// Pure state for the scroll loop: counts new candidates per pass against
/// the goal, the stall threshold and the scroll ceiling.
#[derive(Debug, Clone)]
pub struct ScrollTracker {
    goal: usize,
    stall_limit: u32,
    ceiling: u32,
    collected: usize,
    stalled: u32,
    scrolls: u32,
}

impl ScrollTracker {
    pub fn new(goal: usize, stall_limit: u32, ceiling: u32) -> Self {
        Self {
            goal,
            stall_limit,
            ceiling,
            collected: 0,
            stalled: 0,
            scrolls: 0,
        }
    }

    /// Record a pass that produced `new_items` unseen candidates.
    ///
    /// A `Continue` decision counts as one scroll toward the ceiling.
    pub fn record(&mut self, new_items: usize) -> ScrollDecision {
        self.collected += new_items;
        if new_items == 0 {
            self.stalled += 1;
        } else {
            self.stalled = 0;
        }

        let decision = if self.collected >= self.goal {
            ScrollDecision::Stop(StopReason::GoalReached)
        } else if self.stalled >= self.stall_limit {
            ScrollDecision::Stop(StopReason::Stalled)
        } else if self.scrolls >= self.ceiling {
            ScrollDecision::Stop(StopReason::CeilingReached)
        } else {
            ScrollDecision::Continue
        };

        if decision == ScrollDecision::Continue {
            self.scrolls += 1;
        }
        decision
    }

    pub fn collected(&self) -> usize {
        self.collected
    }

    pub fn scrolls(&self) -> u32 {
        self.scrolls
    }
}
