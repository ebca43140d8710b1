//! Browser-driven discovery of candidate image URLs.
//!
//! Core components:
//! - `session` — `BrowserSession` / `SessionFactory` capability traits
//! - `webdriver` — Chrome over WebDriver (fantoccini)
//! - `candidates` — URL canonicalisation, de-duplication, scroll/stall tracking
//! - `collector` — `ImageCandidateCollector`, producing a lazy candidate stream per term

pub mod collector;
pub mod candidates;
pub mod session;
pub mod webdriver;

pub use candidates::{ImageCandidate, StopReason, canonical_image_url};
pub use collector::{CandidateFeed, CollectionReport, CollectionTask, ImageCandidateCollector};
pub use session::{BrowserError, BrowserSession, SessionFactory};
pub use webdriver::WebDriverSessionFactory;
