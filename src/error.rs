//! Error types for pin-harvest.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for a harvest run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worklist error: {0}")]
    Worklist(#[from] WorklistError),

    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run interrupted by shutdown signal")]
    Interrupted,
}

impl Error {
    /// Errors that must abort the whole run instead of a single term.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Worklist(_) | Self::Interrupted)
    }
}

/// Configuration-related errors. All of these abort the run before (or instead of)
/// processing further terms.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Worklist file not found: {}", path.display())]
    WorklistMissing { path: PathBuf },

    #[error("Failed to read worklist {}: {source}", path.display())]
    WorklistUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed default count directive on line {line_no} ({line:?}): {reason}")]
    MalformedDirective {
        line_no: usize,
        line: String,
        reason: String,
    },

    #[error("Browser driver unavailable at {url}: {reason}")]
    DriverUnavailable { url: String, reason: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors while rewriting the worklist after a term completes.
#[derive(Debug, thiserror::Error)]
pub enum WorklistError {
    #[error("Pending line not found in worklist: {line:?}")]
    LineNotFound { line: String },

    #[error("Failed to replace worklist {}: {reason}", path.display())]
    Persist { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-term collection failures. The term stays pending for the next run.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("Search results for {term:?} did not load: {reason}")]
    ResultsNotLoaded { term: String, reason: String },

    #[error("Browser session crashed while collecting {term:?}: {reason}")]
    SessionCrashed { term: String, reason: String },
}

/// Per-candidate download failures.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP {status}")]
    Http { status: u16 },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid image payload: {0}")]
    InvalidPayload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status } => *status >= 500 || *status == 408 || *status == 429,
            Self::Request(_) | Self::Timeout(_) => true,
            Self::InvalidPayload(_) | Self::Io(_) => false,
        }
    }
}

/// Result type alias for harvest operations.
pub type Result<T> = std::result::Result<T, Error>;
