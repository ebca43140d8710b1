//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Desktop Chrome user agent sent by both the browser and the image fetcher.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

/// Search results page for the target site.
pub const SEARCH_BASE_URL: &str = "https://www.pinterest.com/search/pins/";

/// Referer attached to image downloads.
pub const SITE_REFERER: &str = "https://www.pinterest.com/";

/// Whole-run configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Worklist file listing search terms.
    pub worklist_path: PathBuf,
    /// Root directory holding one folder per term.
    pub output_dir: PathBuf,
    /// Requested count for items that precede any `DefaultImageCount` directive.
    pub default_image_count: u32,
    /// WebDriver endpoint (chromedriver or compatible).
    pub webdriver_url: String,
    /// Run the browser without a window.
    pub headless: bool,
    /// Print candidate URLs instead of downloading them.
    pub extract_only: bool,
    /// Log file written alongside stderr output.
    pub log_file: PathBuf,
    pub collector: CollectorConfig,
    pub downloader: DownloaderConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            worklist_path: PathBuf::from("search_terms.txt"),
            output_dir: PathBuf::from("pinterest_images"),
            default_image_count: 100,
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            extract_only: false,
            log_file: PathBuf::from("pin_harvest.log"),
            collector: CollectorConfig::default(),
            downloader: DownloaderConfig::default(),
        }
    }
}

impl HarvestConfig {
    /// Build config from `HARVEST_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_image_count: u32 =
            env_parse("HARVEST_DEFAULT_COUNT", defaults.default_image_count)?;
        if default_image_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HARVEST_DEFAULT_COUNT".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        let workers: usize = env_parse("HARVEST_WORKERS", defaults.downloader.workers)?;
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HARVEST_WORKERS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let max_scrolls = match std::env::var("HARVEST_MAX_SCROLLS") {
            Ok(raw) => Some(parse_value::<u32>("HARVEST_MAX_SCROLLS", &raw)?),
            Err(_) => None,
        };

        Ok(Self {
            worklist_path: env_path("HARVEST_WORKLIST", defaults.worklist_path),
            output_dir: env_path("HARVEST_OUTPUT_DIR", defaults.output_dir),
            default_image_count,
            webdriver_url: std::env::var("HARVEST_WEBDRIVER_URL")
                .unwrap_or(defaults.webdriver_url),
            headless: env_flag("HARVEST_HEADLESS", defaults.headless)?,
            extract_only: env_flag("HARVEST_EXTRACT_ONLY", defaults.extract_only)?,
            log_file: env_path("HARVEST_LOG_FILE", defaults.log_file),
            collector: CollectorConfig {
                max_scrolls,
                ..defaults.collector
            },
            downloader: DownloaderConfig {
                workers,
                ..defaults.downloader
            },
        })
    }
}

/// Tunables for the browser-driven candidate collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Extra unique candidates gathered beyond the target, in percent.
    pub overcollect_percent: u32,
    /// Consecutive scrolls without a new candidate before giving up.
    pub stall_limit: u32,
    /// Fixed scroll ceiling; `None` derives one from the target count.
    pub max_scrolls: Option<u32>,
    /// Pause after each scroll to let lazy content render.
    pub scroll_pause: Duration,
    /// How long the first results may take to appear.
    pub load_timeout: Duration,
    /// Upper bound for any single browser command.
    pub command_timeout: Duration,
    /// Search page; the term is appended as a query parameter.
    pub search_base_url: String,
    /// Capacity of the channel between the browser task and the downloader.
    pub channel_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            overcollect_percent: 20,
            stall_limit: 3,
            max_scrolls: None,
            scroll_pause: Duration::from_secs(2),
            load_timeout: Duration::from_secs(20),
            command_timeout: Duration::from_secs(30),
            search_base_url: SEARCH_BASE_URL.to_string(),
            channel_capacity: 64,
        }
    }
}

impl CollectorConfig {
    /// Number of unique candidates to gather for `target` downloads.
    pub fn candidate_goal(&self, target: u32) -> usize {
        let target = target as usize;
        let surplus = (target * self.overcollect_percent as usize).div_ceil(100);
        target + surplus
    }

    /// Scroll attempts allowed for `target` downloads.
    pub fn scroll_ceiling(&self, target: u32) -> u32 {
        self.max_scrolls
            .unwrap_or_else(|| (target / 10 + 10).max(15))
    }
}

/// Tunables for the image downloader.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Concurrent fetches per term.
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Timeout for one fetch attempt.
    pub request_timeout: Duration,
    pub user_agent: String,
    pub referer: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(15),
            user_agent: USER_AGENT.to_string(),
            referer: SITE_REFERER.to_string(),
        }
    }
}

/// Bounded exponential backoff for per-candidate fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

fn env_flag(key: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => parse_flag(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_goal_adds_surplus() {
        let cfg = CollectorConfig::default();
        assert_eq!(cfg.candidate_goal(100), 120);
        assert_eq!(cfg.candidate_goal(3), 4);
        assert_eq!(cfg.candidate_goal(1), 2);
    }

    #[test]
    fn scroll_ceiling_scales_with_target() {
        let cfg = CollectorConfig::default();
        assert_eq!(cfg.scroll_ceiling(5), 15);
        assert_eq!(cfg.scroll_ceiling(200), 30);

        let fixed = CollectorConfig {
            max_scrolls: Some(4),
            ..CollectorConfig::default()
        };
        assert_eq!(fixed.scroll_ceiling(200), 4);
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("K", "YES").unwrap());
        assert!(!parse_flag("K", "0").unwrap());
        assert!(parse_flag("K", "maybe").is_err());
    }

    #[test]
    fn parse_value_reports_key() {
        let err = parse_value::<u32>("HARVEST_WORKERS", "many").unwrap_err();
        assert!(err.to_string().contains("HARVEST_WORKERS"));
    }
}
