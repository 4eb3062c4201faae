//! Configuration types for article-archiver
//!
//! Every knob has a serde default, so an empty JSON object (or `Config::default()`)
//! gives a working, polite configuration. Durations are serialized as whole seconds.

use crate::error::{Error, Result};
use crate::timeout_tracker::TimeoutConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP client settings shared by page, media, robots.txt and feed requests
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header, also used to pick the robots.txt section
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Largest page body accepted, in bytes (default: 20 MiB)
    #[serde(default = "default_max_page_bytes")]
    pub max_page_bytes: u64,

    /// Timeouts used for robots.txt and feed requests (default: 10 seconds)
    #[serde(default = "default_auxiliary_timeout", with = "duration_serde")]
    pub auxiliary_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            max_page_bytes: default_max_page_bytes(),
            auxiliary_timeout: default_auxiliary_timeout(),
        }
    }
}

impl HttpConfig {
    /// The product token of the user agent (`"article-archiver"` for
    /// `"article-archiver/0.1 (+...)"`), used when matching robots.txt sections
    pub fn robots_agent(&self) -> &str {
        self.user_agent
            .split(['/', ' '])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("*")
    }
}

/// Transport-level retry configuration (exponential backoff with jitter)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first request (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Logical retry-and-skip settings for whole fetch operations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Attempts per URL before the operation is recorded as skipped (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff step between attempts (default: 2 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,

    /// Try the Wayback Machine copy when every other URL failed (default: false)
    #[serde(default)]
    pub archive_fallback: bool,

    /// Look for an RSS/Atom alternative when writing an error article (default: true)
    #[serde(default = "default_true")]
    pub discover_feed_alternative: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            archive_fallback: false,
            discover_feed_alternative: true,
        }
    }
}

/// Adaptive timeout settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Timeouts used when no override or adaptive recommendation applies
    #[serde(default)]
    pub default: TimeoutConfig,

    /// Derive per-source timeouts from observed latency (default: true)
    #[serde(default = "default_true")]
    pub adaptive: bool,

    /// Samples needed before a recommendation is trusted (default: 10)
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Response times remembered per source (default: 100)
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            default: TimeoutConfig::default(),
            adaptive: true,
            min_samples: default_min_samples(),
            history_capacity: default_history_capacity(),
        }
    }
}

/// robots.txt and politeness settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EthicsConfig {
    /// Honor robots.txt allow/disallow rules (default: true)
    #[serde(default = "default_true")]
    pub respect_robots_txt: bool,

    /// How long a fetched robots.txt stays valid (default: 15 minutes)
    #[serde(default = "default_robots_ttl", with = "duration_serde")]
    pub robots_ttl: Duration,

    /// Floor for the spacing between two requests to one host (default: 1 second)
    #[serde(default = "default_min_crawl_delay", with = "duration_serde")]
    pub min_crawl_delay: Duration,

    /// Retries after a 429/503 before giving up (default: 3)
    #[serde(default = "default_max_backoff_retries")]
    pub max_backoff_retries: u32,

    /// Longest single backoff wait, including `Retry-After` values (default: 120 seconds)
    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff: Duration,
}

impl Default for EthicsConfig {
    fn default() -> Self {
        Self {
            respect_robots_txt: true,
            robots_ttl: default_robots_ttl(),
            min_crawl_delay: default_min_crawl_delay(),
            max_backoff_retries: default_max_backoff_retries(),
            max_backoff: default_max_backoff(),
        }
    }
}

/// Shared HTML→Markdown conversion pool settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Conversions allowed to run at once across the whole process (default: 4)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Time a caller waits for one conversion (default: 30 seconds)
    #[serde(default = "default_conversion_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            timeout: default_conversion_timeout(),
        }
    }
}

/// Embedded media discovery and download settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Download documents, audio and video as well as images (default: false)
    #[serde(default)]
    pub download_all: bool,

    /// Concurrent media downloads per article (default: 4)
    #[serde(default = "default_media_workers")]
    pub max_workers: usize,

    /// Image cap per article when `download_all` is on (default: 50)
    #[serde(default = "default_max_images")]
    pub max_images: usize,

    /// Image cap per article when `download_all` is off (default: 20)
    #[serde(default = "default_max_images_restricted")]
    pub max_images_restricted: usize,

    /// Largest image when `download_all` is on (default: 20 MiB)
    #[serde(default = "default_image_max_bytes")]
    pub image_max_bytes: u64,

    /// Largest image when `download_all` is off (default: 5 MiB)
    #[serde(default = "default_image_max_bytes_restricted")]
    pub image_max_bytes_restricted: u64,

    /// Largest document (default: 50 MiB)
    #[serde(default = "default_document_max_bytes")]
    pub document_max_bytes: u64,

    /// Largest audio file (default: 100 MiB)
    #[serde(default = "default_audio_max_bytes")]
    pub audio_max_bytes: u64,

    /// Largest video file (default: 250 MiB)
    #[serde(default = "default_video_max_bytes")]
    pub video_max_bytes: u64,

    /// Run the full-page image scan when primary extraction finds too few images (default: true)
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,

    /// Fewer saved images than this triggers the fallback scan (default: 2)
    #[serde(default = "default_fallback_min_images")]
    pub fallback_min_images: usize,

    /// Declared width or height below this excludes an image from the fallback scan (default: 150)
    #[serde(default = "default_fallback_min_dimension")]
    pub fallback_min_dimension: u32,

    /// Images the fallback scan may add (default: 10)
    #[serde(default = "default_fallback_max_images")]
    pub fallback_max_images: usize,

    /// class/id/alt/src fragments marking page chrome in the fallback scan
    #[serde(default = "default_chrome_deny_list")]
    pub chrome_deny_list: Vec<String>,

    /// URL fragments marking tracking pixels, rejected before any request
    #[serde(default = "default_tracking_keywords")]
    pub tracking_keywords: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            download_all: false,
            max_workers: default_media_workers(),
            max_images: default_max_images(),
            max_images_restricted: default_max_images_restricted(),
            image_max_bytes: default_image_max_bytes(),
            image_max_bytes_restricted: default_image_max_bytes_restricted(),
            document_max_bytes: default_document_max_bytes(),
            audio_max_bytes: default_audio_max_bytes(),
            video_max_bytes: default_video_max_bytes(),
            fallback_enabled: true,
            fallback_min_images: default_fallback_min_images(),
            fallback_min_dimension: default_fallback_min_dimension(),
            fallback_max_images: default_fallback_max_images(),
            chrome_deny_list: default_chrome_deny_list(),
            tracking_keywords: default_tracking_keywords(),
        }
    }
}

/// Batch processing settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Articles processed concurrently (default: 8)
    #[serde(default = "default_batch_workers")]
    pub max_workers: usize,

    /// Articles requested from each source (default: 30)
    #[serde(default = "default_articles_per_source")]
    pub articles_per_source: usize,

    /// Interval between progress events (default: 2 seconds)
    #[serde(default = "default_progress_interval", with = "duration_serde")]
    pub progress_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_batch_workers(),
            articles_per_source: default_articles_per_source(),
            progress_interval: default_progress_interval(),
        }
    }
}

/// A per-site profile: which hosts it covers and how they are treated
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SourceProfileConfig {
    /// Profile tag; also the key for timeout history
    pub tag: String,

    /// Host patterns (`example.com` or `*.example.com`; both cover subdomains)
    pub hosts: Vec<String>,

    /// Regexes matched against the full URL; a match skips the article
    #[serde(default)]
    pub skip_patterns: Vec<String>,

    /// Declared minimum spacing between requests
    #[serde(default, with = "optional_duration_serde")]
    pub crawl_delay: Option<Duration>,

    /// Static timeout override for this source
    #[serde(default)]
    pub timeouts: Option<TimeoutConfig>,

    /// CSS selector for the main content element
    #[serde(default)]
    pub content_selector: Option<String>,
}

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Transport retry (exponential backoff)
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logical retry-and-skip
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Adaptive timeouts
    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// robots.txt and politeness
    #[serde(default)]
    pub ethics: EthicsConfig,

    /// Shared conversion pool
    #[serde(default)]
    pub conversion: ConversionConfig,

    /// Media pipeline
    #[serde(default)]
    pub media: MediaConfig,

    /// Batch processing
    #[serde(default)]
    pub batch: BatchConfig,

    /// Per-site profiles; checked before the built-in ones
    #[serde(default)]
    pub profiles: Vec<SourceProfileConfig>,
}

impl Config {
    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or disable the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.conversion.pool_size == 0 {
            return Err(Error::config("conversion.pool_size", "must be at least 1"));
        }
        if self.media.max_workers == 0 {
            return Err(Error::config("media.max_workers", "must be at least 1"));
        }
        if self.batch.max_workers == 0 {
            return Err(Error::config("batch.max_workers", "must be at least 1"));
        }
        if self.fetch.max_retries == 0 {
            return Err(Error::config("fetch.max_retries", "must be at least 1"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        if self.timeouts.history_capacity == 0 {
            return Err(Error::config(
                "timeouts.history_capacity",
                "must be at least 1",
            ));
        }
        if self.http.user_agent.trim().is_empty() {
            return Err(Error::config("http.user_agent", "must not be empty"));
        }
        for profile in &self.profiles {
            if profile.tag.is_empty() {
                return Err(Error::config("profiles.tag", "must not be empty"));
            }
            if profile.hosts.is_empty() {
                return Err(Error::config(
                    "profiles.hosts",
                    format!("profile '{}' lists no hosts", profile.tag),
                ));
            }
        }
        Ok(())
    }
}

fn default_user_agent() -> String {
    format!("article-archiver/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_page_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_auxiliary_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_min_samples() -> usize {
    10
}

fn default_history_capacity() -> usize {
    100
}

fn default_robots_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_min_crawl_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff_retries() -> u32 {
    3
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(120)
}

fn default_pool_size() -> usize {
    4
}

fn default_conversion_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_media_workers() -> usize {
    4
}

fn default_max_images() -> usize {
    50
}

fn default_max_images_restricted() -> usize {
    20
}

fn default_image_max_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_image_max_bytes_restricted() -> u64 {
    5 * 1024 * 1024
}

fn default_document_max_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_audio_max_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_video_max_bytes() -> u64 {
    250 * 1024 * 1024
}

fn default_fallback_min_images() -> usize {
    2
}

fn default_fallback_min_dimension() -> u32 {
    150
}

fn default_fallback_max_images() -> usize {
    10
}

fn default_chrome_deny_list() -> Vec<String> {
    [
        "logo", "icon", "avatar", "nav", "banner", "pixel", "beacon", "tracker", "1x1", "sprite",
        "badge", "button", "emoji", "gravatar", "spinner", "spacer",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_tracking_keywords() -> Vec<String> {
    [
        "pixel", "beacon", "tracker", "tracking", "analytics", "spacer", "1x1", "blank.gif",
        "transparent.gif", "doubleclick",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_batch_workers() -> usize {
    8
}

fn default_articles_per_source() -> usize {
    30
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(2)
}

// Duration serialization helper (whole seconds)
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
pub(crate) mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
