//! robots.txt compliance and per-host politeness
//!
//! [`EthicalScrapingManager`] keeps one robots.txt per origin (cached for
//! `ethics.robots_ttl`), reserves request slots per host so consecutive requests
//! respect the crawl delay, and backs off when a server answers 429 or 503.

use crate::config::{EthicsConfig, HttpConfig};
use crate::error::{Error, Result};
use crate::robots::RobotsRules;
use reqwest::Client;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone)]
struct RobotsCacheEntry {
    rules: RobotsRules,
    fetched_at: Instant,
}

/// robots.txt cache, crawl-delay gate and 429/503 backoff
#[derive(Debug)]
pub struct EthicalScrapingManager {
    config: EthicsConfig,
    user_agent: String,
    robots_agent: String,
    client: Client,
    robots: Mutex<HashMap<String, RobotsCacheEntry>>,
    slots: Mutex<HashMap<String, Instant>>,
}

impl EthicalScrapingManager {
    /// Create a manager with its own client for robots.txt requests
    pub fn new(config: EthicsConfig, http: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&http.user_agent)
            .timeout(http.auxiliary_timeout)
            .connect_timeout(http.auxiliary_timeout)
            .build()?;

        Ok(Self {
            config,
            user_agent: http.user_agent.clone(),
            robots_agent: http.robots_agent().to_string(),
            client,
            robots: Mutex::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Rules for the URL's origin, fetched when missing or older than the TTL
    pub async fn get_robots(&self, url: &Url) -> RobotsRules {
        let origin = url.origin().ascii_serialization();

        {
            let cache = lock(&self.robots);
            if let Some(entry) = cache.get(&origin)
                && entry.fetched_at.elapsed() < self.config.robots_ttl
            {
                return entry.rules.clone();
            }
        }

        let rules = self.fetch_robots(&origin).await;
        lock(&self.robots).insert(
            origin,
            RobotsCacheEntry {
                rules: rules.clone(),
                fetched_at: Instant::now(),
            },
        );
        rules
    }

    async fn fetch_robots(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{origin}/robots.txt");
        tracing::debug!(url = %robots_url, "Fetching robots.txt");

        match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(text) => RobotsRules::parse(text, &self.robots_agent),
                Err(e) => {
                    tracing::warn!(url = %robots_url, error = %e, "Failed to read robots.txt, allowing all");
                    RobotsRules::allow_all()
                }
            },
            Ok(response) if response.status().is_client_error() => {
                tracing::debug!(url = %robots_url, status = %response.status(), "No robots.txt, allowing all");
                RobotsRules::allow_all()
            }
            Ok(response) => {
                // fail open rather than hammering a struggling server
                tracing::warn!(url = %robots_url, status = %response.status(), "robots.txt unavailable, allowing all");
                RobotsRules::allow_all()
            }
            Err(e) => {
                tracing::warn!(url = %robots_url, error = %e, "robots.txt fetch failed, allowing all");
                RobotsRules::allow_all()
            }
        }
    }

    /// Whether robots.txt lets us fetch `url`
    pub async fn can_fetch(&self, url: &str) -> bool {
        if !self.config.respect_robots_txt {
            return true;
        }
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return true;
        }
        self.get_robots(&parsed)
            .await
            .is_allowed(&parsed, &self.robots_agent)
    }

    /// `Err(Error::PolicyDisallowed)` when robots.txt forbids `url`
    pub async fn check_allowed(&self, url: &str) -> Result<()> {
        if self.can_fetch(url).await {
            Ok(())
        } else {
            tracing::info!(url, user_agent = %self.user_agent, "Blocked by robots.txt");
            Err(Error::PolicyDisallowed {
                url: url.to_string(),
            })
        }
    }

    /// Spacing to keep between requests to the URL's host
    ///
    /// The largest of the robots.txt crawl-delay, the profile's declared delay and
    /// the configured minimum.
    pub async fn crawl_delay(&self, url: &str, declared: Option<Duration>) -> Duration {
        let mut delay = self.config.min_crawl_delay;
        if let Some(declared) = declared {
            delay = delay.max(declared);
        }
        if self.config.respect_robots_txt
            && let Ok(parsed) = Url::parse(url)
            && let Some(robots_delay) = self.get_robots(&parsed).await.crawl_delay()
        {
            delay = delay.max(robots_delay);
        }
        delay
    }

    /// Wait until a request to `host` is allowed, reserving the slot
    ///
    /// The slot is stamped under the lock before sleeping, so concurrent callers
    /// queue up `delay` apart.
    pub async fn enforce(&self, host: &str, delay: Duration, cancel: &CancellationToken) -> Result<()> {
        let ready = {
            let mut slots = lock(&self.slots);
            let now = Instant::now();
            let ready = match slots.get(host) {
                Some(last) => (*last + delay).max(now),
                None => now,
            };
            slots.insert(host.to_string(), ready);
            ready
        };

        if ready > Instant::now() {
            tracing::trace!(host, wait_ms = (ready - Instant::now()).as_millis(), "Waiting for crawl delay");
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep_until(ready) => {}
            }
        }
        Ok(())
    }

    /// Send a request with crawl-delay spacing and 429/503 backoff
    ///
    /// On 429 the wait is the `Retry-After` value (seconds or HTTP date) when
    /// present, else the current backoff; on 503 the backoff doubles every retry.
    /// Waits are capped at `ethics.max_backoff`. After `ethics.max_backoff_retries`
    /// retries the result is `Error::RateLimited`. Other statuses are returned as-is.
    pub async fn request_with_backoff<F, Fut>(
        &self,
        url: &str,
        delay: Duration,
        cancel: &CancellationToken,
        mut send: F,
    ) -> Result<reqwest::Response>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<reqwest::Response>>,
    {
        let host = host_key(url)?;
        let mut backoff = delay.max(Duration::from_secs(1));
        let mut retries = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.enforce(&host, delay, cancel).await?;

            let response = send().await?;
            let status = response.status().as_u16();
            if !is_backoff_status(status) {
                return Ok(response);
            }

            if retries >= self.config.max_backoff_retries {
                tracing::warn!(url, status, attempts = retries + 1, "Still rate limited, giving up");
                return Err(Error::RateLimited {
                    url: url.to_string(),
                    status,
                    attempts: retries + 1,
                });
            }
            retries += 1;

            let wait = if status == 429 {
                retry_after(&response).unwrap_or(backoff)
            } else {
                backoff
            };
            let wait = wait.min(self.config.max_backoff);
            backoff = (backoff * 2).min(self.config.max_backoff);

            tracing::warn!(
                url,
                status,
                retry = retries,
                wait_ms = wait.as_millis(),
                "Rate limited, backing off"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Drop every cached robots.txt
    pub fn clear_robots_cache(&self) {
        lock(&self.robots).clear();
    }
}

/// Statuses answered with backoff here; callers never retry them again
pub fn is_backoff_status(status: u16) -> bool {
    matches!(status, 429 | 503)
}

/// Host (with port when explicit) used as the crawl-delay key
pub fn host_key(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let host = parsed.host_str().ok_or_else(|| Error::InvalidUrl {
        url: url.to_string(),
        reason: "missing host".to_string(),
    })?;
    Ok(match parsed.port() {
        Some(port) => format!("{}:{port}", host.to_ascii_lowercase()),
        None => host.to_ascii_lowercase(),
    })
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()
        .and_then(parse_retry_after)
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP date
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
