//! Article sources and per-site profiles
//!
//! A [`SourceAdapter`] lists articles for one source; [`FeedSource`] does so from
//! an RSS 2.0 or Atom feed. [`SourceProfiles`] maps hosts to the handling rules
//! of a site (discussion links to skip, declared crawl delay, timeout override,
//! content selector) so the fetch pipeline needs one table lookup per URL instead
//! of host-specific branches.

use crate::config::SourceProfileConfig;
use crate::conversion::run_blocking;
use crate::error::{Error, Result};
use crate::http::{HttpFetcher, RequestContext};
use crate::services::Services;
use crate::timeout_tracker::{TimeoutConfig, TimeoutTracker};
use crate::types::Article;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Handling rules for one site
#[derive(Debug, Clone)]
pub struct SourceProfile {
    /// Profile tag; also the timeout-history key of every URL it covers
    pub tag: String,
    /// Normalized host patterns
    pub hosts: Vec<String>,
    /// URLs matching any of these are skipped
    pub skip_patterns: Vec<Regex>,
    /// Declared minimum spacing between requests
    pub crawl_delay: Option<Duration>,
    /// Static timeout override
    pub timeouts: Option<TimeoutConfig>,
    /// CSS selector for the main content element
    pub content_selector: Option<String>,
}

impl SourceProfile {
    /// Build a profile from configuration; invalid skip patterns are logged and dropped
    pub fn from_config(config: &SourceProfileConfig) -> Self {
        Self {
            tag: config.tag.clone(),
            hosts: config.hosts.iter().map(|h| normalize_host(h)).collect(),
            skip_patterns: compile_patterns(&config.skip_patterns, &config.tag),
            crawl_delay: config.crawl_delay,
            timeouts: config.timeouts,
            content_selector: config.content_selector.clone(),
        }
    }

    /// True when `host` is one of the profile's hosts or a subdomain of one
    pub fn matches_host(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.hosts.iter().any(|pattern| {
            host == *pattern
                || host
                    .strip_suffix(pattern.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// The first skip pattern matching `url`
    pub fn skip_match(&self, url: &str) -> Option<&str> {
        self.skip_patterns
            .iter()
            .find(|re| re.is_match(url))
            .map(|re| re.as_str())
    }
}

/// Lowercase, without a `*.` wildcard or `www.` prefix
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let host = host.strip_prefix("*.").unwrap_or(&host);
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

/// Compile skip patterns, logging and skipping invalid ones
fn compile_patterns(patterns: &[String], tag: &str) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| {
            // size limit keeps a hostile config from building a huge DFA
            regex::RegexBuilder::new(pattern)
                .size_limit(1024 * 1024)
                .build()
                .map_err(|e| {
                    tracing::warn!(profile = tag, pattern, error = %e, "Invalid skip pattern");
                })
                .ok()
        })
        .collect()
}

/// Host → profile table; configured profiles are checked before built-in ones
#[derive(Debug, Clone)]
pub struct SourceProfiles {
    profiles: Vec<SourceProfile>,
}

impl SourceProfiles {
    /// Configured profiles followed by the built-in ones
    pub fn new(configured: &[SourceProfileConfig]) -> Self {
        let mut profiles: Vec<SourceProfile> =
            configured.iter().map(SourceProfile::from_config).collect();
        profiles.extend(builtin_profiles());
        Self { profiles }
    }

    /// Profile covering the URL's host
    pub fn lookup(&self, url: &str) -> Option<&SourceProfile> {
        let host = Url::parse(url).ok()?.host_str()?.to_string();
        self.profiles.iter().find(|p| p.matches_host(&host))
    }

    /// Timeout-history key: the profile tag, or the normalized host
    pub fn source_key(&self, url: &str) -> String {
        if let Some(profile) = self.lookup(url) {
            return profile.tag.clone();
        }
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(normalize_host))
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Register every static timeout override with the tracker
    ///
    /// Earlier profiles win when two share a tag.
    pub fn register_timeouts(&self, tracker: &TimeoutTracker) {
        for profile in self.profiles.iter().rev() {
            if let Some(timeouts) = profile.timeouts {
                tracker.set_override(&profile.tag, timeouts);
            }
        }
    }

    /// All profiles in lookup order
    pub fn profiles(&self) -> &[SourceProfile] {
        &self.profiles
    }
}

impl Default for SourceProfiles {
    fn default() -> Self {
        Self::new(&[])
    }
}

fn builtin_profiles() -> Vec<SourceProfile> {
    [
        SourceProfileConfig {
            tag: "hackernews".to_string(),
            hosts: vec!["news.ycombinator.com".to_string()],
            skip_patterns: vec![r"news\.ycombinator\.com/item\?id=".to_string()],
            ..Default::default()
        },
        SourceProfileConfig {
            tag: "lobsters".to_string(),
            hosts: vec!["lobste.rs".to_string()],
            skip_patterns: vec![r"lobste\.rs/s/".to_string()],
            ..Default::default()
        },
    ]
    .iter()
    .map(SourceProfile::from_config)
    .collect()
}

/// Something that lists articles to archive
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier used in summaries and events
    fn id(&self) -> &str;

    /// Up to `count` articles, newest first
    async fn discover(&self, count: usize) -> Result<Vec<Article>>;
}

/// Source id → adapter
#[derive(Default, Clone)]
pub struct SourceRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.adapters.keys().collect();
        ids.sort();
        f.debug_struct("SourceRegistry").field("sources", &ids).finish()
    }
}

impl SourceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter, replacing any adapter with the same id
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    /// Adapter by id
    pub fn get(&self, id: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(id).cloned()
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered adapters
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Articles listed in an RSS 2.0 or Atom feed
#[derive(Debug)]
pub struct FeedSource {
    id: String,
    url: String,
    timeout_key: Option<String>,
    fetcher: Arc<HttpFetcher>,
    cancel: CancellationToken,
}

impl FeedSource {
    /// Feed source fetching `url` through the shared fetcher
    ///
    /// The feed request stops when `services` shuts down.
    pub fn new(id: impl Into<String>, url: impl Into<String>, services: &Services) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            timeout_key: None,
            fetcher: services.fetcher.clone(),
            cancel: services.cancel_token(),
        }
    }

    /// Share a profile's timeout history instead of keeping one under the source id
    pub fn with_timeout_key(mut self, tag: impl Into<String>) -> Self {
        self.timeout_key = Some(tag.into());
        self
    }

    /// Abort the feed request when `cancel` fires instead of at shutdown
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl SourceAdapter for FeedSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn discover(&self, count: usize) -> Result<Vec<Article>> {
        tracing::debug!(source = %self.id, url = %self.url, "Checking feed");

        let ethical = self.fetcher.ethical();
        ethical.check_allowed(&self.url).await?;
        let key = self.timeout_key.as_deref().unwrap_or(&self.id);
        let ctx = RequestContext {
            source: key,
            timeouts: self.fetcher.tracker().resolve(key),
            crawl_delay: ethical.crawl_delay(&self.url, None).await,
            max_bytes: 10 * 1024 * 1024,
            cancel: &self.cancel,
        };
        let response = self.fetcher.get(&self.url, &ctx).await?;

        let base = Url::parse(&response.url).or_else(|_| Url::parse(&self.url)).ok();
        let body = response.body;
        let mut articles = run_blocking(move || parse_feed(&body, base.as_ref())).await??;
        articles.truncate(count);
        tracing::debug!(source = %self.id, count = articles.len(), "Feed parsed");
        Ok(articles)
    }
}

/// Parse a feed body, RSS first and Atom as the fallback
///
/// Items without a link are dropped; relative links are resolved against `base`.
pub fn parse_feed(body: &[u8], base: Option<&Url>) -> Result<Vec<Article>> {
    match parse_as_rss(body, base) {
        Ok(articles) => Ok(articles),
        Err(rss_err) => {
            tracing::debug!(error = %rss_err, "Not an RSS feed, trying Atom");
            parse_as_atom(body, base).map_err(|atom_err| {
                Error::Feed(format!(
                    "not RSS ({rss_err}) or Atom ({atom_err})"
                ))
            })
        }
    }
}

fn parse_as_rss(body: &[u8], base: Option<&Url>) -> std::result::Result<Vec<Article>, String> {
    let channel = rss::Channel::read_from(body).map_err(|e| e.to_string())?;

    Ok(channel
        .items()
        .iter()
        .filter_map(|item| {
            let url = resolve(item.link()?, base)?;
            Some(Article {
                title: item.title().unwrap_or(&url).trim().to_string(),
                comment_url: item.comments().and_then(|c| resolve(c, base)),
                url,
            })
        })
        .collect())
}

fn parse_as_atom(body: &[u8], base: Option<&Url>) -> std::result::Result<Vec<Article>, String> {
    let feed = atom_syndication::Feed::read_from(body).map_err(|e| e.to_string())?;

    Ok(feed
        .entries()
        .iter()
        .filter_map(|entry| {
            let link = entry
                .links()
                .iter()
                .find(|l| l.rel() == "alternate")
                .or_else(|| entry.links().first())?;
            let url = resolve(link.href(), base)?;
            let comment_url = entry
                .links()
                .iter()
                .find(|l| l.rel() == "replies")
                .and_then(|l| resolve(l.href(), base));
            let title = entry.title().as_str().trim();
            Some(Article {
                title: if title.is_empty() { url.clone() } else { title.to_string() },
                url,
                comment_url,
            })
        })
        .collect())
}

fn resolve(link: &str, base: Option<&Url>) -> Option<String> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }
    match Url::parse(link) {
        Ok(url) => Some(url.to_string()),
        Err(_) => base?.join(link).ok().map(|u| u.to_string()),
    }
}
