//! ErrorArticleSynthesized: a document explaining why a URL was not archived

use super::{ARTICLE_FILE, FetchOrchestrator, StateTracker};
use crate::conversion::run_blocking;
use crate::error::{Error, ErrorCategory};
use crate::html;
use crate::http::RequestContext;
use crate::timeout_tracker::TimeoutConfig;
use crate::types::{Article, FetchReport, FetchState, Outcome, SkipReason};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;
use url::Url;

/// Well-known feed locations tried when the home page advertises none
const COMMON_FEED_PATHS: &[&str] = &["/feed", "/rss", "/feed.xml", "/atom.xml", "/index.xml"];

/// Feed candidates verified per error article
const MAX_FEED_PROBES: usize = 4;

/// Largest home page or feed body read while looking for an alternative
const MAX_PROBE_BYTES: u64 = 2 * 1024 * 1024;

/// Why an article could not be archived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorArticle {
    /// Listed title
    pub title: String,
    /// Article URL
    pub url: String,
    /// Failure classification
    pub category: ErrorCategory,
    /// HTTP status, when the server answered
    pub status: Option<u16>,
    /// Error text
    pub detail: String,
    /// Attempts made, when the retry budget ran out
    pub attempts: Option<u32>,
    /// When the fetch was given up
    pub timestamp: DateTime<Utc>,
    /// A verified RSS/Atom feed of the same site
    pub feed_alternative: Option<String>,
}

impl ErrorArticle {
    /// Describe a failed fetch
    pub fn from_error(article: &Article, error: &Error) -> Self {
        Self {
            title: article.title.clone(),
            url: article.url.clone(),
            category: error.category(),
            status: error.status(),
            detail: error.to_string(),
            attempts: None,
            timestamp: Utc::now(),
            feed_alternative: None,
        }
    }

    /// Describe a fetch whose retry budget ran out; `None` for other skip reasons
    pub fn from_skip(article: &Article, reason: &SkipReason) -> Option<Self> {
        let SkipReason::RetriesExhausted {
            attempts,
            category,
            status,
            last_error,
        } = reason
        else {
            return None;
        };
        Some(Self {
            title: article.title.clone(),
            url: article.url.clone(),
            category: *category,
            status: *status,
            detail: last_error.clone(),
            attempts: Some(*attempts),
            timestamp: Utc::now(),
            feed_alternative: None,
        })
    }

    /// The Markdown document
    pub fn render(&self) -> String {
        let title = if self.title.trim().is_empty() {
            self.url.as_str()
        } else {
            self.title.trim()
        };

        let mut doc = format!("# {title}\n\n");
        doc.push_str(&format!("> **{}**", self.category.headline()));
        if let Some(status) = self.status {
            doc.push_str(&format!(" (HTTP {status})"));
        }
        doc.push_str("\n\n");
        doc.push_str(&format!(
            "The article at <{}> could not be archived.\n\n",
            self.url
        ));
        doc.push_str(&format!("- Category: {}\n", self.category));
        if let Some(status) = self.status {
            doc.push_str(&format!("- HTTP status: {status}\n"));
        }
        if let Some(attempts) = self.attempts {
            doc.push_str(&format!("- Attempts: {attempts}\n"));
        }
        doc.push_str(&format!("- Error: {}\n", self.detail));
        doc.push_str(&format!(
            "- Attempted: {}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        if let Some(feed) = &self.feed_alternative {
            doc.push_str(&format!(
                "\n## Alternative\n\nThe site publishes a feed that may carry this article: <{feed}>\n"
            ));
        }
        doc
    }
}

impl FetchOrchestrator {
    pub(super) async fn error_article(
        &self,
        article: &Article,
        base_folder: &Path,
        error: Error,
        tracker: &mut StateTracker<'_>,
    ) -> FetchReport {
        let report = ErrorArticle::from_error(article, &error);
        self.write_error_article(report, base_folder, Outcome::Failed(error), tracker)
            .await
    }

    pub(super) async fn exhausted_article(
        &self,
        article: &Article,
        base_folder: &Path,
        reason: SkipReason,
        tracker: &mut StateTracker<'_>,
    ) -> FetchReport {
        match ErrorArticle::from_skip(article, &reason) {
            Some(report) => {
                self.write_error_article(report, base_folder, Outcome::Skipped(reason), tracker)
                    .await
            }
            None => self.skipped(tracker, reason, Some(&article.title)),
        }
    }

    async fn write_error_article(
        &self,
        mut report: ErrorArticle,
        base_folder: &Path,
        outcome: Outcome<std::path::PathBuf>,
        tracker: &mut StateTracker<'_>,
    ) -> FetchReport {
        tracing::info!(
            url = %report.url,
            category = %report.category,
            status = ?report.status,
            "Writing error article"
        );

        // only worth probing when the server answered at all
        if self.services.config.fetch.discover_feed_alternative
            && report.status.is_some()
            && !self.cancel.is_cancelled()
        {
            report.feed_alternative = self.find_feed_alternative(&report.url).await;
        }

        tracker.enter(FetchState::ErrorArticleSynthesized);
        let title = if report.title.trim().is_empty() {
            report.url.clone()
        } else {
            report.title.clone()
        };

        let folder = match self.storage.create_article_folder(base_folder, &title).await {
            Ok(folder) => folder,
            Err(e) => {
                tracing::error!(url = %report.url, error = %e, "Could not create error article folder");
                return FetchReport {
                    outcome,
                    title: Some(title),
                    folder: None,
                    state: FetchState::ErrorArticleSynthesized,
                };
            }
        };
        let written = self
            .storage
            .save(&folder, ARTICLE_FILE, report.render().as_bytes())
            .await;
        if let Err(e) = written {
            tracing::error!(url = %report.url, error = %e, "Could not write error article");
        }

        FetchReport {
            outcome,
            title: Some(title),
            folder: Some(folder),
            state: FetchState::ErrorArticleSynthesized,
        }
    }

    /// First RSS/Atom feed of the URL's site that actually parses
    ///
    /// Feeds advertised by the home page come first, then common locations.
    async fn find_feed_alternative(&self, url: &str) -> Option<String> {
        let page = Url::parse(url).ok()?;
        let home = page.join("/").ok()?;
        let source = self.services.profiles.source_key(url);
        let timeout = self.services.config.http.auxiliary_timeout;
        let timeouts = TimeoutConfig::new(timeout, timeout, timeout * 2);

        let mut candidates = Vec::new();
        if let Some(body) = self.probe(home.as_str(), &source, timeouts).await {
            let base = home.clone();
            let advertised = run_blocking(move || {
                html::find_feed_links(&String::from_utf8_lossy(&body), &base)
            })
            .await;
            candidates.extend(advertised.unwrap_or_default());
        }
        for path in COMMON_FEED_PATHS {
            if let Ok(candidate) = home.join(path) {
                let candidate = candidate.to_string();
                if !candidates.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
        }

        for candidate in candidates.into_iter().take(MAX_FEED_PROBES) {
            if self.cancel.is_cancelled() {
                return None;
            }
            let Some(body) = self.probe(&candidate, &source, timeouts).await else {
                continue;
            };
            if run_blocking(move || html::is_feed(&body)).await.unwrap_or(false) {
                tracing::debug!(url, feed = %candidate, "Found feed alternative");
                return Some(candidate);
            }
        }
        None
    }

    async fn probe(&self, url: &str, source: &str, timeouts: TimeoutConfig) -> Option<Vec<u8>> {
        let ethical = &self.services.ethical;
        if !ethical.can_fetch(url).await {
            return None;
        }
        let ctx = RequestContext {
            source,
            timeouts,
            crawl_delay: ethical.crawl_delay(url, None).await,
            max_bytes: MAX_PROBE_BYTES,
            cancel: &self.cancel,
        };
        match self.services.fetcher.get(url, &ctx).await {
            Ok(response) => Some(response.body),
            Err(e) => {
                tracing::trace!(url, error = %e, "Feed probe failed");
                None
            }
        }
    }
}
