//! Per-article fetch state machine
//!
//! ```text
//! Init → SkipCheck → EthicalCheck → MediaTypeSniff
//!      → DirectMediaFetch | WebContentFetch | PdfFetch
//!      → MediaPostProcess → Persisted
//! ```
//!
//! `Skipped` and `ErrorArticleSynthesized` are the terminal alternates. One
//! article never fails the batch: unrecoverable errors are written down as an
//! error article in the folder the article would have had.

mod direct;
mod error_article;
mod web;

pub use error_article::ErrorArticle;

use crate::error::Error;
use crate::media::MediaKind;
use crate::services::Services;
use crate::storage::Storage;
use crate::types::{Article, Event, FetchReport, FetchState, Outcome, ProgressCallback, SkipReason};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Name of the Markdown file written into every article folder
pub const ARTICLE_FILE: &str = "index.md";

/// Name of the transient raw HTML copy kept until conversion succeeded
pub const RAW_HTML_FILE: &str = "index.raw.html";

/// Fetches single articles into folders under a base directory
#[derive(Clone)]
pub struct FetchOrchestrator {
    services: Services,
    storage: Arc<dyn Storage>,
    download_all: bool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("download_all", &self.download_all)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// A successfully written article
#[derive(Debug)]
struct Archived {
    markdown_path: PathBuf,
    folder: PathBuf,
    title: String,
}

/// Where MediaTypeSniff sends an article
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Web,
    Pdf,
    Direct(MediaKind),
}

impl Route {
    /// Decide from the URL's file extension
    fn sniff(url: &str) -> Self {
        match MediaKind::from_url(url) {
            Some(MediaKind::Document) if has_extension(url, "pdf") => Route::Pdf,
            Some(kind) => Route::Direct(kind),
            None => Route::Web,
        }
    }

    /// Decide from a response content type; `None` means it is a page
    fn from_content_type(content_type: &str) -> Option<Self> {
        let (top, sub) = content_type.split_once('/')?;
        match (top, sub) {
            ("application", "pdf") => Some(Route::Pdf),
            ("image", _) => Some(Route::Direct(MediaKind::Image)),
            ("audio", _) => Some(Route::Direct(MediaKind::Audio)),
            ("video", _) => Some(Route::Direct(MediaKind::Video)),
            ("application", "epub+zip" | "msword" | "rtf")
            | ("application", "vnd.openxmlformats-officedocument.wordprocessingml.document") => {
                Some(Route::Direct(MediaKind::Document))
            }
            _ => None,
        }
    }

    fn state(&self) -> FetchState {
        match self {
            Route::Web => FetchState::WebContentFetch,
            Route::Pdf => FetchState::PdfFetch,
            Route::Direct(_) => FetchState::DirectMediaFetch,
        }
    }
}

fn has_extension(url: &str, ext: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(|last| last.to_ascii_lowercase()))
        })
        .is_some_and(|last| last.ends_with(&format!(".{ext}")))
}

/// Reports state changes to the callback, the event channel and the log
struct StateTracker<'a> {
    services: &'a Services,
    index: usize,
    progress: Option<ProgressCallback>,
    state: FetchState,
}

impl<'a> StateTracker<'a> {
    fn new(services: &'a Services, index: usize, progress: Option<ProgressCallback>) -> Self {
        Self {
            services,
            index,
            progress,
            state: FetchState::Init,
        }
    }

    fn enter(&mut self, state: FetchState) {
        tracing::trace!(index = self.index, from = %self.state, to = %state, "Article state");
        self.state = state;
        if let Some(progress) = &self.progress {
            progress(self.index, state);
        }
        self.services.emit(Event::ArticleState {
            index: self.index,
            state,
        });
    }
}

impl FetchOrchestrator {
    /// Orchestrator writing through `storage`, using the services' shutdown token
    pub fn new(services: Services, storage: Arc<dyn Storage>) -> Self {
        let download_all = services.config.media.download_all;
        let cancel = services.cancel_token();
        Self {
            services,
            storage,
            download_all,
            cancel,
        }
    }

    /// Override `media.download_all` for this orchestrator
    pub fn with_download_all(mut self, download_all: bool) -> Self {
        self.download_all = download_all;
        self
    }

    /// Use a different cancellation token (typically a child of the services' one)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The shared services
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Archive one article given by title and URL
    ///
    /// `index` identifies the article in progress callbacks and events.
    pub async fn fetch_article(
        &self,
        title: &str,
        url: &str,
        index: usize,
        base_folder: &Path,
        progress: Option<ProgressCallback>,
    ) -> FetchReport {
        self.fetch(&Article::new(title, url), index, base_folder, progress)
            .await
    }

    /// Archive one discovered article, keeping its discussion link
    pub async fn fetch(
        &self,
        article: &Article,
        index: usize,
        base_folder: &Path,
        progress: Option<ProgressCallback>,
    ) -> FetchReport {
        let mut tracker = StateTracker::new(&self.services, index, progress);
        self.services.emit(Event::ArticleStarted {
            index,
            url: article.url.clone(),
        });
        tracing::debug!(index, url = %article.url, title = %article.title, "Fetching article");

        let report = self.run(article, base_folder, &mut tracker).await;

        match &report.outcome {
            Outcome::Success(path) => {
                tracing::info!(url = %article.url, path = %path.display(), "Article archived");
            }
            Outcome::Skipped(reason) => {
                tracing::debug!(url = %article.url, %reason, "Article skipped");
            }
            Outcome::Failed(e) => {
                tracing::info!(url = %article.url, error = %e, "Article failed");
            }
        }
        self.services.emit(Event::ArticleFinished {
            index,
            url: article.url.clone(),
            outcome: report.outcome.kind(),
            folder: report.folder.clone(),
        });
        report
    }

    async fn run(
        &self,
        article: &Article,
        base_folder: &Path,
        tracker: &mut StateTracker<'_>,
    ) -> FetchReport {
        let url = article.url.trim();

        tracker.enter(FetchState::SkipCheck);
        match self.skip_check(url) {
            Ok(Some(reason)) => return self.skipped(tracker, reason, Some(&article.title)),
            Ok(None) => {}
            Err(e) => return self.error_article(article, base_folder, e, tracker).await,
        }

        tracker.enter(FetchState::EthicalCheck);
        if let Err(e) = self.services.ethical.check_allowed(url).await {
            let reason = if e.is_policy() {
                SkipReason::RobotsDisallowed {
                    url: url.to_string(),
                }
            } else {
                SkipReason::Cancelled
            };
            return self.skipped(tracker, reason, Some(&article.title));
        }

        tracker.enter(FetchState::MediaTypeSniff);
        let route = Route::sniff(url);
        tracker.enter(route.state());

        let outcome = match route {
            Route::Web => self.fetch_web(article, base_folder, tracker).await,
            Route::Pdf => {
                self.fetch_direct(article, MediaKind::Document, base_folder, tracker)
                    .await
            }
            Route::Direct(kind) => self.fetch_direct(article, kind, base_folder, tracker).await,
        };

        match outcome {
            Outcome::Success(archived) => {
                tracker.enter(FetchState::Persisted);
                FetchReport {
                    outcome: Outcome::Success(archived.markdown_path),
                    title: Some(archived.title),
                    folder: Some(archived.folder),
                    state: FetchState::Persisted,
                }
            }
            Outcome::Skipped(SkipReason::Cancelled) | Outcome::Failed(Error::Cancelled) => {
                self.skipped(tracker, SkipReason::Cancelled, Some(&article.title))
            }
            Outcome::Skipped(reason @ SkipReason::RetriesExhausted { .. }) => {
                self.exhausted_article(article, base_folder, reason, tracker)
                    .await
            }
            Outcome::Skipped(reason) => self.skipped(tracker, reason, Some(&article.title)),
            Outcome::Failed(e) => self.error_article(article, base_folder, e, tracker).await,
        }
    }

    /// `Ok(Some)` to skip, `Err` for URLs that cannot be fetched at all
    fn skip_check(&self, url: &str) -> crate::error::Result<Option<SkipReason>> {
        if self.cancel.is_cancelled() {
            return Ok(Some(SkipReason::Cancelled));
        }

        let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Ok(Some(SkipReason::UnsupportedScheme {
                scheme: parsed.scheme().to_string(),
            }));
        }

        if let Some(profile) = self.services.profiles.lookup(url)
            && let Some(pattern) = profile.skip_match(url)
        {
            return Ok(Some(SkipReason::FilteredUrl {
                pattern: pattern.to_string(),
            }));
        }

        if !self.services.session.insert(url) {
            return Ok(Some(SkipReason::AlreadyProcessed));
        }
        Ok(None)
    }

    fn skipped(
        &self,
        tracker: &mut StateTracker<'_>,
        reason: SkipReason,
        title: Option<&str>,
    ) -> FetchReport {
        tracker.enter(FetchState::Skipped);
        FetchReport {
            outcome: Outcome::Skipped(reason),
            title: title.map(str::to_string),
            folder: None,
            state: FetchState::Skipped,
        }
    }

    /// Source key and profile rules for `url`
    fn source_for(&self, url: &str) -> (String, Option<crate::source::SourceProfile>) {
        let profiles = &self.services.profiles;
        (profiles.source_key(url), profiles.lookup(url).cloned())
    }
}

#[cfg(test)]
mod tests;
