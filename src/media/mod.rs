//! Embedded media pipeline
//!
//! For one article:
//! 1. Discover - images, linked documents, audio and video in the content
//! 2. Pre-filter - drop tracking pixels before any request
//! 3. Policy - kind and count limits depending on `download_all`
//! 4. Download - bounded concurrency, one fetch per URL
//! 5. Rewrite - point Markdown references at the local files
//! 6. Fallback - scan the whole page when too few images were saved

use crate::config::MediaConfig;
use crate::conversion::run_blocking;
use crate::ethical::host_key;
use crate::http::{HttpFetcher, RequestContext};
use crate::timeout_tracker::TimeoutConfig;
use crate::types::Event;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;

pub mod discovery;
pub mod download;
pub mod fallback;
pub mod filter;
pub mod rewrite;

pub use download::DownloadCache;

/// Kind of embedded media; decides the subfolder and size cap
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Pictures (always attempted)
    Image,
    /// PDFs, office documents, ebooks
    Document,
    /// Audio files
    Audio,
    /// Video files
    Video,
}

impl MediaKind {
    /// Subfolder of the article folder
    pub fn dir_name(&self) -> &'static str {
        match self {
            MediaKind::Image => "images",
            MediaKind::Document => "documents",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Extension used when the URL has none
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Document => "pdf",
            MediaKind::Audio => "mp3",
            MediaKind::Video => "mp4",
        }
    }

    /// Classify a file extension (case-insensitive)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "svg" | "avif" | "bmp" | "tif" | "tiff"
            | "ico" => Some(MediaKind::Image),
            "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "odt" | "ods" | "odp"
            | "epub" | "rtf" | "csv" => Some(MediaKind::Document),
            "mp3" | "m4a" | "aac" | "ogg" | "oga" | "wav" | "flac" | "opus" => {
                Some(MediaKind::Audio)
            }
            "mp4" | "m4v" | "webm" | "mov" | "mkv" | "avi" | "ogv" => Some(MediaKind::Video),
            _ => None,
        }
    }

    /// Classify a URL by the extension of its path
    pub fn from_url(url: &str) -> Option<Self> {
        let parsed = Url::parse(url).ok()?;
        let last = parsed.path_segments()?.next_back()?;
        let (_, ext) = last.rsplit_once('.')?;
        Self::from_extension(ext)
    }
}

/// One piece of media referenced by an article
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaCandidate {
    /// Kind, by extension then tag context
    pub kind: MediaKind,
    /// Absolute http(s) URL without fragment
    pub url: String,
    /// Alt text or link text
    pub label: String,
    /// References as written in the page, for rewriting
    pub raw_refs: Vec<String>,
    /// Declared width in pixels
    pub width: Option<u32>,
    /// Declared height in pixels
    pub height: Option<u32>,
}

impl MediaCandidate {
    /// Raw references plus the absolute URL
    pub fn all_refs(&self) -> Vec<String> {
        let mut refs = self.raw_refs.clone();
        if !refs.contains(&self.url) {
            refs.push(self.url.clone());
        }
        refs
    }
}

/// A media file written to the article folder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedMedia {
    /// Remote URL
    pub url: String,
    /// Path relative to the article folder
    pub path: PathBuf,
    /// Media kind
    pub kind: MediaKind,
}

/// A media file that could not be saved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedMedia {
    /// Remote URL
    pub url: String,
    /// Error text
    pub error: String,
}

/// What the pipeline did to one article
#[derive(Clone, Debug, Default)]
pub struct MediaOutcome {
    /// Markdown with references rewritten
    pub markdown: String,
    /// Files saved (primary and fallback)
    pub saved: Vec<SavedMedia>,
    /// Downloads that failed
    pub failed: Vec<FailedMedia>,
    /// Candidates rejected as tracking pixels
    pub rejected: usize,
    /// Images added by the fallback scan
    pub fallback_added: usize,
}

/// Where the media comes from and where it goes
#[derive(Debug, Clone, Copy)]
pub struct MediaInput<'a> {
    /// Converted Markdown to rewrite
    pub markdown: &'a str,
    /// Extracted main-content HTML
    pub content_html: &'a str,
    /// The whole page, for the fallback scan
    pub page_html: &'a str,
    /// Page URL used to resolve relative references
    pub base_url: &'a Url,
    /// Article folder
    pub folder: &'a Path,
}

/// Request parameters shared by every download of one article
#[derive(Debug, Clone, Copy)]
pub struct MediaContext<'a> {
    /// Source key for timeout history
    pub source: &'a str,
    /// Timeouts per download
    pub timeouts: TimeoutConfig,
    /// Crawl delay of the page's host
    pub crawl_delay: Duration,
    /// Download documents, audio and video too
    pub download_all: bool,
    /// Shutdown token
    pub cancel: &'a CancellationToken,
}

/// Discovers, downloads and rewrites embedded media
#[derive(Debug)]
pub struct MediaProcessor {
    config: MediaConfig,
    fetcher: Arc<HttpFetcher>,
    event_tx: broadcast::Sender<Event>,
}

struct Job {
    candidate: MediaCandidate,
    rel_path: PathBuf,
}

impl MediaProcessor {
    /// Create a processor
    pub fn new(
        config: MediaConfig,
        fetcher: Arc<HttpFetcher>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            config,
            fetcher,
            event_tx,
        }
    }

    /// Run the whole pipeline for one article
    ///
    /// Individual media failures never fail the article; they are annotated in
    /// the Markdown and listed in the outcome.
    pub async fn process(&self, input: MediaInput<'_>, ctx: &MediaContext<'_>) -> MediaOutcome {
        let mut cache = DownloadCache::new();
        let mut outcome = MediaOutcome {
            markdown: input.markdown.to_string(),
            ..Default::default()
        };

        let candidates = {
            let content_html = input.content_html.to_string();
            let markdown = input.markdown.to_string();
            let base = input.base_url.clone();
            run_blocking(move || discovery::discover(&content_html, &markdown, &base))
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Media discovery failed");
                    Vec::new()
                })
        };
        let (kept, rejected) = filter::prefilter(candidates, &self.config.tracking_keywords);
        for candidate in &rejected {
            tracing::debug!(url = %candidate.url, "Rejected tracking media");
            outcome.markdown = rewrite::remove_references(&outcome.markdown, &candidate.all_refs());
        }
        outcome.rejected = rejected.len();

        let selected = filter::apply_policy(kept, ctx.download_all, &self.config);
        let results = self
            .download_batch(selected, input.base_url, input.folder, &mut cache, ctx)
            .await;
        for (job, result) in results {
            let refs = job.candidate.all_refs();
            match result {
                Ok(()) => {
                    let local = rel_path_string(&job.rel_path);
                    outcome.markdown = rewrite::rewrite_references(&outcome.markdown, &refs, &local);
                    outcome.saved.push(SavedMedia {
                        url: job.candidate.url,
                        path: job.rel_path,
                        kind: job.candidate.kind,
                    });
                }
                Err(error) => {
                    outcome.markdown =
                        rewrite::mark_unavailable(&outcome.markdown, &refs, &job.candidate.url);
                    outcome.failed.push(FailedMedia {
                        url: job.candidate.url,
                        error,
                    });
                }
            }
        }

        if self.config.fallback_enabled
            && cache.count(MediaKind::Image) < self.config.fallback_min_images
            && !ctx.cancel.is_cancelled()
        {
            self.run_fallback(input, &mut cache, ctx, &mut outcome).await;
        }

        tracing::debug!(
            folder = %input.folder.display(),
            saved = outcome.saved.len(),
            failed = outcome.failed.len(),
            rejected = outcome.rejected,
            fallback = outcome.fallback_added,
            "Media processed"
        );
        outcome
    }

    async fn run_fallback(
        &self,
        input: MediaInput<'_>,
        cache: &mut DownloadCache,
        ctx: &MediaContext<'_>,
        outcome: &mut MediaOutcome,
    ) {
        let scanned = {
            let page_html = input.page_html.to_string();
            let base = input.base_url.clone();
            let config = self.config.clone();
            run_blocking(move || fallback::scan(&page_html, &base, &config))
                .await
                .unwrap_or_default()
        };
        let candidates: Vec<_> = scanned
            .into_iter()
            .filter(|c| !cache.was_attempted(&c.url))
            .take(self.config.fallback_max_images)
            .collect();
        if candidates.is_empty() {
            return;
        }
        tracing::debug!(count = candidates.len(), "Running fallback image scan");

        let mut section = Vec::new();
        let results = self
            .download_batch(candidates, input.base_url, input.folder, cache, ctx)
            .await;
        for (job, result) in results {
            if result.is_ok() {
                section.push((job.candidate.label.clone(), rel_path_string(&job.rel_path)));
                outcome.saved.push(SavedMedia {
                    url: job.candidate.url,
                    path: job.rel_path,
                    kind: job.candidate.kind,
                });
            }
        }
        if !section.is_empty() {
            outcome.fallback_added = section.len();
            outcome
                .markdown
                .push_str(&fallback::additional_images_section(&section));
        }
    }

    /// Download candidates with `min(max_workers, count)` in flight
    ///
    /// URLs already in the cache are not fetched again; results come back in
    /// completion order.
    async fn download_batch(
        &self,
        candidates: Vec<MediaCandidate>,
        page_url: &Url,
        folder: &Path,
        cache: &mut DownloadCache,
        ctx: &MediaContext<'_>,
    ) -> Vec<(Job, std::result::Result<(), String>)> {
        let mut jobs = Vec::new();
        let mut done = Vec::new();
        for candidate in candidates {
            if let Some((path, _)) = cache.get(&candidate.url) {
                let rel_path = path.clone();
                done.push((Job { candidate, rel_path }, Ok(())));
                continue;
            }
            if !cache.mark_attempted(&candidate.url) {
                continue;
            }
            let rel_path = cache.reserve_path(&candidate.url, candidate.kind);
            jobs.push(Job { candidate, rel_path });
        }

        let workers = self.config.max_workers.min(jobs.len()).max(1);
        let results: Vec<(Job, std::result::Result<(), String>)> = stream::iter(jobs)
            .map(|job| async move {
                let result = self.download_one(&job, page_url, folder, ctx).await;
                (job, result)
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        for (job, result) in results {
            if result.is_ok() {
                cache.insert(&job.candidate.url, job.rel_path.clone(), job.candidate.kind);
            }
            done.push((job, result));
        }
        done
    }

    async fn download_one(
        &self,
        job: &Job,
        page_url: &Url,
        folder: &Path,
        ctx: &MediaContext<'_>,
    ) -> std::result::Result<(), String> {
        if ctx.cancel.is_cancelled() {
            return Err("cancelled".to_string());
        }
        let url = &job.candidate.url;
        let ethical = self.fetcher.ethical();
        if let Err(e) = ethical.check_allowed(url).await {
            tracing::debug!(url = %url, error = %e, "Skipping media disallowed by robots.txt");
            let _ = self.event_tx.send(Event::MediaFailed {
                url: url.clone(),
                error: e.to_string(),
            });
            return Err(e.to_string());
        }

        // the page's delay (profile, declared) only binds requests to the page's own host
        let mut crawl_delay = ethical.crawl_delay(url, None).await;
        if same_host(url, page_url) {
            crawl_delay = crawl_delay.max(ctx.crawl_delay);
        }
        let request = RequestContext {
            source: ctx.source,
            timeouts: ctx.timeouts,
            crawl_delay,
            max_bytes: filter::max_bytes(job.candidate.kind, ctx.download_all, &self.config),
            cancel: ctx.cancel,
        };
        let dest = folder.join(&job.rel_path);

        match download::download_to(&self.fetcher, url, &dest, &request).await {
            Ok(bytes) => {
                tracing::debug!(url = %url, path = %dest.display(), bytes, "Saved media");
                let _ = self.event_tx.send(Event::MediaSaved {
                    url: url.clone(),
                    path: dest,
                    kind: job.candidate.kind,
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Media download failed");
                let _ = self.event_tx.send(Event::MediaFailed {
                    url: url.clone(),
                    error: e.to_string(),
                });
                Err(e.to_string())
            }
        }
    }
}

fn same_host(url: &str, page_url: &Url) -> bool {
    match (host_key(url), host_key(page_url.as_str())) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Relative path with forward slashes, as Markdown expects
pub(crate) fn rel_path_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests;
