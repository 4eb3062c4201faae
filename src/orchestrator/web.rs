//! WebContentFetch: page download, extraction, conversion and media

use super::{ARTICLE_FILE, Archived, FetchOrchestrator, RAW_HTML_FILE, Route, StateTracker};
use crate::conversion::run_blocking;
use crate::error::{Error, Result};
use crate::html;
use crate::http::{FetchedResponse, RequestContext};
use crate::media::{MediaContext, MediaInput, MediaKind};
use crate::source::SourceProfile;
use crate::types::{Article, FetchState, Outcome};
use chrono::SecondsFormat;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Wayback Machine copy of `url` (redirects to the latest capture)
pub(crate) fn wayback_url(url: &str) -> String {
    format!("https://web.archive.org/web/{url}")
}

impl FetchOrchestrator {
    pub(super) async fn fetch_web(
        &self,
        article: &Article,
        base_folder: &Path,
        tracker: &mut StateTracker<'_>,
    ) -> Outcome<Archived> {
        let (source, profile) = self.source_for(&article.url);
        let declared = profile.as_ref().and_then(|p| p.crawl_delay);
        let config = &self.services.config;

        let mut urls = vec![article.url.clone()];
        if config.fetch.archive_fallback {
            urls.push(wayback_url(&article.url));
        }

        let outcome = self
            .services
            .retry_skip
            .execute_with_url_fallbacks(
                &source,
                &urls,
                config.fetch.max_retries,
                &self.cancel,
                |candidate| self.get_page(candidate, &source, declared, config.http.max_page_bytes),
            )
            .await;
        let response = match outcome {
            Outcome::Success(response) => response,
            Outcome::Skipped(reason) => return Outcome::Skipped(reason),
            Outcome::Failed(e) => return Outcome::Failed(e),
        };

        // a page URL that serves a file is archived as that file
        if !response.is_html()
            && let Some(route) = response
                .content_type()
                .as_deref()
                .and_then(Route::from_content_type)
        {
            tracing::debug!(
                url = %article.url,
                content_type = ?response.content_type(),
                "Page URL returned a file, saving it directly"
            );
            tracker.enter(route.state());
            let kind = match route {
                Route::Direct(kind) => kind,
                Route::Pdf | Route::Web => MediaKind::Document,
            };
            return self
                .save_binary(article, kind, &response, base_folder, tracker)
                .await
                .into();
        }

        self.archive_page(article, &response, &source, profile.as_ref(), base_folder, tracker)
            .await
            .into()
    }

    /// GET through robots.txt, crawl-delay and adaptive timeouts
    pub(super) async fn get_page(
        &self,
        url: String,
        source: &str,
        declared_delay: Option<Duration>,
        max_bytes: u64,
    ) -> Result<FetchedResponse> {
        let ethical = &self.services.ethical;
        ethical.check_allowed(&url).await?;

        let ctx = RequestContext {
            source,
            timeouts: self.services.tracker.resolve(source),
            crawl_delay: ethical.crawl_delay(&url, declared_delay).await,
            max_bytes,
            cancel: &self.cancel,
        };
        self.services.fetcher.get(&url, &ctx).await
    }

    async fn archive_page(
        &self,
        article: &Article,
        response: &FetchedResponse,
        source: &str,
        profile: Option<&SourceProfile>,
        base_folder: &Path,
        tracker: &mut StateTracker<'_>,
    ) -> Result<Archived> {
        let page_html: Arc<str> = response.text().into();
        let base_url = Url::parse(&response.url)
            .or_else(|_| Url::parse(&article.url))
            .map_err(|e| Error::InvalidUrl {
                url: response.url.clone(),
                reason: e.to_string(),
            })?;

        let selector = profile.and_then(|p| p.content_selector.clone());
        let (extracted_title, content_html) = run_blocking({
            let page_html = page_html.clone();
            move || {
                (
                    html::extract_title(&page_html),
                    html::extract_content(&page_html, selector.as_deref()),
                )
            }
        })
        .await?;
        let title = extracted_title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| article.title.clone());

        let folder = self.storage.create_article_folder(base_folder, &title).await?;
        let page = Page {
            article,
            response,
            page_html,
            content_html,
            base_url,
            title,
        };
        match self.write_page(page, &folder, source, profile, tracker).await {
            Ok(archived) => Ok(archived),
            Err(e) => {
                self.discard_folder(&folder).await;
                Err(e)
            }
        }
    }

    async fn write_page(
        &self,
        page: Page<'_>,
        folder: &Path,
        source: &str,
        profile: Option<&SourceProfile>,
        tracker: &mut StateTracker<'_>,
    ) -> Result<Archived> {
        let Page {
            article,
            response,
            page_html,
            content_html,
            base_url,
            title,
        } = page;
        let raw_path = self
            .storage
            .save(folder, RAW_HTML_FILE, &response.body)
            .await?;

        let timeout = self.services.config.conversion.timeout;
        let mut markdown = self
            .services
            .conversion
            .convert_with_timeout(content_html.clone(), timeout)
            .await;
        let converted = !markdown.trim().is_empty();
        if !converted {
            tracing::warn!(
                url = %article.url,
                raw = %raw_path.display(),
                "Conversion produced nothing, falling back to plain text"
            );
            markdown = run_blocking({
                let page_html = page_html.clone();
                let content_html = content_html.clone();
                move || {
                    let text = html::plain_text(&content_html);
                    if text.trim().is_empty() {
                        html::plain_text(&page_html)
                    } else {
                        text
                    }
                }
            })
            .await?;
        }

        tracker.enter(FetchState::MediaPostProcess);
        let declared = profile.and_then(|p| p.crawl_delay);
        let media_ctx = MediaContext {
            source,
            timeouts: self.services.tracker.resolve(source),
            crawl_delay: self
                .services
                .ethical
                .crawl_delay(base_url.as_str(), declared)
                .await,
            download_all: self.download_all,
            cancel: &self.cancel,
        };
        let media = self
            .services
            .media
            .process(
                MediaInput {
                    markdown: &markdown,
                    content_html: &content_html,
                    page_html: &page_html,
                    base_url: &base_url,
                    folder,
                },
                &media_ctx,
            )
            .await;

        let document = render_document(&title, article, &media.markdown);
        let markdown_path = self
            .storage
            .save(folder, ARTICLE_FILE, document.as_bytes())
            .await?;

        // keep the raw copy for reprocessing when only plain text came out
        if converted && let Err(e) = self.storage.remove(&raw_path).await {
            tracing::warn!(path = %raw_path.display(), error = %e, "Could not remove raw HTML");
        }

        tracing::debug!(
            url = %article.url,
            folder = %folder.display(),
            media_saved = media.saved.len(),
            media_failed = media.failed.len(),
            converted,
            "Page archived"
        );
        Ok(Archived {
            markdown_path,
            folder: folder.to_path_buf(),
            title,
        })
    }
}

impl FetchOrchestrator {
    /// Remove a half-written article folder; the error article gets a folder of its own
    pub(super) async fn discard_folder(&self, folder: &Path) {
        if let Err(e) = self.storage.remove_folder(folder).await {
            tracing::warn!(
                folder = %folder.display(),
                error = %e,
                "Could not remove partial article folder"
            );
        }
    }
}

/// A fetched page after extraction, before anything besides its folder is written
struct Page<'a> {
    article: &'a Article,
    response: &'a FetchedResponse,
    page_html: Arc<str>,
    content_html: String,
    base_url: Url,
    title: String,
}

/// Markdown document: title, provenance lines, then the body
pub(super) fn render_document(title: &str, article: &Article, body: &str) -> String {
    let mut doc = format!("# {}\n\n", title.trim());
    doc.push_str(&format!("- Source: <{}>\n", article.url));
    if let Some(comments) = &article.comment_url {
        doc.push_str(&format!("- Discussion: <{comments}>\n"));
    }
    doc.push_str(&format!(
        "- Archived: {}\n\n---\n\n",
        chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    doc.push_str(body.trim());
    doc.push('\n');
    doc
}
