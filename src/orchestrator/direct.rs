//! PdfFetch / DirectMediaFetch: the article URL is itself a file

use super::web::render_document;
use super::{ARTICLE_FILE, Archived, FetchOrchestrator, StateTracker};
use crate::error::{Error, Result};
use crate::http::FetchedResponse;
use crate::media::download::{ensure_extension, file_name_from_url, short_hash};
use crate::media::{MediaKind, filter, rel_path_string};
use crate::types::{Article, Event, FetchState, Outcome};
use std::path::{Path, PathBuf};

impl FetchOrchestrator {
    pub(super) async fn fetch_direct(
        &self,
        article: &Article,
        kind: MediaKind,
        base_folder: &Path,
        tracker: &mut StateTracker<'_>,
    ) -> Outcome<Archived> {
        let (source, profile) = self.source_for(&article.url);
        let declared = profile.as_ref().and_then(|p| p.crawl_delay);
        // the file is the article, so the unrestricted cap for its kind applies
        let max_bytes = filter::max_bytes(kind, true, &self.services.config.media);

        let urls = [article.url.clone()];
        let outcome = self
            .services
            .retry_skip
            .execute_with_url_fallbacks(
                &source,
                &urls,
                self.services.config.fetch.max_retries,
                &self.cancel,
                |candidate| self.get_page(candidate, &source, declared, max_bytes),
            )
            .await;

        match outcome {
            Outcome::Success(response) => self
                .save_binary(article, kind, &response, base_folder, tracker)
                .await
                .into(),
            Outcome::Skipped(reason) => Outcome::Skipped(reason),
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    /// Write the file under its kind's subfolder plus a Markdown stub linking it
    pub(super) async fn save_binary(
        &self,
        article: &Article,
        kind: MediaKind,
        response: &FetchedResponse,
        base_folder: &Path,
        tracker: &mut StateTracker<'_>,
    ) -> Result<Archived> {
        if let Some(content_type) = response.content_type()
            && (content_type == "text/html" || content_type == "application/xhtml+xml")
        {
            return Err(Error::UnexpectedContent {
                url: response.url.clone(),
                content_type,
            });
        }

        let name = file_name_from_url(&response.url)
            .or_else(|| file_name_from_url(&article.url))
            .map(|name| ensure_extension(name, kind))
            .unwrap_or_else(|| format!("{}.{}", short_hash(&article.url), kind.default_extension()));
        let title = match article.title.trim() {
            "" => name.clone(),
            listed => listed.to_string(),
        };

        let folder = self.storage.create_article_folder(base_folder, &title).await?;
        let written: Result<PathBuf> = async {
            let rel_path = Path::new(kind.dir_name()).join(&name);
            let local = rel_path_string(&rel_path);
            let saved = self.storage.save(&folder, &local, &response.body).await?;
            self.services.emit(Event::MediaSaved {
                url: response.url.clone(),
                path: saved,
                kind,
            });

            tracker.enter(FetchState::MediaPostProcess);
            let body = match kind {
                MediaKind::Image => format!("![{title}]({local})\n"),
                _ => format!(
                    "[{name}]({local}) ({})\n",
                    human_size(response.body.len() as u64)
                ),
            };
            let document = render_document(&title, article, &body);
            self.storage
                .save(&folder, ARTICLE_FILE, document.as_bytes())
                .await
        }
        .await;
        let markdown_path = match written {
            Ok(path) => path,
            Err(e) => {
                self.discard_folder(&folder).await;
                return Err(e);
            }
        };

        tracing::debug!(
            url = %article.url,
            kind = ?kind,
            bytes = response.body.len(),
            folder = %folder.display(),
            "File archived"
        );
        Ok(Archived {
            markdown_path,
            folder,
            title,
        })
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
