//! Media downloads and local file naming

use super::MediaKind;
use crate::error::{Error, Result};
use crate::http::{HttpFetcher, RequestContext};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

const MAX_NAME_LEN: usize = 100;

/// Per-article record of fetched media: URL → (relative path, kind)
///
/// Shared by the primary pass and the fallback scan so no URL is fetched twice.
#[derive(Debug, Default)]
pub struct DownloadCache {
    entries: HashMap<String, (PathBuf, MediaKind)>,
    attempted: HashSet<String>,
    used_paths: HashSet<PathBuf>,
}

impl DownloadCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Local path and kind of an already saved URL
    pub fn get(&self, url: &str) -> Option<&(PathBuf, MediaKind)> {
        self.entries.get(url)
    }

    /// True when the URL was saved or its download already failed
    pub fn was_attempted(&self, url: &str) -> bool {
        self.attempted.contains(url)
    }

    /// Mark a URL as attempted; returns `false` if it already was
    pub fn mark_attempted(&mut self, url: &str) -> bool {
        self.attempted.insert(url.to_string())
    }

    /// Record a saved file
    pub fn insert(&mut self, url: &str, path: PathBuf, kind: MediaKind) {
        self.entries.insert(url.to_string(), (path, kind));
    }

    /// Number of saved files of `kind`
    pub fn count(&self, kind: MediaKind) -> usize {
        self.entries.values().filter(|(_, k)| *k == kind).count()
    }

    /// Pick a unique relative path (`images/name.jpg`) for `url`
    ///
    /// The name comes from the URL path; a short hash of the URL is prepended
    /// when the path has no usable name or the name is taken.
    pub fn reserve_path(&mut self, url: &str, kind: MediaKind) -> PathBuf {
        let dir = Path::new(kind.dir_name());
        let hash = short_hash(url);

        let path = match file_name_from_url(url) {
            Some(name) => {
                let name = ensure_extension(name, kind);
                let candidate = dir.join(&name);
                if self.used_paths.contains(&candidate) {
                    dir.join(format!("{hash}-{name}"))
                } else {
                    candidate
                }
            }
            None => dir.join(format!("{hash}.{}", kind.default_extension())),
        };
        self.used_paths.insert(path.clone());
        path
    }
}

/// First 8 hex digits of the URL's SHA-256
pub fn short_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// Sanitized last path segment, or `None` when there is nothing usable
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?.to_string();
    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);
    let name = sanitize_file_name(&decoded);
    let stem_is_empty = name.trim_start_matches('.').is_empty();
    (!stem_is_empty).then_some(name)
}

/// Keep ASCII alphanumerics, `.`, `-` and `_`; replace the rest with `_`
pub fn sanitize_file_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = out.trim_matches(|c| c == '_' || c == '.').to_string();
    out = trimmed;

    if out.len() > MAX_NAME_LEN {
        // keep the extension when shortening
        match out.rfind('.') {
            Some(dot) if out.len() - dot <= 10 => {
                let ext = out[dot..].to_string();
                out.truncate(MAX_NAME_LEN - ext.len());
                out.push_str(&ext);
            }
            _ => out.truncate(MAX_NAME_LEN),
        }
    }
    out
}

pub(crate) fn ensure_extension(name: String, kind: MediaKind) -> String {
    if Path::new(&name).extension().is_some() {
        name
    } else {
        format!("{name}.{}", kind.default_extension())
    }
}

/// Fetch one media file and write it to `dest`
///
/// HTML bodies are refused: they are error or login pages, not media.
pub async fn download_to(
    fetcher: &HttpFetcher,
    url: &str,
    dest: &Path,
    ctx: &RequestContext<'_>,
) -> Result<u64> {
    let response = fetcher.get(url, ctx).await?;

    if let Some(content_type) = response.content_type()
        && (content_type == "text/html" || content_type == "application/xhtml+xml")
    {
        return Err(Error::UnexpectedContent {
            url: url.to_string(),
            content_type,
        });
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, &response.body).await?;
    Ok(response.body.len() as u64)
}
