//! URLs already handled in the current run

use std::collections::HashSet;
use std::sync::Mutex;
use url::Url;

/// Per-run set of processed article URLs
///
/// URLs are normalized before comparison: lowercase host, no fragment, no
/// `utm_*` parameters and no trailing slash on the path.
#[derive(Debug, Default)]
pub struct SessionUrlCache {
    seen: Mutex<HashSet<String>>,
}

impl SessionUrlCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `url`; returns `false` when it was already recorded this run
    pub fn insert(&self, url: &str) -> bool {
        let key = normalize_url(url);
        self.lock().insert(key)
    }

    /// Whether `url` was recorded this run
    pub fn contains(&self, url: &str) -> bool {
        let key = normalize_url(url);
        self.lock().contains(&key)
    }

    /// Number of URLs recorded
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget everything (start of a run)
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Canonical form used for deduplication; unparseable input is returned trimmed
pub fn normalize_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url.trim()) else {
        return url.trim().to_string();
    };
    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }

    // Url already lowercases the host of special schemes
    parsed.to_string()
}
