//! Full-page image scan used when primary extraction saved too few images

use super::discovery::{dedup, image_candidate};
use super::filter::{is_chrome, is_tracking};
use super::MediaCandidate;
use crate::config::MediaConfig;
use scraper::{Html, Selector};
use url::Url;

/// Content-looking images anywhere in the page
///
/// Images whose class, id, alt or src hit the chrome deny-list, tracking pixels,
/// and images declaring a width or height below `fallback_min_dimension` are
/// excluded. The result is not capped; the caller applies
/// `fallback_max_images` after dropping URLs it already tried.
pub fn scan(page_html: &str, base: &Url, config: &MediaConfig) -> Vec<MediaCandidate> {
    let document = Html::parse_document(page_html);
    let Ok(sel) = Selector::parse("img") else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for img in document.select(&sel) {
        let el = img.value();
        let attrs = [
            el.attr("class").unwrap_or_default(),
            el.attr("id").unwrap_or_default(),
            el.attr("alt").unwrap_or_default(),
            el.attr("src").unwrap_or_default(),
            el.attr("data-src").unwrap_or_default(),
        ];
        if is_chrome(&attrs, &config.chrome_deny_list) {
            continue;
        }
        let Some(candidate) = image_candidate(img, base) else {
            continue;
        };
        if is_tracking(&candidate, &config.tracking_keywords) {
            continue;
        }
        let min = config.fallback_min_dimension;
        if candidate.width.is_some_and(|w| w < min) || candidate.height.is_some_and(|h| h < min) {
            continue;
        }
        found.push(candidate);
    }
    dedup(found)
}

/// Markdown section listing the images the fallback scan saved
pub fn additional_images_section(saved: &[(String, String)]) -> String {
    let mut section = String::from("\n\n## Additional Images\n");
    for (label, path) in saved {
        section.push_str(&format!("\n![{label}]({path})\n"));
    }
    section
}
