//! Finding embedded media in extracted content and converted Markdown

use super::{MediaCandidate, MediaKind};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use url::Url;

/// `<img>` attributes that may carry the image URL, in preference order
pub(crate) const IMAGE_ATTRS: &[&str] = &["src", "data-src", "data-lazy", "data-lazy-src"];

static MARKDOWN_IMAGE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"!\[([^\]]*)\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)"#).ok());

/// Resolve a reference as written in the page to an absolute http(s) URL
///
/// Handles protocol-relative, root-relative and relative forms. `data:` URIs and
/// other schemes yield `None`; fragments are removed.
pub fn normalize_media_url(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("data:") || lower.starts_with("javascript:") || lower.starts_with("mailto:") {
        return None;
    }
    let mut url = base.join(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

fn parse_dimension(value: Option<&str>) -> Option<u32> {
    let value = value?.trim().trim_end_matches("px").trim();
    value.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u32)
}

/// Build a candidate from an `<img>` element; `None` when no attribute resolves
pub(crate) fn image_candidate(img: ElementRef<'_>, base: &Url) -> Option<MediaCandidate> {
    let el = img.value();
    let raw_values: Vec<&str> = IMAGE_ATTRS
        .iter()
        .filter_map(|attr| el.attr(attr))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();

    let url = raw_values
        .iter()
        .find_map(|raw| normalize_media_url(raw, base))?;
    let kind = MediaKind::from_url(&url).unwrap_or(MediaKind::Image);

    Some(MediaCandidate {
        kind,
        url,
        label: el.attr("alt").unwrap_or_default().trim().to_string(),
        raw_refs: raw_values.iter().map(|s| s.to_string()).collect(),
        width: parse_dimension(el.attr("width")),
        height: parse_dimension(el.attr("height")),
    })
}

/// All media referenced by the content HTML and its Markdown rendering,
/// deduplicated by normalized URL
pub fn discover(content_html: &str, markdown: &str, base: &Url) -> Vec<MediaCandidate> {
    let mut found = Vec::new();
    discover_html(content_html, base, &mut found);
    discover_markdown(markdown, base, &mut found);
    dedup(found)
}

fn discover_html(content_html: &str, base: &Url, out: &mut Vec<MediaCandidate>) {
    let fragment = Html::parse_fragment(content_html);

    if let Ok(sel) = Selector::parse("img") {
        out.extend(fragment.select(&sel).filter_map(|img| image_candidate(img, base)));
    }

    if let Ok(sel) = Selector::parse("a[href]") {
        for link in fragment.select(&sel) {
            let Some(raw) = link.value().attr("href") else {
                continue;
            };
            let Some(url) = normalize_media_url(raw, base) else {
                continue;
            };
            // plain page links are not media
            let Some(kind) = MediaKind::from_url(&url) else {
                continue;
            };
            out.push(MediaCandidate {
                kind,
                url,
                label: link.text().collect::<String>().trim().to_string(),
                raw_refs: vec![raw.trim().to_string()],
                width: None,
                height: None,
            });
        }
    }

    for (tag, kind) in [("video", MediaKind::Video), ("audio", MediaKind::Audio)] {
        let css = format!("{tag}[src], {tag} source[src]");
        let Ok(sel) = Selector::parse(&css) else {
            continue;
        };
        for el in fragment.select(&sel) {
            let Some(raw) = el.value().attr("src") else {
                continue;
            };
            let Some(url) = normalize_media_url(raw, base) else {
                continue;
            };
            out.push(MediaCandidate {
                kind: MediaKind::from_url(&url).unwrap_or(kind),
                url,
                label: el.value().attr("title").unwrap_or_default().to_string(),
                raw_refs: vec![raw.trim().to_string()],
                width: parse_dimension(el.value().attr("width")),
                height: parse_dimension(el.value().attr("height")),
            });
        }
    }
}

fn discover_markdown(markdown: &str, base: &Url, out: &mut Vec<MediaCandidate>) {
    let Some(re) = MARKDOWN_IMAGE.as_ref() else {
        return;
    };
    for caps in re.captures_iter(markdown) {
        let raw = &caps[2];
        let Some(url) = normalize_media_url(raw, base) else {
            continue;
        };
        out.push(MediaCandidate {
            kind: MediaKind::from_url(&url).unwrap_or(MediaKind::Image),
            url,
            label: caps[1].trim().to_string(),
            raw_refs: vec![raw.to_string()],
            width: None,
            height: None,
        });
    }
}

/// Merge candidates sharing a URL, keeping the first label and any declared size
pub(crate) fn dedup(candidates: Vec<MediaCandidate>) -> Vec<MediaCandidate> {
    let mut merged: Vec<MediaCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match merged.iter_mut().find(|c| c.url == candidate.url) {
            Some(existing) => {
                for raw in candidate.raw_refs {
                    if !existing.raw_refs.contains(&raw) {
                        existing.raw_refs.push(raw);
                    }
                }
                if existing.label.is_empty() {
                    existing.label = candidate.label;
                }
                existing.width = existing.width.or(candidate.width);
                existing.height = existing.height.or(candidate.height);
            }
            None => merged.push(candidate),
        }
    }
    merged
}
