//! Candidate filtering before any network call

use super::{MediaCandidate, MediaKind};
use crate::config::MediaConfig;

/// Tracking pixels: URL keyword match or a declared 0–2px dimension
pub fn is_tracking(candidate: &MediaCandidate, keywords: &[String]) -> bool {
    if candidate.kind != MediaKind::Image {
        return false;
    }
    let url = candidate.url.to_ascii_lowercase();
    if keywords.iter().any(|k| url.contains(&k.to_ascii_lowercase())) {
        return true;
    }
    candidate.width.is_some_and(|w| w <= 2) || candidate.height.is_some_and(|h| h <= 2)
}

/// Split candidates into `(kept, rejected)` by the tracking check
pub fn prefilter(
    candidates: Vec<MediaCandidate>,
    keywords: &[String],
) -> (Vec<MediaCandidate>, Vec<MediaCandidate>) {
    candidates
        .into_iter()
        .partition(|c| !is_tracking(c, keywords))
}

/// Apply the download policy
///
/// Documents, audio and video need `download_all`. Images are always attempted,
/// capped at `max_images` (or `max_images_restricted` without `download_all`).
pub fn apply_policy(
    candidates: Vec<MediaCandidate>,
    download_all: bool,
    config: &MediaConfig,
) -> Vec<MediaCandidate> {
    let image_cap = if download_all {
        config.max_images
    } else {
        config.max_images_restricted
    };
    let mut images = 0;

    candidates
        .into_iter()
        .filter(|c| match c.kind {
            MediaKind::Image => {
                images += 1;
                images <= image_cap
            }
            _ => download_all,
        })
        .collect()
}

/// Byte cap for one file of `kind`
pub fn max_bytes(kind: MediaKind, download_all: bool, config: &MediaConfig) -> u64 {
    match kind {
        MediaKind::Image if download_all => config.image_max_bytes,
        MediaKind::Image => config.image_max_bytes_restricted,
        MediaKind::Document => config.document_max_bytes,
        MediaKind::Audio => config.audio_max_bytes,
        MediaKind::Video => config.video_max_bytes,
    }
}

/// True when any of the given attribute values contains a deny-list term
pub fn is_chrome(values: &[&str], deny_list: &[String]) -> bool {
    values.iter().any(|value| {
        let value = value.to_ascii_lowercase();
        deny_list
            .iter()
            .any(|term| !term.is_empty() && value.contains(&term.to_ascii_lowercase()))
    })
}
