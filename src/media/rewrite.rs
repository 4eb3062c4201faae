//! Markdown reference rewriting
//!
//! All rewrites are idempotent: applying one twice gives the same text as once.

use regex::{Captures, Regex};

/// Every spelling of a reference worth matching: as written, and with `&`
/// HTML-escaped the way converters sometimes emit it
fn spellings(reference: &str) -> Vec<String> {
    let mut out = vec![reference.to_string()];
    if reference.contains('&') && !reference.contains("&amp;") {
        out.push(reference.replace('&', "&amp;"));
    }
    out
}

fn is_absolute(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// `](ref)` or `](ref "title")` – the target part of image and link syntax
fn target_pattern(reference: &str) -> Option<Regex> {
    Regex::new(&format!(
        r#"\]\(\s*<?{}>?(\s+"[^"]*")?\s*\)"#,
        regex::escape(reference)
    ))
    .ok()
}

/// A bare absolute URL not followed by more URL characters (trailing
/// punctuation ends the URL)
fn bare_pattern(reference: &str) -> Option<Regex> {
    Regex::new(&format!(
        r#"(^|[\s(\[])({})([.,;:!?)]*(?:$|[^A-Za-z0-9\-._~:/?#\[\]@!$&'()*+,;=%]))"#,
        regex::escape(reference)
    ))
    .ok()
}

/// Point every occurrence of `references` at `local_path`
///
/// Covers image and link syntax, `<autolinks>` and bare absolute URLs.
pub fn rewrite_references(markdown: &str, references: &[String], local_path: &str) -> String {
    let mut text = markdown.to_string();

    for reference in references.iter().flat_map(|r| spellings(r)) {
        if reference.is_empty() || reference == local_path {
            continue;
        }
        if let Some(re) = target_pattern(&reference) {
            text = re
                .replace_all(&text, |caps: &Captures| {
                    format!("]({local_path}{})", caps.get(1).map_or("", |m| m.as_str()))
                })
                .into_owned();
        }
        if is_absolute(&reference) {
            let autolink = format!("<{reference}>");
            text = text.replace(&autolink, &format!("[{local_path}]({local_path})"));
            text = replace_bare(&text, &reference, local_path);
        }
    }
    text
}

fn replace_bare(text: &str, reference: &str, replacement: &str) -> String {
    let Some(re) = bare_pattern(reference) else {
        return text.to_string();
    };
    let mut current = text.to_string();
    // adjacent occurrences share a delimiter, so repeat until stable
    loop {
        let next = re
            .replace_all(&current, |caps: &Captures| {
                format!("{}{replacement}{}", &caps[1], &caps[3])
            })
            .into_owned();
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Turn `![alt](ref)` into `[alt (unavailable)](url)` for a failed download
pub fn mark_unavailable(markdown: &str, references: &[String], url: &str) -> String {
    let mut text = markdown.to_string();
    for reference in references.iter().flat_map(|r| spellings(r)) {
        let Ok(re) = Regex::new(&format!(
            r#"!\[([^\]]*)\]\(\s*<?{}>?(\s+"[^"]*")?\s*\)"#,
            regex::escape(&reference)
        )) else {
            continue;
        };
        text = re
            .replace_all(&text, |caps: &Captures| {
                let alt = caps[1].trim();
                let alt = if alt.is_empty() { "image" } else { alt };
                format!("[{alt} (unavailable)]({url})")
            })
            .into_owned();
    }
    text
}

/// Remove rejected media: image syntax disappears, links keep their text
pub fn remove_references(markdown: &str, references: &[String]) -> String {
    let mut text = markdown.to_string();
    for reference in references.iter().flat_map(|r| spellings(r)) {
        if reference.is_empty() {
            continue;
        }
        let escaped = regex::escape(&reference);
        if let Ok(re) = Regex::new(&format!(
            r#"!\[[^\]]*\]\(\s*<?{escaped}>?(\s+"[^"]*")?\s*\)"#
        )) {
            text = re.replace_all(&text, "").into_owned();
        }
        if let Ok(re) = Regex::new(&format!(
            r#"\[([^\]]*)\]\(\s*<?{escaped}>?(\s+"[^"]*")?\s*\)"#
        )) {
            text = re
                .replace_all(&text, |caps: &Captures| caps[1].to_string())
                .into_owned();
        }
        if is_absolute(&reference) {
            text = text.replace(&format!("<{reference}>"), "");
            text = replace_bare(&text, &reference, "");
        }
    }
    text
}
