//! HTML helpers: main-content extraction, titles, plain-text fallback and feed
//! discovery
//!
//! `scraper::Html` is not `Send`; everything here is synchronous so a parsed
//! document never lives across an `.await`.

use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

/// Elements dropped from extracted content together with their subtree
const BOILERPLATE_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "iframe", "svg",
    "button", "template", "object", "embed",
];

/// Tried in order when no profile selector is configured
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=main]",
    "#content",
    ".post-content",
    ".entry-content",
    ".article-body",
    "body",
];

/// Deepest element nesting kept in extracted content
pub const MAX_NESTING: usize = 128;

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Main content of a page as cleaned HTML
///
/// `content_selector` (from the source profile) is tried first, then common
/// article containers. Boilerplate elements and `role="navigation"` blocks are
/// removed. Returns an empty string when the page has no usable root.
pub fn extract_content(html: &str, content_selector: Option<&str>) -> String {
    let document = Html::parse_document(html);
    let candidates = content_selector.into_iter().chain(CONTENT_SELECTORS.iter().copied());

    for css in candidates {
        let Some(sel) = selector(css) else {
            tracing::debug!(selector = css, "Ignoring invalid content selector");
            continue;
        };
        if let Some(root) = document.select(&sel).next() {
            let mut out = String::with_capacity(html.len() / 2);
            write_children(root, &mut out);
            if !out.trim().is_empty() {
                return out;
            }
        }
    }
    String::new()
}

fn is_boilerplate(el: &ElementRef<'_>) -> bool {
    let value = el.value();
    BOILERPLATE_TAGS.contains(&value.name())
        || value.attr("role") == Some("navigation")
        || value.attr("aria-hidden") == Some("true")
}

enum Step<'a> {
    Open(ElementRef<'a>, usize),
    Text(&'a str),
    Close(&'a str),
}

/// Serialize the children of `root`, skipping boilerplate
///
/// Iterative so hostile nesting cannot exhaust the stack. Elements nested deeper
/// than `MAX_NESTING` lose their tags but keep their content, which also keeps
/// the recursive Markdown converter within bounds.
fn write_children(root: ElementRef<'_>, out: &mut String) {
    let mut stack = Vec::new();
    push_children(root, 1, &mut stack);

    while let Some(step) = stack.pop() {
        match step {
            Step::Text(text) => push_escaped(out, text, false),
            Step::Close(name) => {
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
            Step::Open(el, depth) => {
                if depth > MAX_NESTING {
                    push_children(el, depth + 1, &mut stack);
                    continue;
                }
                let name = el.value().name();
                write_open_tag(el, out);
                if VOID_TAGS.contains(&name) {
                    continue;
                }
                stack.push(Step::Close(name));
                push_children(el, depth + 1, &mut stack);
            }
        }
    }
}

/// Queue the children of `el` so they pop in document order
fn push_children<'a>(el: ElementRef<'a>, depth: usize, stack: &mut Vec<Step<'a>>) {
    for child in el.children().rev() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if !is_boilerplate(&child_el) {
                stack.push(Step::Open(child_el, depth));
            }
        } else if let Node::Text(text) = child.value() {
            stack.push(Step::Text(text));
        }
    }
}

fn write_open_tag(el: ElementRef<'_>, out: &mut String) {
    out.push('<');
    out.push_str(el.value().name());
    for (attr, value) in el.value().attrs() {
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        push_escaped(out, value, true);
        out.push('"');
    }
    out.push('>');
}

fn push_escaped(out: &mut String, text: &str, attribute: bool) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

/// Best-effort page title: `og:title`, then `<title>`, then the first `<h1>`
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let og = selector(r#"meta[property="og:title"]"#).and_then(|sel| {
        document
            .select(&sel)
            .find_map(|m| m.value().attr("content").map(str::to_string))
    });
    let from_tag = |css: &str| {
        selector(css).and_then(|sel| {
            document
                .select(&sel)
                .next()
                .map(|el| el.text().collect::<String>())
        })
    };

    og.into_iter()
        .chain(from_tag("title"))
        .chain(from_tag("h1"))
        .map(|t| collapse_whitespace(&t))
        .find(|t| !t.is_empty())
}

/// Readable text of a page, one block per paragraph
///
/// Used when Markdown conversion produced nothing.
pub fn plain_text(html: &str) -> String {
    let document = Html::parse_fragment(html);
    let blocks = selector("h1, h2, h3, h4, h5, h6, p, li, pre, blockquote, td").map(|sel| {
        document
            .select(&sel)
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
    });

    match blocks {
        Some(blocks) if !blocks.is_empty() => blocks.join("\n\n"),
        _ => collapse_whitespace(&document.root_element().text().collect::<String>()),
    }
}

/// RSS/Atom URLs advertised through `<link rel="alternate">`, resolved against `base`
pub fn find_feed_links(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let Some(sel) = selector(r#"link[rel~="alternate"]"#) else {
        return Vec::new();
    };

    let mut links = Vec::new();
    for link in document.select(&sel) {
        let kind = link.value().attr("type").unwrap_or_default().to_ascii_lowercase();
        if !matches!(
            kind.as_str(),
            "application/rss+xml" | "application/atom+xml" | "application/feed+xml"
        ) {
            continue;
        }
        if let Some(href) = link.value().attr("href")
            && let Ok(resolved) = base.join(href.trim())
        {
            let resolved = resolved.to_string();
            if !links.contains(&resolved) {
                links.push(resolved);
            }
        }
    }
    links
}

/// True when `body` parses as an RSS 2.0 channel or an Atom feed
pub fn is_feed(body: &[u8]) -> bool {
    rss::Channel::read_from(body).is_ok() || atom_syndication::Feed::read_from(body).is_ok()
}

/// HTML to Markdown; CPU-bound, run it through the conversion pool
pub fn to_markdown(html: &str) -> String {
    html2md::parse_html(html)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
